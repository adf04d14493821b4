//! Integration tests for the measurement sequencer over the simulated
//! instrument: the full scan/measure interleave, degraded continuation on
//! per-point failures, and the abort paths that must never leave the
//! feedback loop disabled.

use std::sync::Arc;
use std::time::Duration;

use spm_daq::bridge::mock::SimulatedInstrument;
use spm_daq::bridge::InstrumentBridge;
use spm_daq::error::AcqError;
use spm_daq::geometry::Point;
use spm_daq::grid::compute_grid;
use spm_daq::scan::{ScanFrame, SweepDirection};
use spm_daq::schedule::Schedule;
use spm_daq::sequencer::{MeasurementSequencer, SequencerConfig, SequencerState};

fn test_frame() -> ScanFrame {
    ScanFrame {
        center: Point::new(0.0, 0.0),
        range: 500.0,
        angle_deg: 0.0,
        aspect_ratio: 1.0,
        pixel_density_ratio: 1.0,
        total_lines: 500,
        direction: SweepDirection::Up,
    }
}

fn fast_config() -> SequencerConfig {
    SequencerConfig {
        seconds_per_line: 0.01,
        min_segment_timeout: Duration::from_secs(2),
        settle_time: Duration::from_millis(1),
        measurement_timeout: Duration::from_secs(1),
        poll_interval: Duration::from_millis(5),
    }
}

fn fast_instrument() -> Arc<SimulatedInstrument> {
    Arc::new(
        SimulatedInstrument::new()
            .with_line_time(Duration::from_micros(200))
            .with_measurement_time(Duration::from_millis(1)),
    )
}

fn grid_schedule(nx: u32, ny: u32) -> Schedule {
    compute_grid(&test_frame(), nx, ny, 0.02)
        .unwrap()
        .into_schedule()
}

#[tokio::test]
async fn full_run_measures_every_point_and_consumes_every_line() {
    let instrument = fast_instrument();
    let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());

    let schedule = grid_schedule(3, 4);
    let report = sequencer.run(&schedule).await.unwrap();

    assert_eq!(report.points_measured, 12);
    assert_eq!(report.points_skipped, 0);
    assert_eq!(report.lines_scanned, 500);
    assert_eq!(report.segments_completed, schedule.segments.len());
    assert_eq!(sequencer.state().await, SequencerState::Idle);

    assert_eq!(instrument.measurements_taken(), 12);
    assert_eq!(instrument.lines_scanned(), 500);
    assert!(instrument.feedback_enabled());
    assert!(!instrument.is_scanning().await.unwrap());
}

#[tokio::test]
async fn scan_timeout_mid_run_ends_in_safe_shutdown_with_feedback_enabled() {
    let instrument = fast_instrument();
    // Third advance hangs: the run dies in the middle of the raster.
    instrument.hang_scan_advance_at(3);

    let config = SequencerConfig {
        min_segment_timeout: Duration::from_millis(100),
        seconds_per_line: 0.001,
        ..fast_config()
    };
    let sequencer = MeasurementSequencer::new(instrument.clone(), config);

    let err = sequencer.run(&grid_schedule(2, 5)).await.unwrap_err();
    assert!(matches!(err, AcqError::Timeout { .. }), "got {err:?}");

    assert_eq!(sequencer.state().await, SequencerState::SafeShutdown);
    assert!(instrument.feedback_enabled());
    // Abort stops the in-flight raster.
    assert!(!instrument.is_scanning().await.unwrap());
}

#[tokio::test]
async fn failed_probe_move_skips_the_point_and_continues() {
    let instrument = fast_instrument();
    instrument.fail_move_at(2);

    let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());
    let report = sequencer.run(&grid_schedule(3, 3)).await.unwrap();

    assert_eq!(report.points_measured, 8);
    assert_eq!(report.points_skipped, 1);
    assert_eq!(report.lines_scanned, 500);
    assert_eq!(sequencer.state().await, SequencerState::Idle);
    assert!(instrument.feedback_enabled());
}

#[tokio::test]
async fn failed_measurement_skips_the_point_but_resumes_feedback() {
    let instrument = fast_instrument();
    instrument.fail_measurement_at(1);

    let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());
    let report = sequencer.run(&grid_schedule(2, 2)).await.unwrap();

    assert_eq!(report.points_measured, 3);
    assert_eq!(report.points_skipped, 1);
    // The resume obligation ran even though the trigger failed.
    assert!(instrument.feedback_enabled());
}

#[tokio::test]
async fn feedback_control_failure_is_fatal() {
    let instrument = fast_instrument();
    instrument.fail_feedback_control();

    let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());
    let err = sequencer.run(&grid_schedule(2, 2)).await.unwrap_err();

    assert!(matches!(err, AcqError::DeviceUnavailable(_)), "got {err:?}");
    assert_eq!(sequencer.state().await, SequencerState::SafeShutdown);
}

#[tokio::test]
async fn abort_handle_cancels_the_run_and_restores_feedback() {
    let instrument = fast_instrument();
    let sequencer = Arc::new(MeasurementSequencer::new(instrument.clone(), fast_config()));
    let abort = sequencer.abort_handle();

    let schedule = grid_schedule(3, 10);
    let runner = {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move { sequencer.run(&schedule).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    abort.abort();

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, AcqError::Aborted(_)), "got {err:?}");
    assert_eq!(sequencer.state().await, SequencerState::SafeShutdown);
    assert!(instrument.feedback_enabled());
    assert!(!instrument.is_scanning().await.unwrap());
}

#[tokio::test]
async fn disconnect_during_run_aborts_safely() {
    let instrument = fast_instrument();
    let sequencer = Arc::new(MeasurementSequencer::new(instrument.clone(), fast_config()));

    let schedule = grid_schedule(2, 8);
    let runner = {
        let sequencer = Arc::clone(&sequencer);
        tokio::spawn(async move { sequencer.run(&schedule).await })
    };

    tokio::time::sleep(Duration::from_millis(20)).await;
    instrument.disconnect();

    let err = runner.await.unwrap().unwrap_err();
    assert!(matches!(err, AcqError::DeviceUnavailable(_)), "got {err:?}");
    assert_eq!(sequencer.state().await, SequencerState::SafeShutdown);
}

#[tokio::test]
async fn rerunning_the_same_schedule_repeats_the_run() {
    let schedule = grid_schedule(2, 3);

    let first = {
        let instrument = fast_instrument();
        let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());
        let report = sequencer.run(&schedule).await.unwrap();
        assert_eq!(instrument.lines_scanned(), 500);
        report
    };

    let second = {
        let instrument = fast_instrument();
        let sequencer = MeasurementSequencer::new(instrument.clone(), fast_config());
        sequencer.run(&schedule).await.unwrap()
    };

    assert_eq!(first, second);
}
