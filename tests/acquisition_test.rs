//! End-to-end tests of the acquisition controller: frame snapshot read-back
//! through the bridge, grid and local-area runs over the simulated
//! instrument, script persistence, and configuration loading.

use std::sync::Arc;
use std::time::Duration;

use tempfile::tempdir;

use spm_daq::bridge::mock::SimulatedInstrument;
use spm_daq::bridge::{params, InstrumentBridge};
use spm_daq::config::Settings;
use spm_daq::controller::AcquisitionController;
use spm_daq::geometry::Point;
use spm_daq::local_area::{AreaOrigin, LocalAreaSpec};
use spm_daq::scan::SweepDirection;
use spm_daq::scripts::MeasurementScript;
use spm_daq::sequencer::SequencerState;

fn fast_settings(scripts_dir: &std::path::Path) -> Settings {
    let mut settings = Settings::default();
    settings.sequencer.seconds_per_line = 0.01;
    settings.sequencer.min_segment_timeout = Duration::from_secs(2);
    settings.sequencer.settle_time = Duration::from_millis(1);
    settings.sequencer.measurement_timeout = Duration::from_secs(1);
    settings.sequencer.poll_interval = Duration::from_millis(5);
    settings.scripts.path = scripts_dir.join("scripts.json");
    settings
}

fn fast_instrument() -> Arc<SimulatedInstrument> {
    Arc::new(
        SimulatedInstrument::new()
            .with_line_time(Duration::from_micros(200))
            .with_measurement_time(Duration::from_millis(1)),
    )
}

#[tokio::test]
async fn frame_snapshot_reflects_instrument_registers() {
    let instrument = fast_instrument();
    instrument.set_register(params::X, 250.0);
    instrument.set_register(params::Y, -120.0);
    instrument.set_register(params::RANGE, 300.0);
    instrument.set_register(params::ANGLE, 30.0);
    instrument.set_register(params::PIXEL, 256.0);

    let dir = tempdir().unwrap();
    let controller =
        AcquisitionController::new(instrument, &fast_settings(dir.path())).unwrap();

    let frame = controller.read_scan_frame(SweepDirection::Up).await.unwrap();
    assert!((frame.center.x - 250.0).abs() < 1e-2);
    assert!((frame.center.y + 120.0).abs() < 1e-2);
    assert!((frame.range - 300.0).abs() < 1e-2);
    assert!((frame.angle_deg - 30.0).abs() < 1e-2);
    assert_eq!(frame.total_lines, 256);
    assert_eq!(frame.direction, SweepDirection::Up);
}

#[tokio::test]
async fn grid_acquisition_runs_end_to_end() {
    let instrument = fast_instrument();
    let dir = tempdir().unwrap();
    let controller =
        AcquisitionController::new(instrument.clone(), &fast_settings(dir.path())).unwrap();

    let frame = controller.read_scan_frame(SweepDirection::Up).await.unwrap();
    let report = controller.run_grid(&frame, 3, 3).await.unwrap();

    assert_eq!(report.points_measured, 9);
    assert_eq!(report.lines_scanned, u64::from(frame.total_lines));
    assert_eq!(controller.sequencer_state().await, SequencerState::Idle);
    assert!(instrument.feedback_enabled());
}

#[tokio::test]
async fn local_area_acquisition_visits_every_area_point() {
    let instrument = fast_instrument();
    let dir = tempdir().unwrap();
    let controller =
        AcquisitionController::new(instrument.clone(), &fast_settings(dir.path())).unwrap();

    let frame = controller.read_scan_frame(SweepDirection::Up).await.unwrap();
    let areas = [
        LocalAreaSpec {
            origin: AreaOrigin::Absolute(Point::new(-150.0, -150.0)),
            dx: 10.0,
            dy: 10.0,
            nx: 3,
            ny: 3,
            sweep: SweepDirection::Up,
            start_from: SweepDirection::Up,
        },
        LocalAreaSpec {
            origin: AreaOrigin::Offset { dx: 100.0, dy: 100.0 },
            dx: 5.0,
            dy: 5.0,
            nx: 2,
            ny: 2,
            sweep: SweepDirection::Up,
            start_from: SweepDirection::Up,
        },
    ];

    let report = controller.run_local_areas(&frame, &areas).await.unwrap();
    assert_eq!(report.points_measured, 13);
    assert_eq!(report.points_skipped, 0);
    assert_eq!(report.lines_scanned, u64::from(frame.total_lines));
    assert_eq!(instrument.measurements_taken(), 13);
}

#[tokio::test]
async fn safe_shutdown_stops_scanning_and_enables_feedback() {
    let instrument = fast_instrument();
    let dir = tempdir().unwrap();
    let controller =
        AcquisitionController::new(instrument.clone(), &fast_settings(dir.path())).unwrap();

    instrument.advance_scan_lines(1000).await.unwrap();
    instrument.set_feedback_enabled(false).await.unwrap();

    controller.safe_shutdown().await.unwrap();
    assert!(!instrument.is_scanning().await.unwrap());
    assert!(instrument.feedback_enabled());
}

#[tokio::test]
async fn scripts_persist_across_controller_instances() {
    let instrument = fast_instrument();
    let dir = tempdir().unwrap();
    let settings = fast_settings(dir.path());

    {
        let mut controller =
            AcquisitionController::new(instrument.clone(), &settings).unwrap();
        controller
            .scripts_mut()
            .save_script(MeasurementScript::new(
                "transfer_curve",
                vec![-0.5, 0.0, 0.5],
                vec![1.0, 1.0, 1.0],
            ))
            .unwrap();
    }

    let controller = AcquisitionController::new(instrument, &settings).unwrap();
    let script = controller.scripts().get("transfer_curve").unwrap();
    assert_eq!(script.bias_list_a, vec![-0.5, 0.0, 0.5]);
}

#[test]
fn settings_file_overrides_defaults() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("test.toml");
    std::fs::write(
        &path,
        r#"
[application]
log_level = "debug"

[sequencer]
seconds_per_line = 4.0
poll_interval = "250ms"
"#,
    )
    .unwrap();

    let settings = Settings::load_from(&path).unwrap();
    assert_eq!(settings.application.log_level, "debug");
    assert_eq!(settings.sequencer.seconds_per_line, 4.0);
    assert_eq!(settings.sequencer.poll_interval, Duration::from_millis(250));
    // Untouched sections keep their defaults.
    assert_eq!(settings.instrument.retry_attempts, 3);
    assert!(settings.validate().is_ok());
}
