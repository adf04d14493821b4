//! Measurement sequencer: the state machine that executes a schedule.
//!
//! The sequencer walks a [`Schedule`] segment by segment, alternating
//! between advancing the raster (`ScanningSegment`) and visiting a group of
//! measurement points while the raster is paused (`AtMeasurementPoint`).
//!
//! # State Machine
//!
//! ```text
//! ┌──────┐  run()   ┌─────────────────┐  lines consumed  ┌────────────────────┐
//! │ Idle │─────────▶│ ScanningSegment │─────────────────▶│ AtMeasurementPoint │
//! └──────┘          └─────────────────┘                  └─────────┬──────────┘
//!    ▲                      ▲          next segment                │
//!    │                      └───────────────────────────────────────┘
//!    │  schedule done                                 fatal error / abort
//!    └───────────────                                        ▼
//!                                               ┌──────────┐   ┌──────────────┐
//!                                               │ Aborting │──▶│ SafeShutdown │
//!                                               └──────────┘   └──────────────┘
//! ```
//!
//! Error severity depends on where a bridge call fails: a probe move or
//! measurement trigger failure skips that one point (the run degrades but
//! continues), while scan-line advancement and feedback-loop control
//! failures abort the run — those risk leaving the raster or the probe in a
//! damaging state. Every abort path stops in-flight scanning and restores
//! feedback to enabled before the error is surfaced, so the servo is never
//! left disabled.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, watch, RwLock};
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, warn};

use crate::bridge::{params, InstrumentBridge, InstrumentEvent, ParamValue};
use crate::error::{AcqError, AcqResult};
use crate::schedule::{MeasurementPoint, Schedule};

/// Execution state of one measurement run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    /// No run in progress.
    Idle,
    /// Advancing raster lines and waiting for them to be consumed.
    ScanningSegment,
    /// Raster paused, probe visiting a measurement group.
    AtMeasurementPoint,
    /// A fatal error or cancellation is being handled.
    Aborting,
    /// Terminal state after an abort: scanning stopped, feedback restored.
    SafeShutdown,
}

impl std::fmt::Display for SequencerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequencerState::Idle => write!(f, "idle"),
            SequencerState::ScanningSegment => write!(f, "scanning segment"),
            SequencerState::AtMeasurementPoint => write!(f, "at measurement point"),
            SequencerState::Aborting => write!(f, "aborting"),
            SequencerState::SafeShutdown => write!(f, "safe shutdown"),
        }
    }
}

/// Timing knobs of the sequencer.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Worst-case seconds allowed per raster line when waiting for a segment.
    pub seconds_per_line: f64,
    /// Lower bound on the per-segment wait, for very short segments.
    pub min_segment_timeout: Duration,
    /// Settle delay after a probe move before suspending feedback.
    pub settle_time: Duration,
    /// Deadline for one point measurement.
    pub measurement_timeout: Duration,
    /// Scan-state poll period while waiting for a segment.
    pub poll_interval: Duration,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            seconds_per_line: 2.0,
            min_segment_timeout: Duration::from_secs(10),
            settle_time: Duration::from_millis(500),
            measurement_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(100),
        }
    }
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Segments fully executed.
    pub segments_completed: usize,
    /// Points measured successfully.
    pub points_measured: usize,
    /// Points skipped after a per-point failure.
    pub points_skipped: usize,
    /// Raster lines consumed.
    pub lines_scanned: u64,
}

/// Cancels the run it was taken from; checked at every suspension point.
#[derive(Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Request cancellation. Safe to call more than once.
    pub fn abort(&self) {
        let _ = self.tx.send(true);
    }
}

enum PointOutcome {
    Measured,
    Skipped,
}

/// Drives an [`InstrumentBridge`] through one schedule at a time.
///
/// The probe and feedback loop are exclusive single-writer resources: the
/// caller must not start two runs against one instrument concurrently.
/// Re-running the same schedule against a fresh instrument produces the same
/// movement sequence; the sequencer carries no state between runs beyond the
/// last observed [`SequencerState`].
pub struct MeasurementSequencer {
    bridge: Arc<dyn InstrumentBridge>,
    config: SequencerConfig,
    state: RwLock<SequencerState>,
    abort_tx: Arc<watch::Sender<bool>>,
}

impl MeasurementSequencer {
    /// Create a sequencer over a bridge.
    pub fn new(bridge: Arc<dyn InstrumentBridge>, config: SequencerConfig) -> Self {
        let (abort_tx, _) = watch::channel(false);
        Self {
            bridge,
            config,
            state: RwLock::new(SequencerState::Idle),
            abort_tx: Arc::new(abort_tx),
        }
    }

    /// Handle that cancels the current (or next) run.
    pub fn abort_handle(&self) -> AbortHandle {
        AbortHandle {
            tx: Arc::clone(&self.abort_tx),
        }
    }

    /// Last observed state.
    pub async fn state(&self) -> SequencerState {
        *self.state.read().await
    }

    /// Execute a schedule to completion.
    ///
    /// On success the sequencer returns to `Idle` and reports what it did.
    /// On a fatal error or cancellation it stops in-flight scanning,
    /// restores feedback, parks in `SafeShutdown`, and returns the error.
    pub async fn run(&self, schedule: &Schedule) -> AcqResult<RunReport> {
        self.abort_tx.send_replace(false);
        let mut abort_rx = self.abort_tx.subscribe();
        let mut report = RunReport::default();

        info!(
            segments = schedule.segments.len(),
            points = schedule.total_points(),
            lines = schedule.total_lines(),
            "starting measurement run"
        );

        for (index, segment) in schedule.segments.iter().enumerate() {
            self.set_state(SequencerState::ScanningSegment).await;
            if segment.lines_to_scan > 0 {
                if let Err(err) = self.scan_segment(segment.lines_to_scan, &mut abort_rx).await {
                    return self.abort_run(err).await;
                }
                report.lines_scanned += u64::from(segment.lines_to_scan);
            }

            if !segment.points.is_empty() {
                self.set_state(SequencerState::AtMeasurementPoint).await;
                debug!(
                    segment = index,
                    points = segment.points.len(),
                    "visiting measurement group"
                );
                if let Err(err) = self
                    .measure_group(&segment.points, &mut abort_rx, &mut report)
                    .await
                {
                    return self.abort_run(err).await;
                }
            }

            report.segments_completed += 1;
        }

        self.set_state(SequencerState::Idle).await;
        info!(
            measured = report.points_measured,
            skipped = report.points_skipped,
            lines = report.lines_scanned,
            "measurement run complete"
        );
        Ok(report)
    }

    async fn set_state(&self, state: SequencerState) {
        let mut current = self.state.write().await;
        if *current != state {
            debug!(from = %*current, to = %state, "sequencer state change");
            *current = state;
        }
    }

    fn segment_timeout(&self, lines: u32) -> Duration {
        Duration::from_secs_f64(self.config.seconds_per_line * f64::from(lines))
            .max(self.config.min_segment_timeout)
    }

    /// Advance `lines` raster lines and wait for the raster to pause again.
    ///
    /// Any failure here is fatal to the run: a segment that never finishes
    /// cannot be resumed, because the raster position is no longer known.
    async fn scan_segment(
        &self,
        lines: u32,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> AcqResult<()> {
        if *abort_rx.borrow() {
            return Err(abort_error());
        }

        // Subscribe before issuing the command so a fast completion cannot
        // slip between the two.
        let mut events = self.bridge.events();
        self.bridge.advance_scan_lines(lines).await?;

        let wait = self.segment_timeout(lines);
        debug!(lines, timeout = ?wait, "waiting for scan segment");
        timeout(wait, self.wait_scan_idle(&mut events, abort_rx))
            .await
            .map_err(|_| AcqError::Timeout {
                operation: format!("advance_scan_lines({lines})"),
                waited: wait,
            })?
    }

    async fn wait_scan_idle(
        &self,
        events: &mut broadcast::Receiver<InstrumentEvent>,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> AcqResult<()> {
        loop {
            tokio::select! {
                changed = abort_rx.changed() => {
                    if changed.is_err() || *abort_rx.borrow() {
                        return Err(abort_error());
                    }
                }
                event = events.recv() => match event {
                    Ok(InstrumentEvent::ScanStopped) => {
                        if !self.bridge.is_scanning().await? {
                            return Ok(());
                        }
                    }
                    Ok(_) => {}
                    Err(_) => {
                        // Lagged or closed channel: fall back to polling.
                        sleep(self.config.poll_interval).await;
                        if !self.bridge.is_scanning().await? {
                            return Ok(());
                        }
                    }
                },
                _ = sleep(self.config.poll_interval) => {
                    if !self.bridge.is_scanning().await? {
                        return Ok(());
                    }
                }
            }
        }
    }

    async fn measure_group(
        &self,
        points: &[MeasurementPoint],
        abort_rx: &mut watch::Receiver<bool>,
        report: &mut RunReport,
    ) -> AcqResult<()> {
        for point in points {
            if *abort_rx.borrow() {
                return Err(abort_error());
            }
            match self.measure_point(point, abort_rx).await? {
                PointOutcome::Measured => report.points_measured += 1,
                PointOutcome::Skipped => report.points_skipped += 1,
            }
        }
        Ok(())
    }

    /// Visit one point: move, suspend feedback, measure, resume feedback.
    ///
    /// Move and trigger failures skip the point; feedback-control failures
    /// and cancellation propagate as fatal. The resume call runs no matter
    /// how the measurement went, so the servo is never left disabled by a
    /// failed point.
    async fn measure_point(
        &self,
        point: &MeasurementPoint,
        abort_rx: &mut watch::Receiver<bool>,
    ) -> AcqResult<PointOutcome> {
        if let Err(err) = self.bridge.move_probe(point.x, point.y).await {
            warn!(
                group = point.group,
                index = point.index_in_group,
                %err,
                "probe move failed, skipping point"
            );
            return Ok(PointOutcome::Skipped);
        }
        sleep(self.config.settle_time).await;

        self.bridge.set_feedback_enabled(false).await?;

        let measured = tokio::select! {
            result = timeout(
                self.config.measurement_timeout,
                self.bridge.trigger_point_measurement(),
            ) => match result {
                Ok(inner) => inner,
                Err(_) => Err(AcqError::Timeout {
                    operation: "trigger_point_measurement".into(),
                    waited: self.config.measurement_timeout,
                }),
            },
            () = wait_abort(abort_rx) => Err(abort_error()),
        };

        let resumed = self.bridge.set_feedback_enabled(true).await;
        resumed?;

        match measured {
            Ok(()) => Ok(PointOutcome::Measured),
            Err(err @ AcqError::Aborted(_)) => Err(err),
            Err(err) => {
                warn!(
                    group = point.group,
                    index = point.index_in_group,
                    %err,
                    "point measurement failed, skipping point"
                );
                Ok(PointOutcome::Skipped)
            }
        }
    }

    /// Terminal path: stop scanning, restore feedback, park in `SafeShutdown`.
    async fn abort_run(&self, err: AcqError) -> AcqResult<RunReport> {
        self.set_state(SequencerState::Aborting).await;
        error!(%err, "aborting measurement run");

        if let Err(stop_err) = self
            .bridge
            .set_scan_parameter(params::SCAN, ParamValue::Bool(false))
            .await
        {
            warn!(%stop_err, "could not stop in-flight scanning during abort");
        }
        match self.bridge.set_feedback_enabled(true).await {
            Ok(()) => info!("feedback re-enabled during shutdown"),
            Err(feedback_err) => error!(
                %feedback_err,
                "feedback could not be re-enabled, instrument needs manual attention"
            ),
        }

        self.set_state(SequencerState::SafeShutdown).await;
        Err(err)
    }
}

fn abort_error() -> AcqError {
    AcqError::Aborted("cancellation requested".into())
}

/// Resolves once the abort flag is raised; pends forever otherwise.
async fn wait_abort(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            // Sender gone: nobody can abort anymore.
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_timeout_scales_with_lines_but_has_a_floor() {
        let sequencer = MeasurementSequencer::new(
            Arc::new(crate::bridge::mock::SimulatedInstrument::new()),
            SequencerConfig::default(),
        );
        assert_eq!(sequencer.segment_timeout(100), Duration::from_secs(200));
        assert_eq!(sequencer.segment_timeout(1), Duration::from_secs(10));
    }

    #[test]
    fn state_display_names() {
        assert_eq!(SequencerState::Idle.to_string(), "idle");
        assert_eq!(SequencerState::SafeShutdown.to_string(), "safe shutdown");
    }

    #[tokio::test]
    async fn fresh_sequencer_is_idle() {
        let sequencer = MeasurementSequencer::new(
            Arc::new(crate::bridge::mock::SimulatedInstrument::new()),
            SequencerConfig::default(),
        );
        assert_eq!(sequencer.state().await, SequencerState::Idle);
    }
}
