//! Composition root of the acquisition engine.
//!
//! The controller owns the bridge, the sequencer, and the script store, and
//! exposes the operations a frontend needs: read a frame snapshot, run a
//! global grid or a set of local areas, manage scripts, shut the instrument
//! down safely. It holds no scan geometry of its own — every run takes an
//! explicit [`ScanFrame`], so nothing stale can leak between calls.

use std::sync::Arc;

use tracing::{info, instrument};

use crate::bridge::{params, InstrumentBridge, ParamValue};
use crate::config::Settings;
use crate::distribution::DEFAULT_SAFETY_FRACTION;
use crate::error::AcqResult;
use crate::grid::compute_grid;
use crate::local_area::{compute_local_areas, LocalAreaSpec};
use crate::scan::{ScanFrame, SweepDirection};
use crate::scripts::ScriptStore;
use crate::sequencer::{AbortHandle, MeasurementSequencer, RunReport, SequencerState};

/// Orchestrates calculators, sequencer, bridge, and script store.
pub struct AcquisitionController {
    bridge: Arc<dyn InstrumentBridge>,
    sequencer: MeasurementSequencer,
    scripts: ScriptStore,
}

impl AcquisitionController {
    /// Build a controller over a bridge, opening the script store from the
    /// configured path.
    pub fn new(bridge: Arc<dyn InstrumentBridge>, settings: &Settings) -> AcqResult<Self> {
        let sequencer =
            MeasurementSequencer::new(Arc::clone(&bridge), (&settings.sequencer).into());
        let scripts = ScriptStore::open(&settings.scripts.path)?;
        Ok(Self {
            bridge,
            sequencer,
            scripts,
        })
    }

    /// Read the current frame snapshot from the instrument.
    pub async fn read_scan_frame(&self, direction: SweepDirection) -> AcqResult<ScanFrame> {
        ScanFrame::from_bridge(self.bridge.as_ref(), direction).await
    }

    /// Compute a global `nx` by `ny` grid over `frame` and execute it.
    #[instrument(skip(self, frame))]
    pub async fn run_grid(&self, frame: &ScanFrame, nx: u32, ny: u32) -> AcqResult<RunReport> {
        let layout = compute_grid(frame, nx, ny, DEFAULT_SAFETY_FRACTION)?;
        let schedule = layout.into_schedule();
        info!(
            points = schedule.total_points(),
            lines = schedule.total_lines(),
            "grid schedule computed"
        );
        self.sequencer.run(&schedule).await
    }

    /// Compute the merged schedule for `areas` over `frame` and execute it.
    #[instrument(skip(self, frame, areas), fields(areas = areas.len()))]
    pub async fn run_local_areas(
        &self,
        frame: &ScanFrame,
        areas: &[LocalAreaSpec],
    ) -> AcqResult<RunReport> {
        let result = compute_local_areas(frame, areas)?;
        info!(
            points = result.schedule.total_points(),
            groups = result.schedule.segments.len() - 1,
            "local-area schedule computed"
        );
        self.sequencer.run(&result.schedule).await
    }

    /// Handle that cancels the running schedule.
    pub fn abort_handle(&self) -> AbortHandle {
        self.sequencer.abort_handle()
    }

    /// Last observed sequencer state.
    pub async fn sequencer_state(&self) -> SequencerState {
        self.sequencer.state().await
    }

    /// Stored measurement scripts.
    pub fn scripts(&self) -> &ScriptStore {
        &self.scripts
    }

    /// Mutable access to the script store.
    pub fn scripts_mut(&mut self) -> &mut ScriptStore {
        &mut self.scripts
    }

    /// Stop scanning and leave the feedback loop enabled.
    ///
    /// Safe to call at any time, including after a failed run.
    pub async fn safe_shutdown(&self) -> AcqResult<()> {
        self.bridge
            .set_scan_parameter(params::SCAN, ParamValue::Bool(false))
            .await?;
        self.bridge.set_feedback_enabled(true).await?;
        info!("instrument shut down safely");
        Ok(())
    }
}
