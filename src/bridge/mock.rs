//! Simulated instrument for tests and the demo binary.
//!
//! `SimulatedInstrument` keeps a register map and scan/feedback/probe state
//! in memory, answers the bridge primitives with realistic-but-fast timing
//! (`tokio::time::sleep`, never blocking the runtime), emits the same events
//! a live instrument would, and can inject the failure modes the sequencer
//! has to survive: a scan advance that never finishes, a rejected probe
//! move, parameter writes that need retries, and a dropped connection.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::broadcast;
use tokio::time::sleep;
use tracing::{debug, warn};

use crate::bridge::{params, InstrumentBridge, InstrumentEvent, ParamValue, SetVerifyPolicy};
use crate::error::{AcqError, AcqResult};

const EVENT_CAPACITY: usize = 64;

/// In-memory instrument with configurable timing and fault injection.
pub struct SimulatedInstrument {
    registers: RwLock<HashMap<String, f64>>,
    feedback_enabled: AtomicBool,
    probe: Mutex<(f64, f64)>,
    scanning: Arc<AtomicBool>,
    line_counter: Arc<AtomicU32>,
    events: broadcast::Sender<InstrumentEvent>,
    policy: SetVerifyPolicy,
    line_time: Duration,
    measurement_time: Duration,
    measurements_taken: AtomicU32,
    move_count: AtomicU32,

    // Fault injection, all off by default.
    hang_scan_advance_at: AtomicU32,
    advance_count: AtomicU32,
    fail_move_at: AtomicU32,
    fail_measurement_at: AtomicU32,
    reject_parameter_writes: AtomicU32,
    fail_feedback: AtomicBool,
    disconnected: AtomicBool,
}

impl SimulatedInstrument {
    /// Create an instrument with a 500 nm, 500-line unrotated frame and fast
    /// simulated timing.
    pub fn new() -> Self {
        let mut registers = HashMap::new();
        registers.insert(params::X.to_string(), 0.0);
        registers.insert(params::Y.to_string(), 0.0);
        registers.insert(params::RANGE.to_string(), 500.0);
        registers.insert(params::ANGLE.to_string(), 0.0);
        registers.insert(params::PIXEL.to_string(), 500.0);
        registers.insert(params::PIXEL_DENSITY.to_string(), 1.0);
        registers.insert(params::ASPECT_RATIO.to_string(), 1.0);
        registers.insert(params::SPEED.to_string(), 2.0);

        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            registers: RwLock::new(registers),
            feedback_enabled: AtomicBool::new(true),
            probe: Mutex::new((0.0, 0.0)),
            scanning: Arc::new(AtomicBool::new(false)),
            line_counter: Arc::new(AtomicU32::new(0)),
            events,
            policy: SetVerifyPolicy::default(),
            line_time: Duration::from_millis(2),
            measurement_time: Duration::from_millis(2),
            measurements_taken: AtomicU32::new(0),
            move_count: AtomicU32::new(0),
            hang_scan_advance_at: AtomicU32::new(0),
            advance_count: AtomicU32::new(0),
            fail_move_at: AtomicU32::new(0),
            fail_measurement_at: AtomicU32::new(0),
            reject_parameter_writes: AtomicU32::new(0),
            fail_feedback: AtomicBool::new(false),
            disconnected: AtomicBool::new(false),
        }
    }

    /// Override the simulated time per raster line.
    pub fn with_line_time(mut self, line_time: Duration) -> Self {
        self.line_time = line_time;
        self
    }

    /// Override the simulated point-measurement duration.
    pub fn with_measurement_time(mut self, measurement_time: Duration) -> Self {
        self.measurement_time = measurement_time;
        self
    }

    /// Override the parameter set/verify policy.
    pub fn with_policy(mut self, policy: SetVerifyPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Directly seed a register, bypassing verification.
    pub fn set_register(&self, name: &str, value: f64) {
        if let Ok(mut registers) = self.registers.write() {
            registers.insert(name.to_string(), value);
        }
    }

    /// Make the `nth` scan advance of the run (1-based) start but never
    /// finish.
    pub fn hang_scan_advance_at(&self, nth: u32) {
        self.hang_scan_advance_at.store(nth, Ordering::SeqCst);
    }

    /// Reject the `nth` probe move of the run (1-based).
    pub fn fail_move_at(&self, nth: u32) {
        self.fail_move_at.store(nth, Ordering::SeqCst);
    }

    /// Fail the `nth` point measurement of the run (1-based).
    pub fn fail_measurement_at(&self, nth: u32) {
        self.fail_measurement_at.store(nth, Ordering::SeqCst);
    }

    /// Drop the next `n` parameter writes before they take effect, forcing
    /// the set/verify loop to retry.
    pub fn reject_next_parameter_writes(&self, n: u32) {
        self.reject_parameter_writes.store(n, Ordering::SeqCst);
    }

    /// Make feedback-loop control fail until cleared.
    pub fn fail_feedback_control(&self) {
        self.fail_feedback.store(true, Ordering::SeqCst);
    }

    /// Simulate a dropped connection: every subsequent call fails.
    pub fn disconnect(&self) {
        self.disconnected.store(true, Ordering::SeqCst);
    }

    /// Current feedback state, for assertions.
    pub fn feedback_enabled(&self) -> bool {
        self.feedback_enabled.load(Ordering::SeqCst)
    }

    /// Completed point measurements, for assertions.
    pub fn measurements_taken(&self) -> u32 {
        self.measurements_taken.load(Ordering::SeqCst)
    }

    /// Raster lines consumed so far, for assertions.
    pub fn lines_scanned(&self) -> u32 {
        self.line_counter.load(Ordering::SeqCst)
    }

    /// Last commanded probe position, for assertions.
    pub fn probe_position(&self) -> (f64, f64) {
        self.probe.lock().map(|p| *p).unwrap_or((f64::NAN, f64::NAN))
    }

    fn check_connected(&self) -> AcqResult<()> {
        if self.disconnected.load(Ordering::SeqCst) {
            return Err(AcqError::DeviceUnavailable(
                "instrument link dropped".into(),
            ));
        }
        Ok(())
    }

    fn read_register(&self, name: &str) -> AcqResult<f64> {
        let registers = self
            .registers
            .read()
            .map_err(|_| AcqError::DeviceUnavailable("register map poisoned".into()))?;
        registers
            .get(name)
            .copied()
            .ok_or_else(|| AcqError::DeviceUnavailable(format!("unknown parameter '{name}'")))
    }

    /// Register read-back as a real channel would report it: floats carry a
    /// little noise, well below the verification tolerance.
    fn read_with_jitter(&self, name: &str) -> AcqResult<f64> {
        let value = self.read_register(name)?;
        let jitter_span = self.policy.tolerance_for(name) / 4.0;
        let jitter = rand::thread_rng().gen_range(-jitter_span..jitter_span);
        Ok(value + jitter)
    }
}

impl Default for SimulatedInstrument {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl InstrumentBridge for SimulatedInstrument {
    async fn get_scan_parameter(&self, name: &str) -> AcqResult<ParamValue> {
        self.check_connected()?;
        match name {
            params::SCAN => Ok(ParamValue::Bool(self.scanning.load(Ordering::SeqCst))),
            params::LINE_NR => Ok(ParamValue::Int(i64::from(
                self.line_counter.load(Ordering::SeqCst),
            ))),
            _ => Ok(ParamValue::Float(self.read_with_jitter(name)?)),
        }
    }

    async fn set_scan_parameter(&self, name: &str, value: ParamValue) -> AcqResult<()> {
        self.check_connected()?;

        let mut last_read = f64::NAN;
        for attempt in 1..=self.policy.attempts {
            let dropped = self
                .reject_parameter_writes
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if dropped {
                debug!(parameter = name, attempt, "parameter write dropped");
            } else if name == params::SCAN {
                let on = value.as_bool().unwrap_or(value.as_f64() != 0.0);
                let was = self.scanning.swap(on, Ordering::SeqCst);
                if was != on {
                    let _ = self.events.send(if on {
                        InstrumentEvent::ScanStarted
                    } else {
                        InstrumentEvent::ScanStopped
                    });
                }
                return Ok(());
            } else {
                self.set_register(name, value.as_f64());
            }

            last_read = self.read_with_jitter(name).unwrap_or(f64::NAN);
            if self
                .policy
                .verified(name, value, ParamValue::Float(last_read))
            {
                return Ok(());
            }

            warn!(
                parameter = name,
                attempt,
                requested = value.as_f64(),
                actual = last_read,
                "parameter verification failed, retrying"
            );
            sleep(self.policy.backoff).await;
        }

        Err(AcqError::VerificationMismatch {
            parameter: name.to_string(),
            requested: value.as_f64(),
            actual: last_read,
        })
    }

    async fn advance_scan_lines(&self, lines: u32) -> AcqResult<()> {
        self.check_connected()?;

        self.scanning.store(true, Ordering::SeqCst);
        let _ = self.events.send(InstrumentEvent::ScanStarted);

        let count = self.advance_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.hang_scan_advance_at.load(Ordering::SeqCst) == count {
            // Raster claims to be running but never consumes its lines; the
            // caller's timeout is the only way out.
            return Ok(());
        }

        let scanning = Arc::clone(&self.scanning);
        let line_counter = Arc::clone(&self.line_counter);
        let events = self.events.clone();
        let line_time = self.line_time;
        tokio::spawn(async move {
            sleep(line_time * lines).await;
            line_counter.fetch_add(lines, Ordering::SeqCst);
            scanning.store(false, Ordering::SeqCst);
            let _ = events.send(InstrumentEvent::ScanStopped);
        });
        Ok(())
    }

    async fn set_feedback_enabled(&self, enabled: bool) -> AcqResult<()> {
        self.check_connected()?;
        if self.fail_feedback.load(Ordering::SeqCst) {
            return Err(AcqError::DeviceUnavailable(
                "feedback controller not responding".into(),
            ));
        }
        self.feedback_enabled.store(enabled, Ordering::SeqCst);
        Ok(())
    }

    async fn move_probe(&self, x: f64, y: f64) -> AcqResult<()> {
        self.check_connected()?;
        let count = self.move_count.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_move_at.load(Ordering::SeqCst) == count {
            return Err(AcqError::DeviceUnavailable(
                "probe positioning rejected".into(),
            ));
        }
        sleep(Duration::from_millis(1)).await;
        if let Ok(mut probe) = self.probe.lock() {
            *probe = (x, y);
        }
        Ok(())
    }

    async fn trigger_point_measurement(&self) -> AcqResult<()> {
        self.check_connected()?;
        let count = self.measurements_taken.load(Ordering::SeqCst) + 1;
        if self.fail_measurement_at.load(Ordering::SeqCst) == count {
            return Err(AcqError::Timeout {
                operation: "trigger_point_measurement".into(),
                waited: self.measurement_time,
            });
        }
        sleep(self.measurement_time).await;
        let done = self.measurements_taken.fetch_add(1, Ordering::SeqCst) + 1;
        let _ = self.events.send(InstrumentEvent::MeasurementSaved {
            file: format!("spect{done:04}.dat"),
        });
        Ok(())
    }

    async fn is_scanning(&self) -> AcqResult<bool> {
        self.check_connected()?;
        Ok(self.scanning.load(Ordering::SeqCst))
    }

    fn events(&self) -> broadcast::Receiver<InstrumentEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parameter_writes_verify_within_tolerance() {
        let instrument = SimulatedInstrument::new();
        instrument
            .set_scan_parameter(params::RANGE, ParamValue::Float(250.0))
            .await
            .unwrap();
        let value = instrument
            .get_scan_parameter(params::RANGE)
            .await
            .unwrap()
            .as_f64();
        assert!((value - 250.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn rejected_writes_are_retried_then_succeed() {
        let instrument = SimulatedInstrument::new();
        instrument.reject_next_parameter_writes(2);
        instrument
            .set_scan_parameter(params::X, ParamValue::Float(42.0))
            .await
            .unwrap();
        let value = instrument.get_scan_parameter(params::X).await.unwrap().as_f64();
        assert!((value - 42.0).abs() < 1e-3);
    }

    #[tokio::test]
    async fn persistent_rejection_exhausts_retries() {
        let instrument = SimulatedInstrument::new();
        instrument.reject_next_parameter_writes(10);
        let err = instrument
            .set_scan_parameter(params::X, ParamValue::Float(42.0))
            .await
            .unwrap_err();
        assert!(matches!(err, AcqError::VerificationMismatch { .. }));
    }

    #[tokio::test]
    async fn scan_advance_consumes_lines_and_stops() {
        let instrument =
            SimulatedInstrument::new().with_line_time(Duration::from_micros(100));
        let mut events = instrument.events();

        instrument.advance_scan_lines(20).await.unwrap();
        assert!(instrument.is_scanning().await.unwrap());

        loop {
            match events.recv().await.unwrap() {
                InstrumentEvent::ScanStopped => break,
                _ => continue,
            }
        }
        assert!(!instrument.is_scanning().await.unwrap());
        assert_eq!(instrument.lines_scanned(), 20);
    }

    #[tokio::test]
    async fn hung_advance_reports_scanning_forever() {
        let instrument =
            SimulatedInstrument::new().with_line_time(Duration::from_micros(100));
        instrument.hang_scan_advance_at(1);
        instrument.advance_scan_lines(5).await.unwrap();
        sleep(Duration::from_millis(10)).await;
        assert!(instrument.is_scanning().await.unwrap());
        assert_eq!(instrument.lines_scanned(), 0);
    }

    #[tokio::test]
    async fn disconnect_fails_every_call() {
        let instrument = SimulatedInstrument::new();
        instrument.disconnect();
        assert!(instrument.is_scanning().await.is_err());
        assert!(instrument.move_probe(0.0, 0.0).await.is_err());
        assert!(instrument
            .get_scan_parameter(params::RANGE)
            .await
            .is_err());
    }
}
