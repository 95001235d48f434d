// Per-axis calibration state machine
//
// Drives one axis through the ordered calibration steps: request the
// step's state on the device, then sample current_state at a fixed
// interval until the device reports Idle again (step finished) or an
// error mask turns non-zero (axis faulted). The device offers no push
// notification, so polling is the contract; the interval and a
// wall-clock bound per step are configurable.

use serde::Serialize;
use std::fmt;
use tokio::time::{Instant, sleep};
use tracing::{info, warn};

use crate::config::{CalibrationConfig, CalibrationMode};
use crate::device::{AxisHandle, AxisState, BusError, DeviceBus};
use crate::errors::AxisErrors;
use crate::report::{AxisOutcome, FaultReason};

/// Ordered calibration steps. Step N+1 never starts unless step N
/// completed with no error bits set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationStep {
    EncoderIndexSearch,
    EncoderOffsetCalibration,
}

impl CalibrationStep {
    /// Steps a run performs, in order, for the selected mode.
    pub fn for_mode(mode: CalibrationMode) -> &'static [CalibrationStep] {
        match mode {
            CalibrationMode::Full => &[
                CalibrationStep::EncoderIndexSearch,
                CalibrationStep::EncoderOffsetCalibration,
            ],
            CalibrationMode::IndexOnly => &[CalibrationStep::EncoderIndexSearch],
        }
    }

    fn axis_state(self) -> AxisState {
        match self {
            CalibrationStep::EncoderIndexSearch => AxisState::EncoderIndexSearch,
            CalibrationStep::EncoderOffsetCalibration => AxisState::EncoderOffsetCalibration,
        }
    }

    fn running_state(self) -> SequencerState {
        match self {
            CalibrationStep::EncoderIndexSearch => SequencerState::IndexSearching,
            CalibrationStep::EncoderOffsetCalibration => SequencerState::OffsetCalibrating,
        }
    }
}

impl fmt::Display for CalibrationStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationStep::EncoderIndexSearch => write!(f, "encoder index search"),
            CalibrationStep::EncoderOffsetCalibration => write!(f, "encoder offset calibration"),
        }
    }
}

/// Sequencer states. `Faulted` is absorbing and reachable from any
/// non-terminal state; `Calibrated` is terminal-success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerState {
    Idle,
    IndexSearching,
    OffsetCalibrating,
    Calibrated,
    Faulted,
}

/// How one polling wait ended
enum StepWait {
    Completed,
    Errors(AxisErrors),
    TimedOut,
    Cancelled,
    Lost(BusError),
}

/// Run-level cooperative cancellation, checked between poll iterations.
/// In-flight remote calls are never forcibly interrupted.
#[derive(Clone, Default)]
pub struct CancelFlag(std::sync::Arc<std::sync::atomic::AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(std::sync::atomic::Ordering::Relaxed)
    }
}

/// Drives one axis through the calibration steps of the configured mode.
pub struct CalibrationSequencer<'a, B: DeviceBus> {
    label: &'a str,
    axis: &'a AxisHandle<B>,
    config: &'a CalibrationConfig,
    cancel: &'a CancelFlag,
    state: SequencerState,
}

impl<'a, B: DeviceBus> CalibrationSequencer<'a, B> {
    pub fn new(
        label: &'a str,
        axis: &'a AxisHandle<B>,
        config: &'a CalibrationConfig,
        cancel: &'a CancelFlag,
    ) -> Self {
        Self {
            label,
            axis,
            config,
            cancel,
            state: SequencerState::Idle,
        }
    }

    pub fn state(&self) -> SequencerState {
        self.state
    }

    /// Run every step in order. Failures terminate the remaining steps
    /// for this axis and are returned as the outcome, never propagated:
    /// other axes and devices continue independently.
    pub async fn run(&mut self) -> AxisOutcome {
        let prefix = self.axis.id().prefix();

        for &step in CalibrationStep::for_mode(self.config.mode) {
            if self.cancel.is_cancelled() {
                return self.abort().await;
            }
            self.state = step.running_state();
            info!("{}/{}: starting {}", self.label, prefix, step);

            if step == CalibrationStep::EncoderIndexSearch {
                if let Err(e) = self.axis.set_use_index(true).await {
                    return self.fault_unreachable(e);
                }
            }
            if let Err(e) = self.axis.request_state(step.axis_state()).await {
                return self.fault_unreachable(e);
            }

            match self.wait_for_step().await {
                StepWait::Completed => {
                    info!("{}/{}: {} complete", self.label, prefix, step);
                }
                StepWait::Errors(errors) => {
                    warn!("{}/{}: {} failed: {}", self.label, prefix, step, errors);
                    self.state = SequencerState::Faulted;
                    return AxisOutcome::Faulted(FaultReason::SubsystemErrors(errors));
                }
                StepWait::TimedOut => {
                    warn!(
                        "{}/{}: {} did not finish within {:?}",
                        self.label, prefix, step, self.config.step_timeout
                    );
                    self.state = SequencerState::Faulted;
                    return AxisOutcome::Faulted(FaultReason::StepTimeout(step));
                }
                StepWait::Cancelled => return self.abort().await,
                StepWait::Lost(e) => return self.fault_unreachable(e),
            }
        }

        if self.config.mode.marks_calibrated() {
            if let Err(e) = self.axis.mark_calibrated().await {
                return self.fault_unreachable(e);
            }
        }
        self.state = SequencerState::Calibrated;
        info!("{}/{}: calibrated", self.label, prefix);
        AxisOutcome::Calibrated
    }

    /// Fixed-interval poll until the device reports the step done, an
    /// error appears, the step times out, or the run is cancelled. The
    /// first sample happens before any delay, so a device that is
    /// already Idle completes with zero waits.
    async fn wait_for_step(&self) -> StepWait {
        let deadline = Instant::now() + self.config.step_timeout;
        loop {
            if self.cancel.is_cancelled() {
                return StepWait::Cancelled;
            }
            let errors = match self.axis.errors().await {
                Ok(errors) => errors,
                Err(e) => return StepWait::Lost(e),
            };
            if !errors.is_empty() {
                return StepWait::Errors(errors);
            }
            let state = match self.axis.current_state().await {
                Ok(state) => state,
                Err(e) => return StepWait::Lost(e),
            };
            if state == AxisState::Idle {
                return StepWait::Completed;
            }
            if Instant::now() >= deadline {
                return StepWait::TimedOut;
            }
            sleep(self.config.poll_interval).await;
        }
    }

    /// Best-effort return to Idle on cancellation; an already-issued
    /// step request is not retried or waited on.
    async fn abort(&mut self) -> AxisOutcome {
        info!("{}/{}: aborted", self.label, self.axis.id().prefix());
        if let Err(e) = self.axis.stop().await {
            warn!(
                "{}/{}: could not request stop: {}",
                self.label,
                self.axis.id().prefix(),
                e
            );
        }
        self.state = SequencerState::Faulted;
        AxisOutcome::Aborted
    }

    fn fault_unreachable(&mut self, error: BusError) -> AxisOutcome {
        warn!(
            "{}/{}: device lost: {}",
            self.label,
            self.axis.id().prefix(),
            error
        );
        self.state = SequencerState::Faulted;
        AxisOutcome::Faulted(FaultReason::Unreachable(error.to_string()))
    }
}
