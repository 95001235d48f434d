// Run report types: what the orchestrator hands back per device/axis

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

use crate::errors::{AxisErrors, ErrorReport};
use crate::sequencer::CalibrationStep;

/// Why an axis did not reach `Calibrated`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultReason {
    /// Non-empty decoded error masks observed while a step ran
    SubsystemErrors(AxisErrors),
    /// The step did not finish within the configured bound
    StepTimeout(CalibrationStep),
    /// Transport loss; distinct from any calibration error
    Unreachable(String),
}

impl fmt::Display for FaultReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultReason::SubsystemErrors(errors) => write!(f, "{errors}"),
            FaultReason::StepTimeout(step) => write!(f, "timeout during {step}"),
            FaultReason::Unreachable(message) => write!(f, "unreachable: {message}"),
        }
    }
}

/// Terminal result for one axis
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AxisOutcome {
    Calibrated,
    Faulted(FaultReason),
    /// Device-level pre-flight errors, calibration never attempted
    Skipped,
    /// Run-level cancellation before the axis finished
    Aborted,
}

impl AxisOutcome {
    pub fn is_calibrated(&self) -> bool {
        matches!(self, AxisOutcome::Calibrated)
    }
}

impl fmt::Display for AxisOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AxisOutcome::Calibrated => write!(f, "calibrated"),
            AxisOutcome::Faulted(reason) => write!(f, "faulted ({reason})"),
            AxisOutcome::Skipped => write!(f, "skipped"),
            AxisOutcome::Aborted => write!(f, "aborted"),
        }
    }
}

/// Everything observed about one device during the run
#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub label: String,
    pub preflight: ErrorReport,
    /// Axis outcomes in axis order (axis0, axis1)
    pub axes: Vec<AxisOutcome>,
    pub postflight: ErrorReport,
    /// Transport-level failure outside any single axis, e.g. a reboot
    /// that never came back
    pub device_fault: Option<String>,
}

impl DeviceReport {
    /// Report for a device that dropped off the bus before or between
    /// calibration phases.
    pub fn transport_fault(label: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            preflight: ErrorReport::default(),
            axes: vec![AxisOutcome::Skipped, AxisOutcome::Skipped],
            postflight: ErrorReport::default(),
            device_fault: Some(message.into()),
        }
    }

    pub fn all_calibrated(&self) -> bool {
        self.device_fault.is_none()
            && self.preflight.is_empty()
            && self.postflight.is_empty()
            && !self.axes.is_empty()
            && self.axes.iter().all(AxisOutcome::is_calibrated)
    }
}

impl fmt::Display for DeviceReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.label)?;
        for (i, outcome) in self.axes.iter().enumerate() {
            write!(f, " axis{i} {outcome}")?;
            if i + 1 < self.axes.len() {
                write!(f, ",")?;
            }
        }
        if !self.preflight.is_empty() {
            write!(f, " [pre-flight: {}]", self.preflight)?;
        }
        if !self.postflight.is_empty() {
            write!(f, " [post-flight: {}]", self.postflight)?;
        }
        if let Some(fault) = &self.device_fault {
            write!(f, " [device fault: {fault}]")?;
        }
        Ok(())
    }
}

/// Consolidated result of one orchestration run, keyed by device label
/// so aggregation is independent of task completion order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub devices: BTreeMap<String, DeviceReport>,
}

impl RunReport {
    pub fn insert(&mut self, report: DeviceReport) {
        self.devices.insert(report.label.clone(), report);
    }

    /// True iff every axis of every device reached `Calibrated`.
    pub fn all_calibrated(&self) -> bool {
        self.devices.values().all(DeviceReport::all_calibrated)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for report in self.devices.values() {
            writeln!(f, "{report}")?;
        }
        Ok(())
    }
}
