// Timeouts, calibration mode, and per-axis configuration records
use std::fmt;
use std::time::Duration;

// How often the sequencer samples current_state while a step runs
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

// Wall-clock bound per calibration step; a stuck device trips this
// instead of polling forever
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(120);

// How long to wait for a device to come back after a reboot
pub const DEFAULT_REBOOT_TIMEOUT: Duration = Duration::from_secs(30);

// Brake resistor value (ohms); takes effect after reboot
pub const DEFAULT_BRAKE_RESISTANCE: f32 = 0.5;

/// Which calibration steps a run performs, selected once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum CalibrationMode {
    /// Index search + offset calibration, then persist the
    /// pre-calibrated flags so future boots can skip it.
    Full,
    /// Index search only, for devices that already hold offsets
    /// from a previous full calibration.
    IndexOnly,
}

impl CalibrationMode {
    /// Whether this mode persists the pre-calibrated flags on success.
    pub fn marks_calibrated(self) -> bool {
        matches!(self, CalibrationMode::Full)
    }
}

impl fmt::Display for CalibrationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CalibrationMode::Full => write!(f, "full"),
            CalibrationMode::IndexOnly => write!(f, "index-only"),
        }
    }
}

/// Run-level tunables shared by the sequencer and the orchestrator.
#[derive(Debug, Clone)]
pub struct CalibrationConfig {
    pub mode: CalibrationMode,
    pub poll_interval: Duration,
    pub step_timeout: Duration,
    pub reboot_timeout: Duration,
    pub brake_resistance: f32,
    pub axis: AxisConfig,
}

impl Default for CalibrationConfig {
    fn default() -> Self {
        Self {
            mode: CalibrationMode::Full,
            poll_interval: DEFAULT_POLL_INTERVAL,
            step_timeout: DEFAULT_STEP_TIMEOUT,
            reboot_timeout: DEFAULT_REBOOT_TIMEOUT,
            brake_resistance: DEFAULT_BRAKE_RESISTANCE,
            axis: AxisConfig::default(),
        }
    }
}

/// Controller control modes (subset of the device's enumeration)
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlMode {
    VoltageControl = 0,
    TorqueControl = 1,
    VelocityControl = 2,
    PositionControl = 3,
}

/// Motor types
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotorType {
    HighCurrent = 0,
    Gimbal = 2,
    Acim = 3,
}

/// Encoder modes
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncoderMode {
    Incremental = 0,
    Hall = 1,
    Sincos = 2,
}

/// Explicit write set for one axis: controller + motor + encoder records.
/// Applied in one pass by `AxisHandle::apply_config`.
#[derive(Debug, Clone, Default)]
pub struct AxisConfig {
    pub controller: ControllerConfig,
    pub motor: MotorConfig,
    pub encoder: EncoderConfig,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub control_mode: ControlMode,
    pub vel_limit: f32,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            control_mode: ControlMode::VelocityControl,
            vel_limit: 10.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotorConfig {
    pub pole_pairs: u32,
    pub calibration_current: f32,
    pub motor_type: MotorType,
    pub resistance_calib_max_voltage: f32,
    pub requested_current_range: f32,
    pub current_control_bandwidth: f32,
    pub torque_constant: f32,
    pub current_lim: f32,
}

impl Default for MotorConfig {
    fn default() -> Self {
        Self {
            pole_pairs: 7,
            calibration_current: 20.0,
            motor_type: MotorType::HighCurrent,
            resistance_calib_max_voltage: 5.0,
            requested_current_range: 20.0,
            current_control_bandwidth: 100.0,
            // 8.27 Nm*A^-1 / motor kV (270 kV hub motor)
            torque_constant: 8.27 / 270.0,
            current_lim: 20.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EncoderConfig {
    pub mode: EncoderMode,
    pub cpr: u32,
    pub bandwidth: f32,
    pub calib_scan_distance: f32,
    pub use_index: bool,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            mode: EncoderMode::Hall,
            cpr: 42,
            bandwidth: 100.0,
            calib_scan_distance: 150.0,
            use_index: true,
        }
    }
}
