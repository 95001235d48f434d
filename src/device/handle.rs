// High-level device and axis handles
//
// Wraps a DeviceBus with the field paths of a dual-axis controller:
// per-axis state and subsystem errors, and device-level lifecycle
// (error gate, brake resistor, save, reboot with wait-for-reachable).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::bus::{BusError, DeviceBus, Result};
use crate::config::AxisConfig;
use crate::errors::{AxisErrors, ErrorReport, Subsystem, decode};

// Field the reboot wait loop samples to detect the device is back
const REACHABILITY_FIELD: &str = "vbus_voltage";

/// Axis states reported in `current_state` / accepted by
/// `requested_state` (subset of the device's enumeration).
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisState {
    Undefined = 0,
    Idle = 1,
    StartupSequence = 2,
    FullCalibrationSequence = 3,
    MotorCalibration = 4,
    EncoderIndexSearch = 6,
    EncoderOffsetCalibration = 7,
    ClosedLoopControl = 8,
}

impl AxisState {
    pub fn as_raw(self) -> u32 {
        self as u32
    }

    /// Unrecognized values map to `Undefined`; the sequencer only ever
    /// compares against `Idle`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => AxisState::Idle,
            2 => AxisState::StartupSequence,
            3 => AxisState::FullCalibrationSequence,
            4 => AxisState::MotorCalibration,
            6 => AxisState::EncoderIndexSearch,
            7 => AxisState::EncoderOffsetCalibration,
            8 => AxisState::ClosedLoopControl,
            _ => AxisState::Undefined,
        }
    }
}

/// The two axes of one device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisId {
    Axis0,
    Axis1,
}

impl AxisId {
    pub const BOTH: [AxisId; 2] = [AxisId::Axis0, AxisId::Axis1];

    /// Field path prefix on the device, e.g. "axis0"
    pub fn prefix(self) -> &'static str {
        match self {
            AxisId::Axis0 => "axis0",
            AxisId::Axis1 => "axis1",
        }
    }
}

/// Tri-state encoder status flags: `None` until the device has reported
/// a recognizable value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncoderStatus {
    pub is_ready: Option<bool>,
    pub index_found: Option<bool>,
}

/// One controllable axis of a device
pub struct AxisHandle<B> {
    bus: Arc<B>,
    axis: AxisId,
}

impl<B: DeviceBus> AxisHandle<B> {
    pub fn id(&self) -> AxisId {
        self.axis
    }

    fn path(&self, field: &str) -> String {
        format!("{}.{}", self.axis.prefix(), field)
    }

    async fn read_u32(&self, field: &str) -> Result<u32> {
        let path = self.path(field);
        let value = self.bus.read(&path).await?;
        value
            .trim()
            .parse()
            .map_err(|_| BusError::Parse { path, value })
    }

    async fn read_tristate(&self, field: &str) -> Result<Option<bool>> {
        Ok(match self.read_u32(field).await {
            Ok(0) => Some(false),
            Ok(_) => Some(true),
            Err(BusError::Parse { .. }) => None,
            Err(e) => return Err(e),
        })
    }

    /// Device-reported state. Not guaranteed to match the last
    /// requested state at any instant.
    pub async fn current_state(&self) -> Result<AxisState> {
        Ok(AxisState::from_raw(self.read_u32("current_state").await?))
    }

    /// Fire-and-forget state transition command. Returns once the bus
    /// accepted the write; the device acts on it asynchronously.
    pub async fn request_state(&self, state: AxisState) -> Result<()> {
        debug!("{}: requesting state {:?}", self.axis.prefix(), state);
        self.bus
            .write(&self.path("requested_state"), &state.as_raw().to_string())
            .await
    }

    /// Best-effort stop: request `Idle`
    pub async fn stop(&self) -> Result<()> {
        self.request_state(AxisState::Idle).await
    }

    /// Snapshot of all four subsystem error masks, decoded.
    pub async fn errors(&self) -> Result<AxisErrors> {
        Ok(AxisErrors {
            axis: decode(self.read_u32("error").await?, Subsystem::Axis),
            motor: decode(self.read_u32("motor.error").await?, Subsystem::Motor),
            encoder: decode(self.read_u32("encoder.error").await?, Subsystem::Encoder),
            controller: decode(
                self.read_u32("controller.error").await?,
                Subsystem::Controller,
            ),
        })
    }

    pub async fn encoder_status(&self) -> Result<EncoderStatus> {
        Ok(EncoderStatus {
            is_ready: self.read_tristate("encoder.is_ready").await?,
            index_found: self.read_tristate("encoder.index_found").await?,
        })
    }

    /// Require an index pulse before the encoder counts as ready.
    pub async fn set_use_index(&self, on: bool) -> Result<()> {
        self.bus
            .write(&self.path("encoder.config.use_index"), bool_field(on))
            .await
    }

    /// Persist the pre-calibrated flags on encoder and motor config so
    /// future boots skip recalibration. Idempotent, write-only; callers
    /// confirm separately via `errors()`.
    pub async fn mark_calibrated(&self) -> Result<()> {
        self.bus
            .write(&self.path("encoder.config.pre_calibrated"), bool_field(true))
            .await?;
        self.bus
            .write(&self.path("motor.config.pre_calibrated"), bool_field(true))
            .await
    }

    /// Apply one axis configuration record: the full controller, motor
    /// and encoder write set, nothing else.
    pub async fn apply_config(&self, config: &AxisConfig) -> Result<()> {
        debug!("{}: applying configuration", self.axis.prefix());

        let c = &config.controller;
        self.write_u32("controller.config.control_mode", c.control_mode as u32)
            .await?;
        self.write_f32("controller.config.vel_limit", c.vel_limit)
            .await?;

        let m = &config.motor;
        self.write_u32("motor.config.pole_pairs", m.pole_pairs).await?;
        self.write_f32("motor.config.calibration_current", m.calibration_current)
            .await?;
        self.write_u32("motor.config.motor_type", m.motor_type as u32)
            .await?;
        self.write_f32(
            "motor.config.resistance_calib_max_voltage",
            m.resistance_calib_max_voltage,
        )
        .await?;
        self.write_f32("motor.config.requested_current_range", m.requested_current_range)
            .await?;
        self.write_f32(
            "motor.config.current_control_bandwidth",
            m.current_control_bandwidth,
        )
        .await?;
        self.write_f32("motor.config.torque_constant", m.torque_constant)
            .await?;
        self.write_f32("motor.config.current_lim", m.current_lim).await?;

        let e = &config.encoder;
        self.write_u32("encoder.config.mode", e.mode as u32).await?;
        self.write_u32("encoder.config.cpr", e.cpr).await?;
        self.write_f32("encoder.config.bandwidth", e.bandwidth).await?;
        self.write_f32("encoder.config.calib_scan_distance", e.calib_scan_distance)
            .await?;
        self.set_use_index(e.use_index).await
    }

    async fn write_u32(&self, field: &str, value: u32) -> Result<()> {
        self.bus.write(&self.path(field), &value.to_string()).await
    }

    async fn write_f32(&self, field: &str, value: f32) -> Result<()> {
        self.bus.write(&self.path(field), &value.to_string()).await
    }
}

fn bool_field(on: bool) -> &'static str {
    if on { "1" } else { "0" }
}

/// One physical dual-axis controller unit. Exclusively owns its bus:
/// all commands to the device go through this handle.
pub struct DeviceHandle<B> {
    bus: Arc<B>,
    label: String,
}

impl<B: DeviceBus> DeviceHandle<B> {
    pub fn new(bus: B, label: impl Into<String>) -> Self {
        Self {
            bus: Arc::new(bus),
            label: label.into(),
        }
    }

    /// Section label used to key the run report
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn axis(&self, id: AxisId) -> AxisHandle<B> {
        AxisHandle {
            bus: self.bus.clone(),
            axis: id,
        }
    }

    /// Both axes in calibration order: axis0 then axis1
    pub fn axes(&self) -> [AxisHandle<B>; 2] {
        AxisId::BOTH.map(|id| self.axis(id))
    }

    /// Aggregate error gate across both axes' subsystems. Used before
    /// calibration (skip a dirty device) and after (confirm it is clean).
    pub async fn check_errors(&self) -> Result<ErrorReport> {
        let mut report = ErrorReport::default();
        for axis in self.axes() {
            let errors = axis.errors().await?;
            if !errors.is_empty() {
                warn!("{}: {} reports {}", self.label, axis.id().prefix(), errors);
            }
            report.record_axis(axis.id().prefix(), &errors);
        }
        Ok(report)
    }

    /// Configuration write; only takes effect after the next reboot.
    pub async fn set_brake_resistance(&self, ohms: f32) -> Result<()> {
        info!("{}: setting brake resistance to {} ohm", self.label, ohms);
        self.bus
            .write("config.brake_resistance", &ohms.to_string())
            .await
    }

    /// Persist in-memory config to non-volatile storage.
    pub async fn save_configuration(&self) -> Result<()> {
        info!("{}: saving configuration", self.label);
        self.bus.save_configuration().await
    }

    /// Reboot the device and wait until it answers again, polling at
    /// `poll_interval` up to `timeout`. With `persist_config` the
    /// in-memory configuration is saved first so it survives the boot.
    pub async fn reboot(
        &self,
        persist_config: bool,
        timeout: Duration,
        poll_interval: Duration,
    ) -> Result<()> {
        if persist_config {
            self.save_configuration().await?;
        }
        info!("{}: rebooting", self.label);
        self.bus.reboot().await?;

        let deadline = Instant::now() + timeout;
        loop {
            sleep(poll_interval).await;
            match self.bus.read(REACHABILITY_FIELD).await {
                Ok(_) => {
                    info!("{}: back after reboot", self.label);
                    return Ok(());
                }
                Err(e) if Instant::now() >= deadline => {
                    return Err(BusError::Unreachable(format!(
                        "{} did not come back within {:?} after reboot: {}",
                        self.label, timeout, e
                    )));
                }
                Err(_) => debug!("{}: not reachable yet", self.label),
            }
        }
    }
}

/// Device discovery collaborator: enumerate the bus and hand back a
/// finite (possibly empty) list of labelled device handles.
pub trait Discovery {
    type Bus: DeviceBus;

    fn discover(&self) -> impl Future<Output = Result<Vec<DeviceHandle<Self::Bus>>>> + Send;
}
