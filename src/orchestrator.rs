// Multi-device calibration orchestration
//
// One task per discovered device; within a task axis0 then axis1 run
// strictly sequentially because both axes share the device's power and
// brake-resistor path. Axis and device failures are recorded, never
// propagated: the run always completes a full pass and hands back one
// consolidated report keyed by device label.

use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info, warn};

use crate::config::{CalibrationConfig, CalibrationMode};
use crate::device::{BusError, DeviceBus, DeviceHandle};
use crate::errors::ErrorReport;
use crate::report::{AxisOutcome, DeviceReport, RunReport};
use crate::sequencer::{CalibrationSequencer, CancelFlag};

/// Calibrate every device, concurrently across devices, and aggregate
/// the per-device reports. Completion order does not matter; the report
/// is keyed by label.
pub async fn run_calibration<B: DeviceBus>(
    devices: Vec<DeviceHandle<B>>,
    config: CalibrationConfig,
    cancel: CancelFlag,
) -> RunReport {
    let config = Arc::new(config);
    let mut tasks = JoinSet::new();
    for device in devices {
        let config = config.clone();
        let cancel = cancel.clone();
        tasks.spawn(async move { calibrate_device(device, &config, &cancel).await });
    }

    let mut report = RunReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(device_report) => report.insert(device_report),
            Err(e) => error!("Device task failed: {e}"),
        }
    }
    report
}

/// Full calibration pass over one device: pre-flight error gate,
/// configuration + reboot in full mode, both axes in order, post-flight
/// error gate.
pub async fn calibrate_device<B: DeviceBus>(
    device: DeviceHandle<B>,
    config: &CalibrationConfig,
    cancel: &CancelFlag,
) -> DeviceReport {
    let label = device.label().to_string();
    info!("Calibrating {label}...");

    let preflight = match device.check_errors().await {
        Ok(report) => report,
        Err(e) => {
            return DeviceReport::transport_fault(label, format!("pre-flight check failed: {e}"));
        }
    };
    if !preflight.is_empty() {
        warn!("{label}: pre-existing errors, skipping: {preflight}");
        return DeviceReport {
            label,
            preflight,
            axes: vec![AxisOutcome::Skipped, AxisOutcome::Skipped],
            postflight: ErrorReport::default(),
            device_fault: None,
        };
    }

    if config.mode == CalibrationMode::Full && !cancel.is_cancelled() {
        if let Err(e) = prepare_device(&device, config).await {
            return DeviceReport::transport_fault(label, format!("configuration failed: {e}"));
        }
    }

    // Axis0 then axis1, never concurrently: a fault on axis0 does not
    // skip axis1, only the pre-flight gate skips a whole device.
    let mut axes = Vec::with_capacity(2);
    for axis in device.axes() {
        let mut sequencer = CalibrationSequencer::new(&label, &axis, config, cancel);
        axes.push(sequencer.run().await);
    }

    let mut device_fault = None;
    let calibrated_any = axes.iter().any(AxisOutcome::is_calibrated);
    if config.mode.marks_calibrated() && calibrated_any && !cancel.is_cancelled() {
        // Persist the pre-calibrated flags set by the sequencer
        if let Err(e) = device.save_configuration().await {
            warn!("{label}: could not persist configuration: {e}");
            device_fault = Some(format!("save_configuration failed: {e}"));
        }
    }

    let postflight = match device.check_errors().await {
        Ok(report) => report,
        Err(e) => {
            device_fault.get_or_insert(format!("post-flight check failed: {e}"));
            ErrorReport::default()
        }
    };

    info!("{label} calibration completed");
    DeviceReport {
        label,
        preflight,
        axes,
        postflight,
        device_fault,
    }
}

/// Write the axis configuration records and the brake resistance, then
/// reboot with the config persisted: the brake resistor setting only
/// takes effect after a boot.
async fn prepare_device<B: DeviceBus>(
    device: &DeviceHandle<B>,
    config: &CalibrationConfig,
) -> Result<(), BusError> {
    for axis in device.axes() {
        axis.apply_config(&config.axis).await?;
    }
    device.set_brake_resistance(config.brake_resistance).await?;
    device
        .reboot(true, config.reboot_timeout, config.poll_interval)
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::fake::FakeBus;
    use crate::report::FaultReason;
    use std::time::Duration;

    fn test_config(mode: CalibrationMode) -> CalibrationConfig {
        CalibrationConfig {
            mode,
            poll_interval: Duration::from_secs(1),
            step_timeout: Duration::from_secs(10),
            reboot_timeout: Duration::from_secs(5),
            ..CalibrationConfig::default()
        }
    }

    /// Index of the first/last state request per axis in a bus log
    fn request_span(bus: &FakeBus, axis: &str) -> (usize, usize) {
        let positions: Vec<usize> = bus
            .state_requests()
            .iter()
            .enumerate()
            .filter(|(_, (a, _))| a == axis)
            .map(|(i, _)| i)
            .collect();
        (*positions.first().unwrap(), *positions.last().unwrap())
    }

    #[tokio::test(start_paused = true)]
    async fn devices_calibrate_concurrently_without_interleaving_axes() {
        let bus_a = FakeBus::with_polls_until_idle(2);
        let bus_b = FakeBus::with_polls_until_idle(3);
        let devices = vec![
            DeviceHandle::new(bus_a.clone(), "section-a"),
            DeviceHandle::new(bus_b.clone(), "section-b"),
        ];

        let report = run_calibration(
            devices,
            test_config(CalibrationMode::IndexOnly),
            CancelFlag::new(),
        )
        .await;

        assert!(report.all_calibrated());
        assert_eq!(
            report.devices.keys().collect::<Vec<_>>(),
            vec!["section-a", "section-b"]
        );

        // Within each device every axis0 command precedes every axis1
        // command, regardless of cross-device interleaving
        for bus in [&bus_a, &bus_b] {
            let (_, last_axis0) = request_span(bus, "axis0");
            let (first_axis1, _) = request_span(bus, "axis1");
            assert!(last_axis0 < first_axis1);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn full_mode_configures_reboots_and_persists() {
        let bus = FakeBus::new();
        let devices = vec![DeviceHandle::new(bus.clone(), "section-a")];

        let report =
            run_calibration(devices, test_config(CalibrationMode::Full), CancelFlag::new()).await;

        assert!(report.all_calibrated());
        assert!(
            bus.writes()
                .contains(&("config.brake_resistance".to_string(), "0.5".to_string()))
        );
        assert_eq!(bus.reboots(), 1);
        // Saved once before the reboot and once after calibration
        assert_eq!(bus.saves(), 2);
        // pre_calibrated on encoder and motor of both axes
        let flags = bus
            .writes()
            .iter()
            .filter(|(path, _)| path.ends_with(".pre_calibrated"))
            .count();
        assert_eq!(flags, 4);
    }

    #[tokio::test(start_paused = true)]
    async fn preflight_errors_skip_the_whole_device() {
        let bus = FakeBus::new();
        bus.set_field("axis0.motor.error", "8");
        let devices = vec![DeviceHandle::new(bus.clone(), "section-a")];

        let report =
            run_calibration(devices, test_config(CalibrationMode::Full), CancelFlag::new()).await;

        let device = &report.devices["section-a"];
        assert_eq!(device.axes, vec![AxisOutcome::Skipped, AxisOutcome::Skipped]);
        assert_eq!(device.preflight.entries[0].subsystem, "axis0.motor");
        assert!(bus.state_requests().is_empty());
        assert!(!report.all_calibrated());
    }

    #[tokio::test(start_paused = true)]
    async fn axis0_fault_does_not_skip_axis1() {
        let bus = FakeBus::with_polls_until_idle(1);
        // Encoder error mask 0b10 raised as soon as index search starts
        bus.fail_on_request("axis0", "axis0.encoder.error", "2");
        let devices = vec![DeviceHandle::new(bus.clone(), "section-b")];

        let report = run_calibration(
            devices,
            test_config(CalibrationMode::IndexOnly),
            CancelFlag::new(),
        )
        .await;

        let device = &report.devices["section-b"];
        assert!(matches!(
            device.axes[0],
            AxisOutcome::Faulted(FaultReason::SubsystemErrors(_))
        ));
        assert_eq!(device.axes[1], AxisOutcome::Calibrated);
        // Axis1's index search was still attempted
        assert!(
            bus.state_requests()
                .contains(&("axis1".to_string(), "6".to_string()))
        );
        // The injected mask also shows up in the post-flight gate
        assert!(!device.postflight.is_empty());
        assert!(!report.all_calibrated());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_aborts_all_axes_without_new_commands() {
        let bus = FakeBus::new();
        let cancel = CancelFlag::new();
        cancel.cancel();
        let devices = vec![DeviceHandle::new(bus.clone(), "section-a")];

        let report = run_calibration(devices, test_config(CalibrationMode::Full), cancel).await;

        let device = &report.devices["section-a"];
        assert_eq!(device.axes, vec![AxisOutcome::Aborted, AxisOutcome::Aborted]);
        // Only best-effort stop requests, no calibration commands
        assert!(bus.state_requests().iter().all(|(_, v)| v == "1"));
        assert_eq!(bus.reboots(), 0);
        assert!(!report.all_calibrated());
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_device_is_reported_not_fatal() {
        let silent = FakeBus::new();
        silent.go_silent();
        let healthy = FakeBus::new();
        let devices = vec![
            DeviceHandle::new(silent, "section-a"),
            DeviceHandle::new(healthy, "section-b"),
        ];

        let report = run_calibration(
            devices,
            test_config(CalibrationMode::IndexOnly),
            CancelFlag::new(),
        )
        .await;

        assert!(report.devices["section-a"].device_fault.is_some());
        assert!(report.devices["section-b"].all_calibrated());
        assert!(!report.all_calibrated());
    }
}
