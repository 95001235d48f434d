use clap::Parser;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use odrive_cal_runtime::config::{CalibrationConfig, CalibrationMode};
use odrive_cal_runtime::device::{DEFAULT_BAUDRATE, Discovery, SerialDiscovery};
use odrive_cal_runtime::orchestrator::run_calibration;
use odrive_cal_runtime::sequencer::CancelFlag;

/// Calibrate the encoders of every connected dual-axis motor controller
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Serial ports with a controller attached, e.g. /dev/ttyACM0
    #[arg(required = true)]
    ports: Vec<String>,

    /// Serial baudrate
    #[arg(long, default_value_t = DEFAULT_BAUDRATE)]
    baudrate: u32,

    /// Which calibration steps to run
    #[arg(long, value_enum, default_value_t = CalibrationMode::Full)]
    mode: CalibrationMode,

    /// State polling interval in milliseconds
    #[arg(long, default_value_t = 1000)]
    poll_interval_ms: u64,

    /// Maximum wait per calibration step, in seconds
    #[arg(long, default_value_t = 120)]
    step_timeout_s: u64,

    /// Print the run report as JSON instead of a summary
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() {
    // Setup logging (set RUST_LOG=info or debug)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse().unwrap()))
        .init();

    let args = Args::parse();
    std::process::exit(run(args).await);
}

async fn run(args: Args) -> i32 {
    let config = CalibrationConfig {
        mode: args.mode,
        poll_interval: Duration::from_millis(args.poll_interval_ms),
        step_timeout: Duration::from_secs(args.step_timeout_s),
        ..CalibrationConfig::default()
    };

    // Discovery failure is the only fatal path: without a device list
    // there is nothing to report on.
    let discovery = SerialDiscovery::new(args.ports, args.baudrate);
    let devices = match discovery.discover().await {
        Ok(devices) => devices,
        Err(e) => {
            eprintln!("Device discovery failed: {e}");
            return 2;
        }
    };
    if devices.is_empty() {
        warn!("No devices discovered, nothing to calibrate");
    }

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, aborting calibration");
                cancel.cancel();
            }
        });
    }

    info!("Running calibration ...");
    let report = run_calibration(devices, config, cancel).await;

    if args.json {
        match serde_json::to_string_pretty(&report) {
            Ok(json) => println!("{json}"),
            Err(e) => eprintln!("Failed to encode report: {e}"),
        }
    } else {
        print!("{report}");
    }

    if report.all_calibrated() { 0 } else { 1 }
}
