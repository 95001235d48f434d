// Opaque remote field interface to one device
//
// The runtime never assumes anything about the transport; it only
// assumes reads become consistent with prior writes within bounded
// latency. Values travel as their ASCII text form, matching the
// device's native protocol; typed parsing happens in the handles.

use std::future::Future;

/// Error types for device bus communication
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Transport loss, distinct from any calibration error: the device
    /// did not answer within the transport timeout.
    #[error("Device unreachable: {0}")]
    Unreachable(String),

    #[error("Cannot parse `{value}` read from {path}")]
    Parse { path: String, value: String },

    #[error("Protocol violation: {0}")]
    Protocol(String),
}

pub type Result<T> = std::result::Result<T, BusError>;

/// One device's remote field interface: named reads/writes plus the two
/// remote procedures. Futures are `Send` so one task per device can be
/// spawned onto the runtime.
pub trait DeviceBus: Send + Sync + 'static {
    /// Read a named field, returning its raw text value.
    fn read(&self, path: &str) -> impl Future<Output = Result<String>> + Send;

    /// Write a named field. Fire-and-forget at the device level: the
    /// device may not have acted on the value when this returns.
    fn write(&self, path: &str, value: &str) -> impl Future<Output = Result<()>> + Send;

    /// Ask the device to reboot. The device drops off the bus; callers
    /// poll for reachability afterwards.
    fn reboot(&self) -> impl Future<Output = Result<()>> + Send;

    /// Persist in-memory configuration to non-volatile storage. Takes
    /// effect on next boot.
    fn save_configuration(&self) -> impl Future<Output = Result<()>> + Send;
}
