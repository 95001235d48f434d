// Device access layer
//
// Provides:
// - The opaque remote field bus trait and its error taxonomy
// - ASCII-over-serial bus implementation + port discovery
// - High-level device/axis handles used by the calibration runtime

pub mod ascii;
pub mod bus;
mod handle;

#[cfg(test)]
pub mod fake;

pub use ascii::{AsciiBus, SerialDiscovery, DEFAULT_BAUDRATE};
pub use bus::{BusError, DeviceBus};
pub use handle::{AxisHandle, AxisId, AxisState, DeviceHandle, Discovery, EncoderStatus};
