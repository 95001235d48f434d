// Calibration runtime for dual-axis ODrive motor controllers
//
// Provides:
// - Device/axis handles over an opaque remote field bus
// - Subsystem error bitmask decoding
// - Per-axis calibration state machine (index search -> offset calibration)
// - Multi-device orchestration with per-device tasks

pub mod config;
pub mod device;
pub mod errors;
pub mod orchestrator;
pub mod report;
pub mod sequencer;
