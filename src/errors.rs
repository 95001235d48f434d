// Subsystem error bitmask decoding
//
// Each subsystem (axis, motor, encoder, controller) exposes an error
// field as a bitmask, one bit per named condition. Bit values follow the
// ODrive v0.5.4 error tables. Decoding is table-driven so every
// subsystem kind shares one implementation.

use serde::Serialize;
use std::fmt;

/// Which subsystem's error enumeration applies to a mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Subsystem {
    Axis,
    Motor,
    Encoder,
    Controller,
}

impl Subsystem {
    pub fn name(self) -> &'static str {
        match self {
            Subsystem::Axis => "axis",
            Subsystem::Motor => "motor",
            Subsystem::Encoder => "encoder",
            Subsystem::Controller => "controller",
        }
    }

    /// (bit, condition name) table for this subsystem kind.
    fn table(self) -> &'static [(u32, &'static str)] {
        match self {
            Subsystem::Axis => AXIS_ERRORS,
            Subsystem::Motor => MOTOR_ERRORS,
            Subsystem::Encoder => ENCODER_ERRORS,
            Subsystem::Controller => CONTROLLER_ERRORS,
        }
    }
}

const AXIS_ERRORS: &[(u32, &str)] = &[
    (0x01, "INVALID_STATE"),
    (0x40, "MOTOR_FAILED"),
    (0x80, "SENSORLESS_ESTIMATOR_FAILED"),
    (0x100, "ENCODER_FAILED"),
    (0x200, "CONTROLLER_FAILED"),
    (0x800, "WATCHDOG_TIMER_EXPIRED"),
    (0x1000, "MIN_ENDSTOP_PRESSED"),
    (0x2000, "MAX_ENDSTOP_PRESSED"),
    (0x4000, "ESTOP_REQUESTED"),
    (0x20000, "HOMING_WITHOUT_ENDSTOP"),
    (0x40000, "OVER_TEMP"),
    (0x80000, "UNKNOWN_POSITION"),
];

const MOTOR_ERRORS: &[(u32, &str)] = &[
    (0x01, "PHASE_RESISTANCE_OUT_OF_RANGE"),
    (0x02, "PHASE_INDUCTANCE_OUT_OF_RANGE"),
    (0x08, "DRV_FAULT"),
    (0x10, "CONTROL_DEADLINE_MISSED"),
    (0x80, "MODULATION_MAGNITUDE"),
    (0x400, "CURRENT_SENSE_SATURATION"),
    (0x1000, "CURRENT_LIMIT_VIOLATION"),
    (0x10000, "MODULATION_IS_NAN"),
    (0x20000, "MOTOR_THERMISTOR_OVER_TEMP"),
    (0x40000, "FET_THERMISTOR_OVER_TEMP"),
    (0x80000, "TIMER_UPDATE_MISSED"),
    (0x100000, "CURRENT_MEASUREMENT_UNAVAILABLE"),
    (0x200000, "CONTROLLER_FAILED"),
    (0x400000, "I_BUS_OUT_OF_RANGE"),
    (0x800000, "BRAKE_RESISTOR_DISARMED"),
    (0x1000000, "SYSTEM_LEVEL"),
    (0x2000000, "BAD_TIMING"),
    (0x4000000, "UNKNOWN_PHASE_ESTIMATE"),
];

const ENCODER_ERRORS: &[(u32, &str)] = &[
    (0x01, "UNSTABLE_GAIN"),
    (0x02, "CPR_POLEPAIRS_MISMATCH"),
    (0x04, "NO_RESPONSE"),
    (0x08, "UNSUPPORTED_ENCODER_MODE"),
    (0x10, "ILLEGAL_HALL_STATE"),
    (0x20, "INDEX_NOT_FOUND_YET"),
    (0x40, "ABS_SPI_TIMEOUT"),
    (0x80, "ABS_SPI_COM_FAIL"),
    (0x100, "ABS_SPI_NOT_READY"),
    (0x200, "HALL_NOT_CALIBRATED_YET"),
];

const CONTROLLER_ERRORS: &[(u32, &str)] = &[
    (0x01, "OVERSPEED"),
    (0x02, "INVALID_INPUT_MODE"),
    (0x04, "UNSTABLE_GAIN"),
    (0x08, "INVALID_MIRROR_AXIS"),
    (0x10, "INVALID_LOAD_ENCODER"),
    (0x20, "INVALID_ESTIMATE"),
    (0x40, "INVALID_CIRCULAR_RANGE"),
    (0x80, "SPINOUT_DETECTED"),
];

/// Decode an error bitmask into the named conditions whose bit is set.
///
/// Pure and deterministic: the result is empty iff `mask == 0` for
/// masks drawn from the known table. Bits with no table entry are
/// reserved/unknown on newer firmware and are silently dropped.
pub fn decode(mask: u32, kind: Subsystem) -> Vec<&'static str> {
    decode_table(mask, kind.table())
}

fn decode_table(mask: u32, table: &'static [(u32, &'static str)]) -> Vec<&'static str> {
    table
        .iter()
        .filter(|(bit, _)| mask & bit != 0)
        .map(|&(_, name)| name)
        .collect()
}

/// Snapshot of the decoded error masks of one axis, all four subsystems.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AxisErrors {
    pub axis: Vec<&'static str>,
    pub motor: Vec<&'static str>,
    pub encoder: Vec<&'static str>,
    pub controller: Vec<&'static str>,
}

impl AxisErrors {
    pub fn is_empty(&self) -> bool {
        self.axis.is_empty()
            && self.motor.is_empty()
            && self.encoder.is_empty()
            && self.controller.is_empty()
    }

    fn subsystems(&self) -> [(Subsystem, &Vec<&'static str>); 4] {
        [
            (Subsystem::Axis, &self.axis),
            (Subsystem::Motor, &self.motor),
            (Subsystem::Encoder, &self.encoder),
            (Subsystem::Controller, &self.controller),
        ]
    }
}

impl fmt::Display for AxisErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (kind, conditions) in self.subsystems() {
            for name in conditions {
                if !first {
                    write!(f, " & ")?;
                }
                write!(f, "{}.{}", kind.name(), name)?;
                first = false;
            }
        }
        if first {
            write!(f, "none")?;
        }
        Ok(())
    }
}

/// Device-wide error report: one entry per subsystem that reported a
/// non-empty condition set. Empty report means the device is clean.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ErrorReport {
    pub entries: Vec<SubsystemErrors>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubsystemErrors {
    /// Qualified subsystem path, e.g. "axis0.encoder".
    pub subsystem: String,
    pub conditions: Vec<&'static str>,
}

impl ErrorReport {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Record one axis's snapshot under its field prefix, keeping only
    /// the subsystems that actually reported something.
    pub fn record_axis(&mut self, prefix: &str, errors: &AxisErrors) {
        for (kind, conditions) in errors.subsystems() {
            if conditions.is_empty() {
                continue;
            }
            let subsystem = if kind == Subsystem::Axis {
                prefix.to_string()
            } else {
                format!("{prefix}.{}", kind.name())
            };
            self.entries.push(SubsystemErrors {
                subsystem,
                conditions: conditions.clone(),
            });
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.entries.is_empty() {
            return write!(f, "none");
        }
        for (i, entry) in self.entries.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}: {}", entry.subsystem, entry.conditions.join(" & "))?;
        }
        Ok(())
    }
}
