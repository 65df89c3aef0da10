//! The static compatibility table: `(family, firmware) -> capabilities`.
//!
//! Resolution is a pure function so negotiation outcomes are reproducible
//! in tests without a device. There is deliberately no best-effort
//! fallback: an unknown combination resolves to nothing and the caller
//! tears the connection down, because guessing a command set risks sending
//! opcodes that older firmware silently misinterprets.

use sonolib_core::types::{DeviceFamily, DeviceModules, FirmwareVersion};

use crate::commands::{
    catch_full_set, catch_legacy_set, wipe_full_set, wipe_legacy_set, CommandSet,
};

/// Oldest firmware the library speaks at all.
pub const MIN_SUPPORTED: FirmwareVersion = FirmwareVersion { major: 0, minor: 3 };

/// First firmware generation reporting telemetry in milli-units.
pub const FULLSCALE_FROM: FirmwareVersion = FirmwareVersion { major: 0, minor: 4 };

/// How raw sensor readings convert to physical units.
///
/// Chosen once at negotiation time as plain data, never switched
/// mid-session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryScaling {
    /// Firmware 0.4+: readings arrive in milli-units (mV, mA, millidegrees).
    Fullscale,
    /// Firmware 0.3: readings arrive as raw ADC counts and go through the
    /// legacy calibration factors.
    Factorised,
}

/// Legacy urms calibration: volts per ADC count.
const URMS_FACTOR: f64 = 0.083;
/// Legacy irms calibration: amperes per ADC count.
const IRMS_FACTOR: f64 = 0.006;
/// Legacy phase calibration: degrees per ADC count.
const PHASE_FACTOR: f64 = 0.125;

impl TelemetryScaling {
    /// RMS voltage in volts from the raw reading.
    pub fn urms(&self, raw: f64) -> f64 {
        match self {
            TelemetryScaling::Fullscale => raw / 1000.0,
            TelemetryScaling::Factorised => raw * URMS_FACTOR,
        }
    }

    /// RMS current in amperes from the raw reading.
    pub fn irms(&self, raw: f64) -> f64 {
        match self {
            TelemetryScaling::Fullscale => raw / 1000.0,
            TelemetryScaling::Factorised => raw * IRMS_FACTOR,
        }
    }

    /// Phase in degrees from the raw reading.
    pub fn phase(&self, raw: f64) -> f64 {
        match self {
            TelemetryScaling::Fullscale => raw / 1000.0,
            TelemetryScaling::Factorised => raw * PHASE_FACTOR,
        }
    }
}

/// Everything negotiation selects for one device generation.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// The commands this firmware understands.
    pub commands: CommandSet,
    /// How its telemetry decodes.
    pub scaling: TelemetryScaling,
    /// Which optional modules the build carries.
    pub modules: DeviceModules,
}

/// Resolve a `(family, firmware)` pair against the compatibility table.
///
/// Returns `None` for combinations the library does not speak.
pub fn resolve(family: DeviceFamily, firmware: FirmwareVersion) -> Option<Capabilities> {
    if firmware < MIN_SUPPORTED {
        return None;
    }

    let capabilities = match (family, firmware >= FULLSCALE_FROM) {
        (DeviceFamily::Catch, true) => Capabilities {
            commands: catch_full_set(),
            scaling: TelemetryScaling::Fullscale,
            modules: DeviceModules {
                has_sensing: true,
                has_gain_control: true,
                has_relay_switching: true,
            },
        },
        (DeviceFamily::Catch, false) => Capabilities {
            commands: catch_legacy_set(),
            scaling: TelemetryScaling::Factorised,
            modules: DeviceModules {
                has_sensing: true,
                has_gain_control: true,
                has_relay_switching: false,
            },
        },
        (DeviceFamily::Wipe, true) => Capabilities {
            commands: wipe_full_set(),
            scaling: TelemetryScaling::Fullscale,
            modules: DeviceModules {
                has_sensing: false,
                has_gain_control: true,
                has_relay_switching: false,
            },
        },
        (DeviceFamily::Wipe, false) => Capabilities {
            commands: wipe_legacy_set(),
            scaling: TelemetryScaling::Factorised,
            modules: DeviceModules {
                has_sensing: false,
                has_gain_control: false,
                has_relay_switching: false,
            },
        },
    };

    Some(capabilities)
}
