//! Core types used throughout sonolib.
//!
//! Device identity established by capability negotiation: family tag,
//! firmware version, and the module set a given firmware build carries.

use std::fmt;
use std::str::FromStr;

/// Device family tag.
///
/// Ultrasonic generators ship in two product lines with different front
/// ends and partially different firmware command sets. The family is
/// announced in the greeting banner or queried with the type command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceFamily {
    /// Catch-line generator: full sensing module (urms/irms/phase).
    Catch,
    /// Wipe-line generator: no sensing module, cleaning-oriented firmware.
    Wipe,
}

impl DeviceFamily {
    /// The token the firmware prints for this family.
    pub fn token(&self) -> &'static str {
        match self {
            DeviceFamily::Catch => "soniccatch",
            DeviceFamily::Wipe => "sonicwipe",
        }
    }
}

impl fmt::Display for DeviceFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.token())
    }
}

/// Error returned when a string contains no recognizable family token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseFamilyError(String);

impl fmt::Display for ParseFamilyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown device family: {}", self.0)
    }
}

impl std::error::Error for ParseFamilyError {}

impl FromStr for DeviceFamily {
    type Err = ParseFamilyError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        // Banner lines embed the token in free text, so substring match.
        if lower.contains("soniccatch") {
            Ok(DeviceFamily::Catch)
        } else if lower.contains("sonicwipe") {
            Ok(DeviceFamily::Wipe)
        } else {
            Err(ParseFamilyError(s.to_string()))
        }
    }
}

/// Firmware version as announced by the device (`major.minor`).
///
/// Patch-level digits sometimes appear in banners (`0.4.1`) but never
/// change the protocol, so only major and minor are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FirmwareVersion {
    pub major: u8,
    pub minor: u8,
}

impl FirmwareVersion {
    /// Create a version from its parts.
    pub fn new(major: u8, minor: u8) -> Self {
        FirmwareVersion { major, minor }
    }
}

impl fmt::Display for FirmwareVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// Error returned when a string cannot be parsed into a [`FirmwareVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseVersionError(String);

impl fmt::Display for ParseVersionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unparseable firmware version: {}", self.0)
    }
}

impl std::error::Error for ParseVersionError {}

impl FromStr for FirmwareVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let mut parts = s.trim().trim_start_matches('v').split('.');
        let major = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        let minor = parts
            .next()
            .and_then(|p| p.parse::<u8>().ok())
            .ok_or_else(|| ParseVersionError(s.to_string()))?;
        Ok(FirmwareVersion { major, minor })
    }
}

/// The optional firmware modules a device build carries.
///
/// Established once by capability negotiation; operations that need a
/// missing module fail with `Error::Unsupported` instead of sending
/// opcodes the firmware would misread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceModules {
    /// Sensing module: urms/irms/phase telemetry via the sensor query.
    pub has_sensing: bool,
    /// Gain control via the gain set command.
    pub has_gain_control: bool,
    /// Output relay switching between the kHz and MHz signal paths.
    pub has_relay_switching: bool,
}

/// Static identity of a connected device.
///
/// Built once by the capability negotiator and immutable until reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Which product line the device belongs to.
    pub family: DeviceFamily,
    /// Firmware version announced by the device.
    pub firmware: FirmwareVersion,
    /// Modules this firmware build carries.
    pub modules: DeviceModules,
}
