//! Device telemetry snapshot.
//!
//! [`DeviceStatus`] is the full telemetry record at one point in time. It has
//! a single writer (the status engine); every other component receives
//! read-only snapshots through the status-changed event, never a live
//! reference.

use std::fmt;
use std::time::SystemTime;

/// Highest frequency any supported generator can produce, in hertz.
pub const MAX_FREQUENCY_HZ: u64 = 20_000_000;

/// Highest gain setting any supported generator accepts, in percent.
pub const MAX_GAIN_PERCENT: u64 = 150;

/// Plausible band for the PT100 temperature probe, in degrees Celsius.
///
/// Readings outside this band are sensor noise (probe unplugged reads as a
/// large negative constant on some boards) and are treated as absent.
pub const TEMPERATURE_PLAUSIBLE: std::ops::RangeInclusive<f64> = -70.0..=200.0;

/// Which output relay path the generator is driving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RelayMode {
    /// Low-frequency path (wipe-style transducers).
    #[default]
    Khz,
    /// High-frequency path (catch-style transducers).
    Mhz,
}

impl fmt::Display for RelayMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayMode::Khz => write!(f, "kHz"),
            RelayMode::Mhz => write!(f, "MHz"),
        }
    }
}

/// One telemetry snapshot of the connected generator.
///
/// Replaced atomically by the status engine: every changed field is applied
/// before the single status-changed notification fires.
#[derive(Debug, Clone)]
pub struct DeviceStatus {
    /// Output frequency in hertz.
    pub frequency: u64,
    /// Gain setting in percent.
    pub gain: u64,
    /// Whether the output signal is currently on.
    pub signal: bool,
    /// RMS output voltage in volts (0.0 when the sensing module is absent).
    pub urms: f64,
    /// RMS output current in amperes (0.0 when the sensing module is absent).
    pub irms: f64,
    /// Phase between voltage and current in degrees.
    pub phase: f64,
    /// Probe temperature in degrees Celsius; `None` when no plausible
    /// reading is available.
    pub temperature: Option<f64>,
    /// Which output relay path is active.
    pub relay_mode: RelayMode,
    /// Firmware error code (0 = no error).
    pub error_code: u64,
    /// When this snapshot was taken.
    pub timestamp: SystemTime,
}

impl Default for DeviceStatus {
    fn default() -> Self {
        DeviceStatus {
            frequency: 0,
            gain: 0,
            signal: false,
            urms: 0.0,
            irms: 0.0,
            phase: 0.0,
            temperature: None,
            relay_mode: RelayMode::default(),
            error_code: 0,
            timestamp: SystemTime::UNIX_EPOCH,
        }
    }
}

impl DeviceStatus {
    /// Whether any tracked telemetry field differs from `other`.
    ///
    /// The timestamp is bookkeeping, not telemetry: two polls that read the
    /// same values are identical for notification purposes.
    pub fn differs_from(&self, other: &DeviceStatus) -> bool {
        self.frequency != other.frequency
            || self.gain != other.gain
            || self.signal != other.signal
            || self.urms != other.urms
            || self.irms != other.irms
            || self.phase != other.phase
            || self.temperature != other.temperature
            || self.relay_mode != other.relay_mode
            || self.error_code != other.error_code
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn default_status_is_quiet() {
        let s = DeviceStatus::default();
        assert_eq!(s.frequency, 0);
        assert!(!s.signal);
        assert_eq!(s.temperature, None);
        assert_eq!(s.relay_mode, RelayMode::Khz);
    }

    #[test]
    fn identical_snapshots_do_not_differ() {
        let a = DeviceStatus::default();
        let b = a.clone();
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn timestamp_alone_does_not_differ() {
        let a = DeviceStatus::default();
        let mut b = a.clone();
        b.timestamp = SystemTime::UNIX_EPOCH + Duration::from_secs(60);
        assert!(!a.differs_from(&b));
    }

    #[test]
    fn frequency_change_differs() {
        let a = DeviceStatus::default();
        let mut b = a.clone();
        b.frequency = 100_000;
        assert!(a.differs_from(&b));
    }

    #[test]
    fn temperature_appearing_differs() {
        let a = DeviceStatus::default();
        let mut b = a.clone();
        b.temperature = Some(36.5);
        assert!(a.differs_from(&b));
    }

    #[test]
    fn relay_mode_change_differs() {
        let a = DeviceStatus::default();
        let mut b = a.clone();
        b.relay_mode = RelayMode::Mhz;
        assert!(a.differs_from(&b));
    }

    #[test]
    fn relay_mode_display() {
        assert_eq!(RelayMode::Khz.to_string(), "kHz");
        assert_eq!(RelayMode::Mhz.to_string(), "MHz");
    }
}
