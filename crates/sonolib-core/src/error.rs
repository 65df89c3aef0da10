//! Error types for sonolib.
//!
//! All fallible operations across the library return [`Result<T>`], which
//! uses [`Error`] as the error type. Transport-layer, protocol-layer, and
//! session-layer errors are all captured here.

/// The error type for all sonolib operations.
///
/// Variants cover the full range of failure modes encountered when driving
/// an ultrasonic generator over its serial link: port open failures,
/// malformed answers, timeouts, and unsupported devices or operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The serial port could not be opened or maintained.
    ///
    /// Fatal to the session: there is no device to talk to.
    #[error("connection error: {0}")]
    Connection(String),

    /// A protocol-level error (answer text that cannot be interpreted at all,
    /// or a request the device firmware rejected).
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Timed out waiting for an answer from the device.
    ///
    /// This typically indicates the generator is powered off, the baud rate
    /// is wrong, or the firmware is busy with a sweep. A single timeout is
    /// recovered locally as an invalid answer; it never tears the session down.
    #[error("timeout waiting for answer")]
    Timeout,

    /// Capability negotiation found no compatible command set for the
    /// connected device.
    ///
    /// Fatal: guessing a command set risks sending opcodes that older
    /// firmware silently misinterprets, so the connection is torn down.
    #[error("unsupported device: {0}")]
    UnsupportedDevice(String),

    /// The requested operation is not supported by this device's firmware.
    #[error("unsupported operation: {0}")]
    Unsupported(String),

    /// An invalid parameter was passed to a device command.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// No connection to the device has been established.
    #[error("not connected")]
    NotConnected,

    /// The connection to the device was lost unexpectedly.
    #[error("connection lost")]
    ConnectionLost,

    /// An underlying I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_connection() {
        let e = Error::Connection("port busy".into());
        assert_eq!(e.to_string(), "connection error: port busy");
    }

    #[test]
    fn error_display_protocol() {
        let e = Error::Protocol("garbled answer".into());
        assert_eq!(e.to_string(), "protocol error: garbled answer");
    }

    #[test]
    fn error_display_timeout() {
        assert_eq!(Error::Timeout.to_string(), "timeout waiting for answer");
    }

    #[test]
    fn error_display_unsupported_device() {
        let e = Error::UnsupportedDevice("sonicwipe 0.1".into());
        assert_eq!(e.to_string(), "unsupported device: sonicwipe 0.1");
    }

    #[test]
    fn error_display_not_connected() {
        assert_eq!(Error::NotConnected.to_string(), "not connected");
    }

    #[test]
    fn error_display_connection_lost() {
        assert_eq!(Error::ConnectionLost.to_string(), "connection lost");
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe broken");
        let e: Error = io_err.into();
        assert!(matches!(e, Error::Io(_)));
        assert!(e.to_string().contains("pipe broken"));
    }

    #[test]
    fn error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn error_implements_std_error() {
        fn assert_std_error<T: std::error::Error>() {}
        assert_std_error::<Error>();
    }
}
