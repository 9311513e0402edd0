//! Error types for the serial transport

use thiserror::Error;

use crate::registry::PortHandle;

/// Errors that can occur while resolving, opening or driving a serial port
///
/// Only [`SerialError::Io`] is unexpected; every other variant is an
/// ordinary outcome the caller is expected to handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SerialError {
    /// Name did not resolve to a device, or the device does not exist
    #[error("serial device not found: {0}")]
    NotFound(String),

    /// Device exists but is in use or access was refused
    #[error("serial device {0} is busy or access is denied")]
    Busy(String),

    /// Configuration value or combination rejected
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Host does not support the operation
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    /// Unexpected host failure
    #[error("{operation} fails with error {code}")]
    Io {
        /// Host routine that failed
        operation: &'static str,
        /// Host error code (errno or Win32 error)
        code: i32,
    },

    /// Handle does not refer to an open port
    #[error("no open port with handle {0}")]
    UnknownHandle(PortHandle),
}

impl SerialError {
    /// Build an unexpected I/O error from a host routine name and error code
    pub fn io(operation: &'static str, code: i32) -> Self {
        Self::Io { operation, code }
    }

    /// Build an unexpected I/O error from a `std::io::Error`
    pub fn from_io(operation: &'static str, err: &std::io::Error) -> Self {
        Self::Io {
            operation,
            code: err.raw_os_error().unwrap_or(-1),
        }
    }

    /// True for failures that must go through the diagnostic reporter
    pub fn is_unexpected(&self) -> bool {
        matches!(self, Self::Io { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_io_is_unexpected() {
        assert!(SerialError::io("read", 5).is_unexpected());
        assert!(!SerialError::NotFound("ser9".into()).is_unexpected());
        assert!(!SerialError::Busy("/dev/ttyS0".into()).is_unexpected());
        assert!(!SerialError::InvalidArgument("size".into()).is_unexpected());
        assert!(!SerialError::Unsupported("control").is_unexpected());
        assert!(!SerialError::UnknownHandle(PortHandle(3)).is_unexpected());
    }

    #[test]
    fn test_io_message() {
        let err = SerialError::io("tcsetattr", 22);
        assert_eq!(err.to_string(), "tcsetattr fails with error 22");
    }

    #[test]
    fn test_from_io_without_os_code() {
        let err = std::io::Error::new(std::io::ErrorKind::Other, "boom");
        assert_eq!(
            SerialError::from_io("write", &err),
            SerialError::Io {
                operation: "write",
                code: -1
            }
        );
    }
}
