//! Host backends
//!
//! A backend knows how to list the host's serial devices and open one of
//! them. An open device is a [`PortIo`]: configure, DTR control, raw
//! non-blocking reads, writes and close. Backends report failures as
//! [`SerialError`] values and never log them; reporting happens once, in
//! the session manager.
//!
//! Backends:
//!
//! - **termios** (unix): `/dev/tty*` devices, BREAKs inline via `PARMRK`
//! - **windows**: registry enumeration and the comm API, BREAKs on a side
//!   channel via `ClearCommError`
//! - **unsupported**: every operation fails, inhibiting serial support
//! - **sim**: an in-memory host for tests and demos

use ser_codec::BreakEncoding;
use tracing::warn;

use crate::catalog::DeviceDescriptor;
use crate::config::{BackendKind, SerialConfig};
use crate::error::SerialError;

pub mod sim;
#[cfg(unix)]
pub mod termios;
pub mod unsupported;
#[cfg(windows)]
pub mod windows;

pub use sim::{SimBackend, SimDevice};
pub use unsupported::UnsupportedBackend;

/// Result of one raw, undecoded read
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RawRead {
    /// Bytes placed in the caller's buffer
    pub len: usize,
    /// Side-channel BREAK indication for this read
    pub break_reported: bool,
}

impl RawRead {
    /// Nothing was available
    pub fn empty() -> Self {
        Self::default()
    }

    /// `len` bytes with no side-channel condition
    pub fn bytes(len: usize) -> Self {
        Self {
            len,
            break_reported: false,
        }
    }
}

/// Host capability: list and open serial devices
pub trait SerialBackend {
    /// Which backend this is
    fn kind(&self) -> BackendKind;

    /// How this backend reports BREAKs in read output
    fn break_encoding(&self) -> BreakEncoding;

    /// List at most `max` host devices, in host order
    fn enumerate(&self, max: usize) -> Vec<DeviceDescriptor>;

    /// Exclusively open a device by canonical name
    ///
    /// The device is left in raw mode with DTR de-asserted and reads set to
    /// return immediately.
    fn open(&self, name: &str) -> Result<Box<dyn PortIo>, SerialError>;
}

/// An open host device
pub trait PortIo {
    /// Apply baud rate and framing
    fn configure(&mut self, config: &SerialConfig) -> Result<(), SerialError>;

    /// Assert or de-assert DTR
    ///
    /// Returns [`SerialError::Unsupported`] when the device has no DTR.
    fn set_dtr(&mut self, assert: bool) -> Result<(), SerialError>;

    /// Non-blocking read of raw bytes into `buf`
    ///
    /// "Try again" conditions are returned as [`RawRead::empty`].
    fn read_raw(&mut self, buf: &mut [u8]) -> Result<RawRead, SerialError>;

    /// Write as much of `data` as the host accepts
    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError>;

    /// Release the device, ignoring errors
    fn close(self: Box<Self>);
}

/// Create the backend for `kind`
///
/// A backend that does not exist on this host falls back to
/// [`UnsupportedBackend`].
pub fn create_backend(kind: BackendKind) -> Box<dyn SerialBackend> {
    match kind {
        #[cfg(unix)]
        BackendKind::Termios => Box::new(termios::TermiosBackend::new()),
        #[cfg(windows)]
        BackendKind::Windows => Box::new(windows::WindowsBackend::new()),
        BackendKind::Unsupported => Box::new(UnsupportedBackend),
        #[allow(unreachable_patterns)]
        other => {
            warn!("{} backend is not available on this host", other.name());
            Box::new(UnsupportedBackend)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_native_backend_kind() {
        let backend = create_backend(BackendKind::native());
        assert_eq!(backend.kind(), BackendKind::native());
    }

    #[test]
    fn test_foreign_backend_falls_back_to_unsupported() {
        let foreign = if cfg!(windows) {
            BackendKind::Termios
        } else {
            BackendKind::Windows
        };
        assert_eq!(create_backend(foreign).kind(), BackendKind::Unsupported);
    }
}
