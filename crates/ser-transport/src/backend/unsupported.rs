//! Backend for hosts without serial support
//!
//! Enumeration is empty and every open fails with `NotFound`, so callers
//! degrade gracefully instead of erroring at startup.

use ser_codec::BreakEncoding;

use super::{PortIo, SerialBackend};
use crate::catalog::DeviceDescriptor;
use crate::config::BackendKind;
use crate::error::SerialError;

/// Backend that inhibits serial support
#[derive(Debug, Clone, Copy, Default)]
pub struct UnsupportedBackend;

impl SerialBackend for UnsupportedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Unsupported
    }

    fn break_encoding(&self) -> BreakEncoding {
        BreakEncoding::SideChannel
    }

    fn enumerate(&self, _max: usize) -> Vec<DeviceDescriptor> {
        Vec::new()
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortIo>, SerialError> {
        Err(SerialError::NotFound(name.to_string()))
    }
}
