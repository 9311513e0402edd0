//! Device catalog
//!
//! Host enumeration can miss a device this process already holds open
//! exclusively, so the catalog appends any open device the host did not
//! report and then sorts by name. Indices into the catalog (`ser0`,
//! `ser1`, ...) therefore stay stable while ports are open.

use tracing::debug;

use crate::backend::SerialBackend;
use crate::registry::OpenRegistry;

/// Catalog bound used when resolving names
pub const SER_MAX_DEVICES: usize = 64;

/// A host serial device
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceDescriptor {
    /// Host device path or identifier (e.g., /dev/ttyUSB0, COM3)
    pub name: String,
    /// Human-readable label, may be empty
    pub description: String,
}

impl DeviceDescriptor {
    /// Create a descriptor
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }

    /// Description, or `None` when the host gave none
    pub fn description(&self) -> Option<&str> {
        if self.description.is_empty() {
            None
        } else {
            Some(&self.description)
        }
    }
}

/// Merge open devices into a host listing and sort it
///
/// Open devices already present by name are skipped; the rest are appended
/// until `max` entries are reached. Sorting is byte-wise by name.
pub fn merge_open_devices(
    mut devices: Vec<DeviceDescriptor>,
    registry: &OpenRegistry,
    max: usize,
) -> Vec<DeviceDescriptor> {
    devices.truncate(max);

    for entry in registry.iter() {
        if devices.iter().any(|d| d.name == entry.name) {
            continue;
        }
        if devices.len() >= max {
            break;
        }
        debug!("Adding open device {} missing from host listing", entry.name);
        devices.push(DeviceDescriptor::new(
            entry.name.clone(),
            entry.description.clone().unwrap_or_default(),
        ));
    }

    devices.sort_by(|a, b| a.name.as_bytes().cmp(b.name.as_bytes()));
    devices
}

/// Enumerate host devices merged with the open-device registry
pub fn enumerate(
    backend: &dyn SerialBackend,
    registry: &OpenRegistry,
    max: usize,
) -> Vec<DeviceDescriptor> {
    let host = backend.enumerate(max);
    debug!(
        "{} backend reported {} device(s)",
        backend.kind().name(),
        host.len()
    );
    merge_open_devices(host, registry, max)
}
