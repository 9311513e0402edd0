//! Open-device registry
//!
//! Records which ports this process currently holds open and which logical
//! line owns each one. The catalog merges these entries into host
//! enumeration, and display code lists them. The registry is owned by the
//! [`SerialManager`](crate::SerialManager) rather than being global, and is
//! not synchronized: one thread of control drives it.

use std::fmt;

/// Opaque identifier for an open port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PortHandle(pub u32);

impl PortHandle {
    /// Get the raw handle value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for PortHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of the caller-owned logical line a port is attached to
///
/// This is a plain identity, not a reference: the registry never owns or
/// keeps alive the line it names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LineRef {
    /// Name of the owning multiplexer device
    pub device: String,
    /// Line number within that device
    pub line: usize,
}

impl LineRef {
    /// Create a line identity
    pub fn new(device: impl Into<String>, line: usize) -> Self {
        Self {
            device: device.into(),
            line,
        }
    }
}

impl fmt::Display for LineRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\tLn{:02}", self.device, self.line)
    }
}

/// One currently open port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenDeviceEntry {
    pub handle: PortHandle,
    pub owning_line: LineRef,
    /// Canonical device name
    pub name: String,
    /// Description known at open time
    pub description: Option<String>,
}

/// Ordered list of open ports
#[derive(Debug, Default)]
pub struct OpenRegistry {
    entries: Vec<OpenDeviceEntry>,
}

impl OpenRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a newly opened port
    ///
    /// Always appends; opening the same name twice is refused by the host,
    /// not here.
    pub fn register(
        &mut self,
        handle: PortHandle,
        owning_line: LineRef,
        name: impl Into<String>,
        description: Option<String>,
    ) {
        self.entries.push(OpenDeviceEntry {
            handle,
            owning_line,
            name: name.into(),
            description,
        });
    }

    /// Remove the first entry for `handle`, keeping the others in order
    ///
    /// Returns the removed entry; an unknown handle is a no-op.
    pub fn unregister(&mut self, handle: PortHandle) -> Option<OpenDeviceEntry> {
        let index = self.entries.iter().position(|e| e.handle == handle)?;
        Some(self.entries.remove(index))
    }

    /// Description recorded for an open device, by exact name
    pub fn find_description(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .and_then(|e| e.description.as_deref())
    }

    /// Entry for a handle
    pub fn get(&self, handle: PortHandle) -> Option<&OpenDeviceEntry> {
        self.entries.iter().find(|e| e.handle == handle)
    }

    /// Iterate entries in registration order
    pub fn iter(&self) -> impl Iterator<Item = &OpenDeviceEntry> {
        self.entries.iter()
    }

    /// Number of open ports
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no port is open
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
