//! Session manager
//!
//! Owns the backend, the open-device registry and every open
//! [`PortSession`]. This is the boundary a multiplexer drives: ports are
//! addressed by [`PortHandle`] and every failure passes through
//! [`diagnostics::observe`] exactly once, so only unexpected host errors are
//! logged.

use std::collections::HashMap;

use ser_codec::{BreakEncoding, Decoded};
use tracing::{debug, info};

use crate::backend::{create_backend, SerialBackend};
use crate::catalog::{self, DeviceDescriptor};
use crate::config::{BackendKind, SerialConfig, TransportSettings};
use crate::diagnostics;
use crate::error::SerialError;
use crate::registry::{LineRef, OpenRegistry, PortHandle};
use crate::resolver::{self, Resolved};
use crate::session::PortSession;

/// An open port, for display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenPortInfo {
    /// Line the port is attached to
    pub line: LineRef,
    /// Canonical device name
    pub name: String,
    /// Description recorded at open
    pub description: Option<String>,
}

/// Serial transport for a single thread of control
pub struct SerialManager {
    backend: Box<dyn SerialBackend>,
    registry: OpenRegistry,
    sessions: HashMap<PortHandle, PortSession>,
    next_handle: u32,
    max_devices: usize,
}

impl SerialManager {
    /// Create a manager over `backend` with the default catalog bound
    pub fn new(backend: Box<dyn SerialBackend>) -> Self {
        Self {
            backend,
            registry: OpenRegistry::new(),
            sessions: HashMap::new(),
            next_handle: 1,
            max_devices: catalog::SER_MAX_DEVICES,
        }
    }

    /// Create a manager from settings, selecting the backend they name
    pub fn with_settings(settings: &TransportSettings) -> Self {
        let mut manager = Self::new(create_backend(settings.backend));
        manager.max_devices = settings.max_devices;
        manager
    }

    /// Which backend is in use
    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    /// False when serial support is inhibited on this host
    pub fn is_supported(&self) -> bool {
        self.backend.kind() != BackendKind::Unsupported
    }

    pub fn break_encoding(&self) -> BreakEncoding {
        self.backend.break_encoding()
    }

    /// Catalog bound used for name resolution
    pub fn max_devices(&self) -> usize {
        self.max_devices
    }

    /// The open-device registry
    pub fn registry(&self) -> &OpenRegistry {
        &self.registry
    }

    /// Number of open ports
    pub fn open_count(&self) -> usize {
        self.sessions.len()
    }

    /// List up to `max` devices, open ports included, sorted by name
    pub fn list_devices(&self, max: usize) -> Vec<DeviceDescriptor> {
        catalog::enumerate(self.backend.as_ref(), &self.registry, max)
    }

    /// Resolve a user-supplied name to a canonical device name
    pub fn resolve(&self, user_name: &str) -> Result<Resolved, SerialError> {
        let devices = self.list_devices(self.max_devices);
        resolver::resolve(user_name, &devices)
    }

    /// Resolve `user_name`, open the device and attach it to `line`
    ///
    /// The registry only gains an entry when the open succeeds.
    pub fn resolve_and_open(
        &mut self,
        user_name: &str,
        line: LineRef,
    ) -> Result<PortHandle, SerialError> {
        let resolved = self.resolve(user_name).map_err(diagnostics::observe)?;

        let io = self
            .backend
            .open(&resolved.name)
            .map_err(diagnostics::observe)?;

        let handle = self.allocate_handle();
        self.registry.register(
            handle,
            line.clone(),
            resolved.name.clone(),
            resolved.description.clone(),
        );
        self.sessions.insert(
            handle,
            PortSession::new(resolved.name.clone(), io, self.backend.break_encoding()),
        );

        info!("{} opened {} as {}", line, resolved.name, handle);
        Ok(handle)
    }

    fn allocate_handle(&mut self) -> PortHandle {
        loop {
            let handle = PortHandle(self.next_handle);
            self.next_handle = self.next_handle.wrapping_add(1).max(1);
            if !self.sessions.contains_key(&handle) {
                return handle;
            }
        }
    }

    fn session_mut(&mut self, handle: PortHandle) -> Result<&mut PortSession, SerialError> {
        self.sessions
            .get_mut(&handle)
            .ok_or(SerialError::UnknownHandle(handle))
    }

    /// Apply baud rate and framing to an open port
    pub fn configure(
        &mut self,
        handle: PortHandle,
        config: &SerialConfig,
    ) -> Result<(), SerialError> {
        self.session_mut(handle)?
            .configure(config)
            .map_err(diagnostics::observe)
    }

    /// Assert or de-assert DTR; false when the line could not be changed
    pub fn control(&mut self, handle: PortHandle, assert: bool) -> bool {
        let result = self
            .session_mut(handle)
            .and_then(|session| session.set_dtr(assert))
            .map_err(diagnostics::observe);

        match result {
            Ok(()) => true,
            Err(e) => {
                debug!("DTR change on {} failed: {}", handle, e);
                false
            }
        }
    }

    /// Poll for input, decoded; empty when nothing is available
    pub fn poll_read(
        &mut self,
        handle: PortHandle,
        max_count: usize,
    ) -> Result<Decoded, SerialError> {
        self.session_mut(handle)?
            .read(max_count)
            .map_err(diagnostics::observe)
    }

    /// Write what the host accepts; a short count is a success
    pub fn write(&mut self, handle: PortHandle, data: &[u8]) -> Result<usize, SerialError> {
        self.session_mut(handle)?
            .write(data)
            .map_err(diagnostics::observe)
    }

    /// Close a port and drop its registry entry
    ///
    /// Unknown or already closed handles are ignored.
    pub fn close(&mut self, handle: PortHandle) {
        if let Some(session) = self.sessions.remove(&handle) {
            info!("Closing {} ({})", session.name(), handle);
            session.close();
        }
        self.registry.unregister(handle);
    }

    /// Close every open port
    pub fn close_all(&mut self) {
        let handles: Vec<PortHandle> = self.registry.iter().map(|e| e.handle).collect();
        for handle in handles {
            self.close(handle);
        }
    }

    /// Open ports in the order they were opened
    pub fn describe_open_ports(&self) -> Vec<OpenPortInfo> {
        self.registry
            .iter()
            .map(|entry| OpenPortInfo {
                line: entry.owning_line.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
            })
            .collect()
    }
}

impl Drop for SerialManager {
    fn drop(&mut self) {
        self.close_all();
    }
}

impl std::fmt::Debug for SerialManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialManager")
            .field("backend", &self.backend.kind())
            .field("open", &self.registry.len())
            .field("max_devices", &self.max_devices)
            .finish()
    }
}
