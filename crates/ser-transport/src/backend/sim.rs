//! Simulated host backend
//!
//! An in-memory host with scripted devices, for exercising the transport
//! without hardware. Clones of a [`SimBackend`] share one host, so a test
//! can keep a clone to queue input and inspect output after handing the
//! backend to a manager.
//!
//! # Example
//!
//! ```rust
//! use ser_codec::BreakEncoding;
//! use ser_transport::backend::{SimBackend, SimDevice};
//!
//! let host = SimBackend::new(BreakEncoding::Inline);
//! host.add_device(SimDevice::new("/dev/ttyS0"));
//! host.queue_read("/dev/ttyS0", b"hello");
//! ```

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use ser_codec::BreakEncoding;
use tracing::trace;

use super::{PortIo, RawRead, SerialBackend};
use crate::catalog::DeviceDescriptor;
use crate::config::{BackendKind, SerialConfig, StopBits};
use crate::error::SerialError;

/// Host operations that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    Open,
    Configure,
    Control,
    Read,
    Write,
}

impl SimOp {
    fn routine(&self) -> &'static str {
        match self {
            SimOp::Open => "open",
            SimOp::Configure => "tcsetattr",
            SimOp::Control => "ioctl",
            SimOp::Read => "read",
            SimOp::Write => "write",
        }
    }
}

/// A device on the simulated host
#[derive(Debug, Clone)]
pub struct SimDevice {
    name: String,
    description: String,
    hidden: bool,
    busy: bool,
    dtr_supported: bool,
    fractional_stop_bits: bool,
    max_write: Option<usize>,
}

impl SimDevice {
    /// Create a present, idle device
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            hidden: false,
            busy: false,
            dtr_supported: true,
            fractional_stop_bits: false,
            max_write: None,
        }
    }

    /// Set the description the host reports
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Leave the device out of host enumeration (still openable)
    pub fn hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    /// Held by another process
    pub fn busy(mut self) -> Self {
        self.busy = true;
        self
    }

    /// Device without a DTR line
    pub fn without_dtr(mut self) -> Self {
        self.dtr_supported = false;
        self
    }

    /// Accept 1.5 stop bits
    pub fn with_fractional_stop_bits(mut self) -> Self {
        self.fractional_stop_bits = true;
        self
    }

    /// Accept at most `n` bytes per write
    pub fn with_max_write(mut self, n: usize) -> Self {
        self.max_write = Some(n);
        self
    }
}

#[derive(Debug)]
struct DeviceState {
    spec: SimDevice,
    open: bool,
    reads: VecDeque<(Vec<u8>, bool)>,
    written: Vec<u8>,
    config: Option<SerialConfig>,
    dtr: bool,
    failures: HashMap<SimOp, i32>,
}

#[derive(Debug, Default)]
struct SimHost {
    devices: Vec<DeviceState>,
}

impl SimHost {
    fn device(&self, name: &str) -> Option<&DeviceState> {
        self.devices.iter().find(|d| d.spec.name == name)
    }

    fn device_mut(&mut self, name: &str) -> Option<&mut DeviceState> {
        self.devices.iter_mut().find(|d| d.spec.name == name)
    }
}

impl DeviceState {
    fn take_failure(&mut self, op: SimOp) -> Result<(), SerialError> {
        match self.failures.remove(&op) {
            Some(code) => Err(SerialError::io(op.routine(), code)),
            None => Ok(()),
        }
    }
}

/// Simulated host backend
#[derive(Debug, Clone)]
pub struct SimBackend {
    encoding: BreakEncoding,
    host: Rc<RefCell<SimHost>>,
}

impl SimBackend {
    /// Create an empty host reporting BREAKs with `encoding`
    pub fn new(encoding: BreakEncoding) -> Self {
        Self {
            encoding,
            host: Rc::new(RefCell::new(SimHost::default())),
        }
    }

    /// Plug a device into the host
    pub fn add_device(&self, device: SimDevice) {
        self.host.borrow_mut().devices.push(DeviceState {
            spec: device,
            open: false,
            reads: VecDeque::new(),
            written: Vec::new(),
            config: None,
            dtr: false,
            failures: HashMap::new(),
        });
    }

    /// Queue raw bytes for the device's next read
    pub fn queue_read(&self, name: &str, raw: &[u8]) {
        self.queue(name, raw, false);
    }

    /// Queue raw bytes whose read also reports a side-channel BREAK
    pub fn queue_break_read(&self, name: &str, raw: &[u8]) {
        self.queue(name, raw, true);
    }

    fn queue(&self, name: &str, raw: &[u8], brk: bool) {
        if let Some(dev) = self.host.borrow_mut().device_mut(name) {
            dev.reads.push_back((raw.to_vec(), brk));
        }
    }

    /// Make the next `op` on the device fail with host error `code`
    pub fn fail_next(&self, name: &str, op: SimOp, code: i32) {
        if let Some(dev) = self.host.borrow_mut().device_mut(name) {
            dev.failures.insert(op, code);
        }
    }

    /// Everything written to the device so far
    pub fn written(&self, name: &str) -> Vec<u8> {
        self.host
            .borrow()
            .device(name)
            .map(|d| d.written.clone())
            .unwrap_or_default()
    }

    /// Last configuration applied to the device
    pub fn config(&self, name: &str) -> Option<SerialConfig> {
        self.host.borrow().device(name).and_then(|d| d.config)
    }

    /// Current DTR state
    pub fn dtr(&self, name: &str) -> bool {
        self.host.borrow().device(name).is_some_and(|d| d.dtr)
    }

    /// True while the device is held open
    pub fn is_open(&self, name: &str) -> bool {
        self.host.borrow().device(name).is_some_and(|d| d.open)
    }
}

impl SerialBackend for SimBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::native()
    }

    fn break_encoding(&self) -> BreakEncoding {
        self.encoding
    }

    fn enumerate(&self, max: usize) -> Vec<DeviceDescriptor> {
        self.host
            .borrow()
            .devices
            .iter()
            .filter(|d| !d.spec.hidden)
            .take(max)
            .map(|d| DeviceDescriptor::new(d.spec.name.clone(), d.spec.description.clone()))
            .collect()
    }

    fn open(&self, name: &str) -> Result<Box<dyn PortIo>, SerialError> {
        let mut host = self.host.borrow_mut();
        let dev = host
            .device_mut(name)
            .ok_or_else(|| SerialError::NotFound(name.to_string()))?;

        dev.take_failure(SimOp::Open)?;
        if dev.spec.busy || dev.open {
            return Err(SerialError::Busy(name.to_string()));
        }

        dev.open = true;
        dev.dtr = false;
        trace!("sim: opened {}", name);

        Ok(Box::new(SimPort {
            name: name.to_string(),
            host: Rc::clone(&self.host),
        }))
    }
}

/// An open simulated device
struct SimPort {
    name: String,
    host: Rc<RefCell<SimHost>>,
}

impl SimPort {
    fn with_device<T>(
        &self,
        f: impl FnOnce(&mut DeviceState) -> Result<T, SerialError>,
    ) -> Result<T, SerialError> {
        let mut host = self.host.borrow_mut();
        let dev = host
            .device_mut(&self.name)
            .ok_or_else(|| SerialError::NotFound(self.name.clone()))?;
        f(dev)
    }
}

impl PortIo for SimPort {
    fn configure(&mut self, config: &SerialConfig) -> Result<(), SerialError> {
        config.validate()?;
        self.with_device(|dev| {
            if config.stop_bits == StopBits::OnePointFive && !dev.spec.fractional_stop_bits {
                return Err(SerialError::InvalidArgument(
                    "1.5 stop bits not supported".to_string(),
                ));
            }
            dev.take_failure(SimOp::Configure)?;
            dev.config = Some(*config);
            Ok(())
        })
    }

    fn set_dtr(&mut self, assert: bool) -> Result<(), SerialError> {
        self.with_device(|dev| {
            if !dev.spec.dtr_supported {
                return Err(SerialError::Unsupported("DTR control"));
            }
            dev.take_failure(SimOp::Control)?;
            dev.dtr = assert;
            Ok(())
        })
    }

    fn read_raw(&mut self, buf: &mut [u8]) -> Result<RawRead, SerialError> {
        self.with_device(|dev| {
            dev.take_failure(SimOp::Read)?;
            let Some((mut chunk, brk)) = dev.reads.pop_front() else {
                return Ok(RawRead::empty());
            };
            if chunk.len() > buf.len() {
                let rest = chunk.split_off(buf.len());
                dev.reads.push_front((rest, false));
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(RawRead {
                len: chunk.len(),
                break_reported: brk,
            })
        })
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        self.with_device(|dev| {
            dev.take_failure(SimOp::Write)?;
            let n = dev.spec.max_write.map_or(data.len(), |m| m.min(data.len()));
            dev.written.extend_from_slice(&data[..n]);
            Ok(n)
        })
    }

    fn close(self: Box<Self>) {
        if let Some(dev) = self.host.borrow_mut().device_mut(&self.name) {
            dev.open = false;
            dev.dtr = false;
        }
        trace!("sim: closed {}", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hidden_device_is_not_enumerated_but_opens() {
        let host = SimBackend::new(BreakEncoding::Inline);
        host.add_device(SimDevice::new("/dev/ttyS0"));
        host.add_device(SimDevice::new("/dev/ttyS1").hidden());

        assert_eq!(host.enumerate(64).len(), 1);
        assert!(host.open("/dev/ttyS1").is_ok());
        assert!(host.is_open("/dev/ttyS1"));
    }

    #[test]
    fn test_open_is_exclusive() {
        let host = SimBackend::new(BreakEncoding::Inline);
        host.add_device(SimDevice::new("COM1"));

        let port = host.open("COM1").unwrap();
        assert!(matches!(host.open("COM1"), Err(SerialError::Busy(_))));

        port.close();
        assert!(host.open("COM1").is_ok());
    }

    #[test]
    fn test_read_splits_long_chunks() {
        let host = SimBackend::new(BreakEncoding::SideChannel);
        host.add_device(SimDevice::new("COM1"));
        host.queue_break_read("COM1", b"abcdef");

        let mut port = host.open("COM1").unwrap();
        let mut buf = [0u8; 4];

        let first = port.read_raw(&mut buf).unwrap();
        assert_eq!(first, RawRead { len: 4, break_reported: true });
        assert_eq!(&buf, b"abcd");

        let second = port.read_raw(&mut buf).unwrap();
        assert_eq!(second, RawRead::bytes(2));
        assert_eq!(&buf[..2], b"ef");

        assert_eq!(port.read_raw(&mut buf).unwrap(), RawRead::empty());
    }

    #[test]
    fn test_scripted_failure_fires_once() {
        let host = SimBackend::new(BreakEncoding::Inline);
        host.add_device(SimDevice::new("COM1"));
        host.fail_next("COM1", SimOp::Write, 5);

        let mut port = host.open("COM1").unwrap();
        assert_eq!(port.write(b"x"), Err(SerialError::io("write", 5)));
        assert_eq!(port.write(b"x"), Ok(1));
    }
}
