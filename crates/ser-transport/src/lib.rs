//! Serial Port Transport
//!
//! Host-independent access to serial devices for a terminal multiplexer:
//! a device catalog, name resolution, an open-device registry, per-port
//! sessions and a single diagnostic reporting boundary.
//!
//! # Architecture
//!
//! A [`SerialManager`] owns one [`SerialBackend`] chosen at startup:
//!
//! - **Termios**: POSIX terminals, BREAKs reported inline
//! - **Windows**: the comm API, BREAKs reported on a side channel
//! - **Unsupported**: no devices, every open fails with `NotFound`
//!
//! Reads are non-blocking and come back decoded by `ser_codec`, with one
//! BREAK flag per character. Only unexpected host failures are logged;
//! not-found, busy and argument errors are ordinary return values.
//!
//! # Example
//!
//! ```rust,no_run
//! use ser_transport::{LineRef, SerialConfig, SerialManager, TransportSettings};
//!
//! let mut serial = SerialManager::with_settings(&TransportSettings::default());
//!
//! for (i, device) in serial.list_devices(64).iter().enumerate() {
//!     println!("ser{} {}", i, device.name);
//! }
//!
//! let port = serial.resolve_and_open("ser0", LineRef::new("MUX", 0))?;
//! serial.configure(port, &"9600-8N1".parse::<SerialConfig>()?)?;
//! serial.control(port, true);
//!
//! let input = serial.poll_read(port, 256)?;
//! for pos in input.break_positions() {
//!     println!("BREAK at {}", pos);
//! }
//! serial.close(port);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod backend;
pub mod catalog;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod session;

pub use backend::{create_backend, PortIo, RawRead, SerialBackend};
pub use catalog::{DeviceDescriptor, SER_MAX_DEVICES};
pub use config::{BackendKind, ConfigParseError, Parity, SerialConfig, StopBits, TransportSettings};
pub use error::SerialError;
pub use manager::{OpenPortInfo, SerialManager};
pub use registry::{LineRef, OpenDeviceEntry, OpenRegistry, PortHandle};
pub use resolver::Resolved;
pub use session::{PortSession, MAX_READ_CHUNK};

// Decoded reads are part of this crate's API
pub use ser_codec::{BreakEncoding, Decoded};
