//! Port session
//!
//! One open device plus the BREAK encoding of the backend that opened it.
//! Reads come back decoded.

use ser_codec::{BreakEncoding, Decoded};
use tracing::trace;

use crate::backend::PortIo;
use crate::config::SerialConfig;
use crate::error::SerialError;

/// Largest raw read a single poll asks the host for
pub const MAX_READ_CHUNK: usize = 64 * 1024;

/// An open port, exclusively owning its host device
pub struct PortSession {
    name: String,
    io: Box<dyn PortIo>,
    encoding: BreakEncoding,
    config: Option<SerialConfig>,
}

impl PortSession {
    pub fn new(name: impl Into<String>, io: Box<dyn PortIo>, encoding: BreakEncoding) -> Self {
        Self {
            name: name.into(),
            io,
            encoding,
            config: None,
        }
    }

    /// Canonical device name
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn encoding(&self) -> BreakEncoding {
        self.encoding
    }

    /// Last configuration the host accepted
    pub fn config(&self) -> Option<&SerialConfig> {
        self.config.as_ref()
    }

    pub fn configure(&mut self, config: &SerialConfig) -> Result<(), SerialError> {
        self.io.configure(config)?;
        self.config = Some(*config);
        Ok(())
    }

    pub fn set_dtr(&mut self, assert: bool) -> Result<(), SerialError> {
        self.io.set_dtr(assert)
    }

    /// Read up to `max_count` raw bytes and decode them
    ///
    /// Returns an empty [`Decoded`] when nothing is available. At most
    /// [`MAX_READ_CHUNK`] bytes are read per call.
    pub fn read(&mut self, max_count: usize) -> Result<Decoded, SerialError> {
        let want = max_count.min(MAX_READ_CHUNK);
        if want == 0 {
            return Ok(Decoded::default());
        }

        let mut raw = vec![0u8; want];
        let got = self.io.read_raw(&mut raw)?;
        let len = got.len.min(want);

        let decoded = ser_codec::decode(self.encoding, &raw[..len], got.break_reported);
        if !decoded.is_empty() {
            trace!(
                "{}: read {} raw bytes, {} decoded",
                self.name,
                len,
                decoded.len()
            );
        }
        Ok(decoded)
    }

    /// Best-effort write; a short count is not an error
    pub fn write(&mut self, data: &[u8]) -> Result<usize, SerialError> {
        self.io.write(data)
    }

    /// Release the host device
    pub fn close(self) {
        self.io.close();
    }
}

impl std::fmt::Debug for PortSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortSession")
            .field("name", &self.name)
            .field("encoding", &self.encoding)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
