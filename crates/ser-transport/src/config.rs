//! Line configuration and transport settings

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Character parity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Parity {
    None,
    Even,
    Odd,
    Mark,
    Space,
}

impl Parity {
    /// Single-letter code used in the text form (`8N1`)
    pub fn letter(&self) -> char {
        match self {
            Parity::None => 'N',
            Parity::Even => 'E',
            Parity::Odd => 'O',
            Parity::Mark => 'M',
            Parity::Space => 'S',
        }
    }

    fn from_letter(c: char) -> Option<Self> {
        match c.to_ascii_uppercase() {
            'N' => Some(Parity::None),
            'E' => Some(Parity::Even),
            'O' => Some(Parity::Odd),
            'M' => Some(Parity::Mark),
            'S' => Some(Parity::Space),
            _ => None,
        }
    }
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StopBits {
    One,
    /// Only accepted by backends with fractional stop bit support
    OnePointFive,
    Two,
}

impl StopBits {
    fn as_str(&self) -> &'static str {
        match self {
            StopBits::One => "1",
            StopBits::OnePointFive => "1.5",
            StopBits::Two => "2",
        }
    }
}

/// Baud rate and character framing for a serial line
///
/// `char_size` is deliberately not range-checked on construction; backends
/// reject anything outside 5..=8 with an argument error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialConfig {
    pub baud_rate: u32,
    pub char_size: u8,
    pub parity: Parity,
    pub stop_bits: StopBits,
}

/// Smallest character size a host can be asked for
pub const MIN_CHAR_SIZE: u8 = 5;
/// Largest character size a host can be asked for
pub const MAX_CHAR_SIZE: u8 = 8;

impl SerialConfig {
    /// Create a configuration from its parts
    pub fn new(baud_rate: u32, char_size: u8, parity: Parity, stop_bits: StopBits) -> Self {
        Self {
            baud_rate,
            char_size,
            parity,
            stop_bits,
        }
    }

    /// Check the values every backend validates locally
    pub fn validate(&self) -> Result<(), crate::SerialError> {
        if self.baud_rate == 0 {
            return Err(crate::SerialError::InvalidArgument(
                "baud rate must be positive".to_string(),
            ));
        }
        if !(MIN_CHAR_SIZE..=MAX_CHAR_SIZE).contains(&self.char_size) {
            return Err(crate::SerialError::InvalidArgument(format!(
                "character size {} outside {}..={}",
                self.char_size, MIN_CHAR_SIZE, MAX_CHAR_SIZE
            )));
        }
        Ok(())
    }
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self::new(9600, 8, Parity::None, StopBits::One)
    }
}

impl fmt::Display for SerialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}{}{}",
            self.baud_rate,
            self.char_size,
            self.parity.letter(),
            self.stop_bits.as_str()
        )
    }
}

/// Errors from parsing the `9600-8N1` text form
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigParseError {
    /// Missing the `-` between baud rate and framing
    #[error("expected <baud>-<size><parity><stop>, got {0:?}")]
    Malformed(String),

    /// Baud rate is not a positive integer
    #[error("invalid baud rate: {0:?}")]
    InvalidBaud(String),

    /// Character size is not a digit
    #[error("invalid character size: {0:?}")]
    InvalidCharSize(String),

    /// Unknown parity letter
    #[error("invalid parity: {0:?}")]
    InvalidParity(char),

    /// Stop bits other than 1, 1.5 or 2
    #[error("invalid stop bits: {0:?}")]
    InvalidStopBits(String),
}

impl FromStr for SerialConfig {
    type Err = ConfigParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (baud, framing) = s
            .split_once('-')
            .ok_or_else(|| ConfigParseError::Malformed(s.to_string()))?;

        let baud_rate = baud
            .parse::<u32>()
            .ok()
            .filter(|b| *b > 0)
            .ok_or_else(|| ConfigParseError::InvalidBaud(baud.to_string()))?;

        let mut chars = framing.chars();
        let size = chars
            .next()
            .ok_or_else(|| ConfigParseError::Malformed(s.to_string()))?;
        let char_size = size
            .to_digit(10)
            .map(|d| d as u8)
            .ok_or_else(|| ConfigParseError::InvalidCharSize(size.to_string()))?;

        let parity_char = chars
            .next()
            .ok_or_else(|| ConfigParseError::Malformed(s.to_string()))?;
        let parity = Parity::from_letter(parity_char)
            .ok_or(ConfigParseError::InvalidParity(parity_char))?;

        let stop_bits = match chars.as_str() {
            "1" => StopBits::One,
            "1.5" => StopBits::OnePointFive,
            "2" => StopBits::Two,
            other => return Err(ConfigParseError::InvalidStopBits(other.to_string())),
        };

        Ok(Self::new(baud_rate, char_size, parity, stop_bits))
    }
}

/// Which host backend a transport drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// POSIX terminal devices
    Termios,
    /// Windows comm API with registry enumeration
    Windows,
    /// No serial support on this host
    Unsupported,
}

impl BackendKind {
    /// The backend native to the build target
    pub fn native() -> Self {
        if cfg!(windows) {
            BackendKind::Windows
        } else if cfg!(unix) {
            BackendKind::Termios
        } else {
            BackendKind::Unsupported
        }
    }

    /// Returns a human-readable name for the backend
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Termios => "termios",
            BackendKind::Windows => "windows",
            BackendKind::Unsupported => "unsupported",
        }
    }
}

impl Default for BackendKind {
    fn default() -> Self {
        Self::native()
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "termios" => Ok(BackendKind::Termios),
            "windows" => Ok(BackendKind::Windows),
            "unsupported" | "none" => Ok(BackendKind::Unsupported),
            other => Err(format!("unknown backend: {}", other)),
        }
    }
}

/// Settings for a transport instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    /// Upper bound on catalog size used for name resolution
    pub max_devices: usize,
    /// Backend to drive
    pub backend: BackendKind,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            max_devices: crate::catalog::SER_MAX_DEVICES,
            backend: BackendKind::native(),
        }
    }
}
