//! Name resolution
//!
//! Turns a user-supplied port name into a canonical host device name.
//! Forms are tried in order, first match wins:
//!
//! 1. `serN` / `serNN` (case-insensitive): index into the device catalog
//! 2. a device description, matched case-insensitively over its full length
//! 3. a device name, matched case-insensitively over its full length
//! 4. anything else is taken literally as a host device name
//!
//! Case folding is ASCII-only so resolution behaves the same on every host.

use tracing::debug;

use crate::catalog::DeviceDescriptor;
use crate::error::SerialError;

/// A resolved device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Canonical host device name
    pub name: String,
    /// Description, when one is known
    pub description: Option<String>,
}

/// Parse the `serN` / `serNN` indexed form
pub fn parse_index(user_name: &str) -> Option<usize> {
    let bytes = user_name.as_bytes();
    if bytes.len() < 4 || bytes.len() > 5 {
        return None;
    }
    if !bytes[..3].eq_ignore_ascii_case(b"ser") {
        return None;
    }
    let digits = &bytes[3..];
    if !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    digits
        .iter()
        .try_fold(0usize, |acc, d| Some(acc * 10 + usize::from(d - b'0')))
}

/// Resolve `user_name` against a catalog snapshot
///
/// Fails with [`SerialError::NotFound`] for an out-of-range index or an
/// empty name.
pub fn resolve(user_name: &str, catalog: &[DeviceDescriptor]) -> Result<Resolved, SerialError> {
    if user_name.is_empty() {
        return Err(SerialError::NotFound(String::new()));
    }

    if let Some(index) = parse_index(user_name) {
        let device = catalog
            .get(index)
            .ok_or_else(|| SerialError::NotFound(user_name.to_string()))?;
        debug!("Resolved {} to {}", user_name, device.name);
        return Ok(Resolved {
            name: device.name.clone(),
            description: device.description().map(str::to_string),
        });
    }

    // The caller's spelling of the description is kept
    if let Some(device) = catalog
        .iter()
        .find(|d| eq_ignore_case(&d.description, user_name))
    {
        debug!("Resolved description {:?} to {}", user_name, device.name);
        return Ok(Resolved {
            name: device.name.clone(),
            description: Some(user_name.to_string()),
        });
    }

    if let Some(device) = catalog.iter().find(|d| eq_ignore_case(&d.name, user_name)) {
        return Ok(Resolved {
            name: device.name.clone(),
            description: device.description().map(str::to_string),
        });
    }

    Ok(Resolved {
        name: user_name.to_string(),
        description: None,
    })
}

/// Full-length ASCII case-insensitive comparison
///
/// Embedded NULs are compared like any other byte.
fn eq_ignore_case(a: &str, b: &str) -> bool {
    a.len() == b.len() && a.as_bytes().eq_ignore_ascii_case(b.as_bytes())
}
