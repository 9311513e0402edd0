//! Side-channel BREAK attribution
//!
//! Some hosts (the Windows comm API) report a BREAK as an error flag for the
//! whole read rather than in the data. The flag carries no position, so it is
//! attached to the first NUL in the read, since a BREAK is normally received
//! as a NUL character. With no NUL present it goes on the first character.
//!
//! This is an approximation and is kept as-is: the host offers nothing finer.

use tracing::debug;

use crate::Decoded;

/// Decode a raw read whose BREAK indication arrived separately
///
/// The data is returned unchanged.
pub fn decode_side_channel(raw: &[u8], break_reported: bool) -> Decoded {
    let mut out = Decoded::with_capacity(raw.len());
    for &byte in raw {
        out.push(byte, false);
    }

    if break_reported {
        if raw.is_empty() {
            debug!("BREAK reported on an empty read; no character to flag");
        } else {
            let position = raw.iter().position(|&b| b == 0).unwrap_or(0);
            out.set_break(position);
        }
    }

    out
}
