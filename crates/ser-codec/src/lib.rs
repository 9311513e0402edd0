//! Serial Stream Decoding Library
//!
//! Raw-mode serial reads do not always deliver clean character data. Line
//! conditions such as BREAK and framing/parity errors are reported either
//! inline, as reserved marker sequences interleaved with the data, or on a
//! side channel that only says "a BREAK happened during this read".
//!
//! This crate recovers a clean character sequence plus a parallel set of
//! BREAK flags from either form:
//!
//! - **Inline** ([`inline`]): `FF FF` is a literal `FF`, `FF 00 cc` is the
//!   byte `cc` received with a line error, and `FF 00 00` is a BREAK.
//! - **Side channel** ([`side_channel`]): the host reports a BREAK without a
//!   position, so the flag is attached to the first NUL in the read (or to
//!   the first character when there is no NUL).
//!
//! The encoding is a property of the host backend and is chosen once, not
//! per read.
//!
//! # Example
//!
//! ```rust
//! use ser_codec::{decode, BreakEncoding};
//!
//! let decoded = decode(BreakEncoding::Inline, &[0x41, 0xFF, 0x00, 0x00, 0x42], false);
//!
//! assert_eq!(decoded.data(), &[0x41, 0x00, 0x42]);
//! assert_eq!(decoded.break_positions().collect::<Vec<_>>(), vec![1]);
//! ```

pub mod inline;
pub mod side_channel;

pub use inline::{decode_inline, ESCAPE, LINE_ERROR};
pub use side_channel::decode_side_channel;

/// How a backend reports out-of-band line conditions in its read output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum BreakEncoding {
    /// Marker sequences are interleaved with the data (termios `PARMRK`)
    Inline,
    /// The host flags a BREAK for the whole read with no position
    SideChannel,
}

impl BreakEncoding {
    /// Returns a human-readable name for the encoding
    pub fn name(&self) -> &'static str {
        match self {
            BreakEncoding::Inline => "inline markers",
            BreakEncoding::SideChannel => "side channel",
        }
    }
}

/// Clean character data recovered from one raw read
///
/// `breaks` always has exactly one slot per byte in `data`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Decoded {
    data: Vec<u8>,
    breaks: Vec<bool>,
}

impl Decoded {
    /// Create an empty result with room for `capacity` characters
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            data: Vec::with_capacity(capacity),
            breaks: Vec::with_capacity(capacity),
        }
    }

    /// Append one decoded character
    pub fn push(&mut self, byte: u8, brk: bool) {
        self.data.push(byte);
        self.breaks.push(brk);
    }

    /// Decoded character data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// BREAK flags, aligned with [`Decoded::data`]
    pub fn breaks(&self) -> &[bool] {
        &self.breaks
    }

    /// Number of decoded characters
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if nothing was decoded
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// True if any decoded character coincided with a BREAK
    pub fn has_break(&self) -> bool {
        self.breaks.iter().any(|b| *b)
    }

    /// Output positions carrying a BREAK flag
    pub fn break_positions(&self) -> impl Iterator<Item = usize> + '_ {
        self.breaks
            .iter()
            .enumerate()
            .filter_map(|(i, b)| b.then_some(i))
    }

    /// Split into the character data and the BREAK flags
    pub fn into_parts(self) -> (Vec<u8>, Vec<bool>) {
        (self.data, self.breaks)
    }

    pub(crate) fn set_break(&mut self, position: usize) {
        if let Some(flag) = self.breaks.get_mut(position) {
            *flag = true;
        }
    }
}

/// Decode one raw read using the given encoding
///
/// `break_reported` is the side-channel BREAK indication and is ignored by
/// the inline encoding, which carries BREAKs in the data itself.
pub fn decode(encoding: BreakEncoding, raw: &[u8], break_reported: bool) -> Decoded {
    match encoding {
        BreakEncoding::Inline => decode_inline(raw),
        BreakEncoding::SideChannel => decode_side_channel(raw, break_reported),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_dispatches_on_encoding() {
        let raw = [0x10, 0xFF, 0xFF, 0x00];

        let inline = decode(BreakEncoding::Inline, &raw, true);
        assert_eq!(inline.data(), &[0x10, 0xFF, 0x00]);
        assert!(!inline.has_break());

        let side = decode(BreakEncoding::SideChannel, &raw, true);
        assert_eq!(side.data(), &raw);
        assert_eq!(side.break_positions().collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_set_break_out_of_range_is_ignored() {
        let mut decoded = Decoded::with_capacity(1);
        decoded.push(b'a', false);
        decoded.set_break(5);
        assert!(!decoded.has_break());
    }

    #[test]
    fn test_into_parts_keeps_alignment() {
        let mut decoded = Decoded::default();
        decoded.push(0x00, true);
        decoded.push(0x41, false);

        let (data, breaks) = decoded.into_parts();
        assert_eq!(data, vec![0x00, 0x41]);
        assert_eq!(breaks, vec![true, false]);
    }
}
