//! Inline marker decoding
//!
//! With termios `PARMRK` set and `IGNBRK`/`BRKINT` cleared, the host marks
//! line conditions in the byte stream itself:
//!
//! | Raw bytes    | Meaning                                   | Output |
//! |--------------|-------------------------------------------|--------|
//! | `FF FF`      | a literal `FF` data byte                  | `FF`   |
//! | `FF 00 cc`   | byte `cc` received with a framing/parity error | `cc` |
//! | `FF 00 00`   | a BREAK condition                         | `00` + BREAK flag |
//!
//! Every other byte passes through unchanged. A marker that is cut off by
//! the end of the read (`FF` or `FF 00` as the final bytes) is passed
//! through unresolved.

use tracing::trace;

use crate::Decoded;

/// Reserved marker byte introducing an escape sequence
pub const ESCAPE: u8 = 0xFF;

/// Second byte of a line-error sequence (`FF 00 cc`)
pub const LINE_ERROR: u8 = 0x00;

/// Decode a raw read that carries inline marker sequences
///
/// The output never has more characters than `raw` has bytes, and BREAK
/// flags are indexed by output position.
pub fn decode_inline(raw: &[u8]) -> Decoded {
    let mut out = Decoded::with_capacity(raw.len());
    let mut i = 0;

    while i < raw.len() {
        let byte = raw[i];

        if byte != ESCAPE {
            out.push(byte, false);
            i += 1;
            continue;
        }

        match (raw.get(i + 1), raw.get(i + 2)) {
            (Some(&ESCAPE), _) => {
                out.push(ESCAPE, false);
                i += 2;
            }
            (Some(&LINE_ERROR), Some(&payload)) => {
                let brk = payload == 0;
                if brk {
                    trace!("BREAK at output position {}", out.len());
                } else {
                    trace!("Line error on byte 0x{:02X}", payload);
                }
                out.push(payload, brk);
                i += 3;
            }
            _ => {
                // Lone marker, or a sequence split across reads
                out.push(byte, false);
                i += 1;
            }
        }
    }

    out
}
