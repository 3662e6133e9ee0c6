//! Fixed-length random correlation identifiers.
//!
//! A message id is 10 opaque bytes on the wire. For pub/sub routing and
//! logging it is rendered into a printable alphabet: each byte's low six
//! bits select a digit or lowercase letter (0-35), an uppercase letter
//! (36-61), or one of the two reserved punctuation symbols (`_` for 62,
//! `-` for 63). A zero value renders to nothing, so generation retries
//! until every byte contributes exactly one character.

use std::fmt;

use rand::RngCore;

/// Raw length of a message id on the wire.
pub const MESSAGE_ID_LEN: usize = 10;

const ALPHABET: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Opaque 10-byte correlation token.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageId([u8; MESSAGE_ID_LEN]);

impl MessageId {
    /// Generate a fresh random id from a cryptographically-sound source.
    ///
    /// Regenerates until the printable rendering is exactly
    /// [`MESSAGE_ID_LEN`] characters long.
    pub fn random() -> Self {
        let mut raw = [0u8; MESSAGE_ID_LEN];
        let mut rng = rand::rng();
        loop {
            rng.fill_bytes(&mut raw);
            if raw.iter().all(|b| b & 0x3f != 0) {
                return Self(raw);
            }
        }
    }

    /// Wrap raw wire bytes.
    pub const fn from_bytes(raw: [u8; MESSAGE_ID_LEN]) -> Self {
        Self(raw)
    }

    /// The raw wire bytes.
    pub const fn as_bytes(&self) -> &[u8; MESSAGE_ID_LEN] {
        &self.0
    }

    /// Printable rendering, used as the correlation topic.
    pub fn render(&self) -> String {
        render_bytes(&self.0)
    }
}

impl fmt::Debug for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MessageId({})", self.render())
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

/// Render raw id bytes into the printable alphabet.
///
/// Bytes whose low six bits are zero render to nothing, so the output may
/// be shorter than the input; [`MessageId::random`] guards against that
/// for generated ids.
pub fn render_bytes(raw: &[u8]) -> String {
    let mut out = String::with_capacity(raw.len());
    for &b in raw {
        let t = b & 0x3f;
        if t == 0 {
            // zero-width
        } else if t < 36 {
            out.push(ALPHABET[t as usize] as char);
        } else if t < 62 {
            out.push((ALPHABET[(t - 26) as usize] as char).to_ascii_uppercase());
        } else if t == 62 {
            out.push('_');
        } else {
            out.push('-');
        }
    }
    out
}
