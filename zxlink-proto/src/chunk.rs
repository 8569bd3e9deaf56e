//! Per-chunk upload encoding.
//!
//! Each chunk of an upload travels as either a hex string decoded on the
//! device (`wh('…')`) or a Python byte literal (`wb(b'…')`), whichever
//! encoded form is shorter. Only the encoded string lengths are compared.

/// Upload chunk size in bytes.
pub const CHUNK_SIZE: usize = 128;

/// One encoded upload chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Chunk {
    /// Lowercase hex digits, two per byte.
    Hex(String),
    /// Body of a Python `b'…'` literal.
    Literal(String),
}

impl Chunk {
    /// Encodes `data`, picking the literal form only when strictly shorter.
    pub fn encode(data: &[u8]) -> Self {
        let hex = hex::encode(data);
        let literal = escape_literal(data);
        if literal.len() < hex.len() {
            Self::Literal(literal)
        } else {
            Self::Hex(hex)
        }
    }

    /// The remote write call for this chunk, ready to submit.
    ///
    /// `wb` and `wh` are bound by [`crate::script::open_upload`].
    pub fn to_call(&self) -> String {
        match self {
            Self::Hex(h) => format!("wh('{h}')\r"),
            Self::Literal(l) => format!("wb(b'{l}')\r"),
        }
    }

    /// Whether the literal encoding was chosen.
    pub const fn is_literal(&self) -> bool {
        matches!(self, Self::Literal(_))
    }
}

/// Escapes bytes for the body of a single-quoted Python byte literal.
///
/// Quote and backslash get a backslash prefix; bytes outside 0x20..=0x7E
/// become `\xNN`.
pub fn escape_literal(data: &[u8]) -> String {
    let mut out = String::with_capacity(data.len());
    for &b in data {
        match b {
            b'\'' | b'\\' => {
                out.push('\\');
                out.push(char::from(b));
            }
            0x20..=0x7E => out.push(char::from(b)),
            _ => {
                out.push_str("\\x");
                out.push_str(&hex::encode([b]));
            }
        }
    }
    out
}
