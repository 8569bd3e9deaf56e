//! Wire protocol helpers for zxlink host↔device communication.
//!
//! Two protocols share one serial link:
//!
//! - the firmware's **line-command** protocol: a request line terminated
//!   by `\r`, answered with one JSON value per line ([`encode_request`],
//!   [`decode_response`]);
//! - the MicroPython **raw REPL**, driven with control bytes
//!   ([`control`]) and fed generated scripts ([`script`]) whose file
//!   uploads are split into independently encoded [`Chunk`]s.
//!
//! Everything here is pure and synchronous; I/O lives in `zxlink`.

mod chunk;
mod codec;
pub mod control;
pub mod script;

pub use chunk::{CHUNK_SIZE, Chunk, escape_literal};
pub use codec::{Param, ResponseError, decode_response, encode_param, encode_request};
