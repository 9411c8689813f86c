//! Incremental decoder for `multipart/form-data` query streams.
//!
//! The query endpoint answers with an unbounded body made of parts:
//!
//! ```text
//! --boundary\r\n
//! Content-Length: 42\r\n
//! \r\n
//! {"meta":{"event":"StreamData", ...}}
//! ```
//!
//! Network reads do not line up with part boundaries, so [`FrameDecoder`]
//! keeps only the unconsumed tail between calls and hands out every part that
//! has fully arrived as a decoded JSON [`Frame`].

pub mod cursor;
mod decoder;
mod encode;

pub use decoder::{DecodeError, DecoderStats, Frame, FrameDecoder, DEFAULT_BOUNDARY};
pub use encode::{encode_json_part, encode_part};
