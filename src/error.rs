//! Crate-wide error type.
//!
//! Structural problems found while parsing or patching an archive are
//! [`Error::CorruptArchive`] and carry the byte offset where they were
//! detected. Path misses are [`Error::NotFound`] and are always recoverable.

use std::io;
use thiserror::Error;

use crate::codec::CodecError;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Corrupt archive at offset {offset}: {detail}")]
    CorruptArchive { offset: u64, detail: String },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Codec failure: {0}")]
    Codec(#[from] CodecError),

    #[error("No bundle could be opened to receive new data")]
    NoValidBundle,

    #[error("Invalid argument: {0}")]
    ArgumentInvalid(String),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub fn corrupt(offset: u64, detail: impl Into<String>) -> Self {
        Error::CorruptArchive { offset, detail: detail.into() }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Error::NotFound(path.into())
    }

    /// `true` for errors a caller can reasonably skip over during a batch.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn corrupt_message_carries_offset() {
        let e = Error::corrupt(0x1234, "unknown tag");
        assert_eq!(e.to_string(), "Corrupt archive at offset 4660: unknown tag");
        assert!(!e.is_recoverable());
    }

    #[test]
    fn io_and_codec_errors_convert() {
        let e: Error = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert!(matches!(e, Error::Io(_)));
        let e: Error = CodecError::SizeMismatch { expected: 4, actual: 3 }.into();
        assert!(matches!(e, Error::Codec(_)));
        assert!(Error::not_found("a/b").is_recoverable());
    }
}
