//! # Error Types
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are
//! tagged kinds rather than opaque strings so callers can branch on the
//! condition (a duplicate key during insert is ordinary control flow for an
//! upsert path, while corruption is fatal).
//!
//! The core performs no retries, no local recovery and no logging of
//! failures; everything propagates to the caller. Cursors held across a
//! failed mutation are invalid and must be discarded.

use std::io;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Insert positioned on a leaf slot that already holds the key.
    #[error("duplicate key")]
    DuplicateKey,

    /// Update or remove positioned on a leaf slot without a matching key.
    #[error("key not found")]
    KeyNotFound,

    /// The cursor is past the end of the tree and the operation is
    /// undefined there.
    #[error("cursor is past the end of the tree")]
    PastEnd,

    /// A node or header read off disk cannot be reconciled with its own
    /// size fields, or violates a structural invariant.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A caller-supplied argument has the wrong shape (entry size mismatch,
    /// span too short for the requested access).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The underlying filesystem failed.
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    /// A block or slot could not be allocated.
    #[error("out of space")]
    OutOfSpace,
}

impl Error {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    pub(crate) fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_errors_convert() {
        fn fails() -> Result<()> {
            Err(io::Error::new(io::ErrorKind::NotFound, "gone"))?;
            Ok(())
        }

        match fails() {
            Err(Error::Io(e)) => assert_eq!(e.kind(), io::ErrorKind::NotFound),
            other => panic!("expected Io error, got {:?}", other),
        }
    }

    #[test]
    fn display_includes_detail() {
        let err = Error::corruption("entry count 9 does not fit buffer");
        assert!(err.to_string().contains("entry count 9"));
    }
}
