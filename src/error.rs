//! Error taxonomy for the segmented log.

use std::fmt;
use std::io;

/// Errors produced by the storage engine.
///
/// This mirrors the taxonomy of the design rather than any particular
/// syscall failure: `Io` carries whatever the OS reported, the other
/// variants are raised by the engine itself.
#[derive(Debug)]
pub enum Error {
    /// The log has not been started (or has been closed) and cannot
    /// accept `append`/`fetch` calls.
    NotStarted,
    /// A submitted job was not completed because the writer loop is
    /// shutting down.
    ShuttingDown,
    /// A syscall failed.
    Io(io::Error),
    /// On-disk state did not match the expected format and could not
    /// be reconciled during recovery.
    Corrupt(&'static str),
    /// A file position would exceed the 32-bit range the index format
    /// can represent.
    Overflow,
    /// Appending would exceed the segment's `max_size`; the caller
    /// (Log) must roll over and retry on the new segment. Never
    /// observed outside this crate.
    Full,
    /// A caller violated a precondition (non-monotonic index entry,
    /// write to a sealed target, etc). Never retried.
    BadArgument(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::NotStarted => write!(f, "log is not started"),
            Error::ShuttingDown => write!(f, "writer is shutting down"),
            Error::Io(e) => write!(f, "io error: {e}"),
            Error::Corrupt(msg) => write!(f, "corrupt data: {msg}"),
            Error::Overflow => write!(f, "file position overflow"),
            Error::Full => write!(f, "segment is full"),
            Error::BadArgument(msg) => write!(f, "bad argument: {msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(value: io::Error) -> Self {
        Error::Io(value)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
