//! Error type shared by connection I/O and window range operations.

use std::fmt;
use std::io;

/// Failures surfaced by the connection protocols and window range operations.
///
/// Every asynchronous operation fails its own future with exactly one of
/// these; the library never retries on the caller's behalf.
#[derive(Debug)]
pub enum Error {
    /// The peer closed the stream before an exact-length read was satisfied.
    IncompleteRead {
        /// Bytes the operation was asked to obtain.
        expected: usize,
        /// Bytes actually staged before the stream ended.
        obtained: usize,
    },
    /// A line read would outgrow the window's fixed backing store.
    CapacityExceeded {
        /// Capacity of the window the line was being staged into.
        capacity: usize,
    },
    /// A requested byte range is malformed or outside the readable region.
    InvalidRange { from: usize, to: usize },
    /// An I/O attempt missed its deadline.
    TimedOut,
    /// The connection was already closed.
    Closed,
    /// The socket reported an error, propagated verbatim.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::IncompleteRead { expected, obtained } => {
                write!(f, "incomplete read: expected {expected} bytes, got {obtained}")
            }
            Error::CapacityExceeded { capacity } => {
                write!(f, "line exceeds window capacity of {capacity} bytes")
            }
            Error::InvalidRange { from, to } => {
                write!(f, "invalid byte range {from}..{to}")
            }
            Error::TimedOut => write!(f, "operation timed out"),
            Error::Closed => write!(f, "connection is closed"),
            Error::Io(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
