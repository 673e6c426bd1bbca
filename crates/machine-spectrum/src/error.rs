//! Machine-level error taxonomy.

use std::fmt;
use std::io;

/// Errors the machine surfaces to its caller.
///
/// Loaders are all-or-nothing: when any variant is returned, the prior
/// machine state is untouched.
#[derive(Debug)]
pub enum SpectrumError {
    /// File not found or unreadable (ROM, tape).
    Io(io::Error),
    /// Structurally invalid input (bad tape image, impossible snapshot
    /// field).
    Malformed(String),
    /// The operation cannot be performed (e.g. saving a tape to a format
    /// that cannot represent its blocks).
    Unsupported(String),
}

impl fmt::Display for SpectrumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Malformed(msg) => write!(f, "malformed input: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported operation: {msg}"),
        }
    }
}

impl std::error::Error for SpectrumError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for SpectrumError {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}
