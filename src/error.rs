//! Library-wide error and result types.

use std::fmt;
use std::io;

/// Result alias used throughout krykit.
pub type Result<T> = std::result::Result<T, Error>;

/// All errors the library can produce.
///
/// Error messages are kept intentionally terse; callers that need richer
/// context should wrap `Error` in their own type.
#[derive(Debug)]
pub enum Error {
    /// The source delivered fewer bytes than a field or read required.
    /// The payload names what was being read.
    ShortRead(&'static str),
    /// The header magic does not match the configured file variant.
    BadMagic,
    /// The declared subkey length exceeds the allocation cap.
    SubkeyTooLarge(u32),
    /// A configured secret is not exactly 47 bytes.
    SecretLength(usize),
    /// The verify block did not decrypt to the expected plaintext magic:
    /// wrong dongle, wrong secret, or a corrupted file.
    KeyMismatch,
    /// The dongle capability failed to produce a key.
    DongleUnavailable(io::Error),
    /// Re-opening a file for a clone failed.
    Reopen(Box<Error>),
    /// An underlying I/O operation failed.
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ShortRead(what) => write!(f, "unexpected end of file reading {what}"),
            Error::BadMagic => write!(f, "bad magic value for the configured variant"),
            Error::SubkeyTooLarge(len) => write!(f, "unreasonable subkey length: {len}"),
            Error::SecretLength(len) => write!(f, "secret must be 47 bytes, got {len}"),
            Error::KeyMismatch => write!(f, "verify block decryption failed, wrong key"),
            Error::DongleUnavailable(e) => write!(f, "dongle unavailable: {e}"),
            Error::Reopen(e) => write!(f, "reopen for clone failed: {e}"),
            Error::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::DongleUnavailable(e) => Some(e),
            Error::Reopen(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}
