//! Error types surfaced by the container engine.
//!
//! Errors come from three places: structural validation (`Corrupt`,
//! `Unsupported`), host I/O (`Io`, passed through verbatim), and logical
//! resolution (`NotFound` and friends, produced by the path helpers).

use std::io;
use thiserror::Error;

/// Main error type for container operations.
#[derive(Error, Debug)]
pub enum Error {
    /// IO error from the host file
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Path or entry does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// A storage was found where a stream was expected
    #[error("is a storage: {0}")]
    IsDirectory(String),

    /// A stream was found where a storage was expected
    #[error("not a storage: {0}")]
    NotDirectory(String),

    /// The storage still has children
    #[error("storage not empty: {0}")]
    NotEmpty(String),

    /// An entry already exists at this path
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// Structural corruption in the container
    #[error("corrupted container: {0}")]
    Corrupt(String),

    /// Valid request the engine cannot satisfy
    #[error("unsupported: {0}")]
    Unsupported(String),
}

/// Result type for container operations.
pub type Result<T> = std::result::Result<T, Error>;

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        match err {
            Error::Io(e) => e,
            other => {
                let kind = match other {
                    Error::NotFound(_) => io::ErrorKind::NotFound,
                    Error::AlreadyExists(_) => io::ErrorKind::AlreadyExists,
                    Error::IsDirectory(_) | Error::NotDirectory(_) | Error::NotEmpty(_) => {
                        io::ErrorKind::InvalidInput
                    },
                    Error::Corrupt(_) => io::ErrorKind::InvalidData,
                    Error::Unsupported(_) => io::ErrorKind::Unsupported,
                    Error::Io(_) => io::ErrorKind::Other,
                };
                io::Error::new(kind, other)
            },
        }
    }
}
