//! Crate-wide error type.
//!
//! Degenerate statistics (a transition row, entry vector or weight vector
//! with zero accumulated mass) are not errors: they are logged and the
//! affected parameters keep their prior values.

use std::io;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Two models, states or statistics that must share a shape do not.
    #[error("structural mismatch: {0}")]
    StructuralMismatch(String),

    /// A path cannot be produced or does not fit the observation.
    #[error("malformed alignment: {0}")]
    MalformedAlignment(String),

    /// A persisted model could not be loaded.
    #[error("persistence fault: {0}")]
    Persistence(String),

    #[error("i/o error: {0}")]
    Io(io::Error),

    #[error("invalid input: {0}")]
    InvalidInput(String),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        if err.kind() == io::ErrorKind::UnexpectedEof {
            Error::Persistence(format!("truncated stream: {}", err))
        } else {
            Error::Io(err)
        }
    }
}
