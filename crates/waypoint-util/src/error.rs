//! Errors raised by the path and pattern helpers in this crate.
//!
//! Higher level crates wrap [`Error`] into their own error enums.

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid glob pattern '{pattern}': {reason}")]
    EmptyPattern { pattern: String, reason: &'static str },

    #[error("invalid glob pattern '{pattern}': {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("{} is not under {}", path.display(), root.display())]
    OutsideRoot { path: PathBuf, root: PathBuf },
}

impl Error {
    /// Whether this error came from compiling a glob pattern.
    pub fn is_pattern(&self) -> bool {
        matches!(self, Error::EmptyPattern { .. } | Error::Pattern { .. })
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, err)
    }
}
