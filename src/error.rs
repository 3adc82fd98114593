//! Error taxonomy for a single file conversion.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Every variant aborts the conversion of one file and nothing more.
#[derive(Debug, Error)]
pub enum Error {
    /// A previous output exists and could not be removed, usually because
    /// the file is open in another process. Retrying later may succeed.
    #[error("output {} is locked and could not be replaced", path.display())]
    FileLocked { path: PathBuf },

    #[error("{} is not a valid zip package: {source}", path.display())]
    CorruptArchive {
        path: PathBuf,
        #[source]
        source: zip::result::ZipError,
    },

    #[error("{} contains an unsafe member path {member:?}", path.display())]
    UnsafeMember { path: PathBuf, member: String },

    #[error("markup entry {part} does not parse: {reason}")]
    MalformedMarkup { part: String, reason: String },

    #[error("macro project could not be parsed: {reason}")]
    MacroParse { reason: String },

    #[error("malformed document: {0}")]
    MalformedDocument(String),

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

impl Error {
    /// True for the one failure a caller may reasonably retry.
    pub fn is_locked(&self) -> bool {
        matches!(self, Error::FileLocked { .. })
    }

    pub(crate) fn io(context: impl Into<String>, source: io::Error) -> Self {
        Error::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn macro_parse(reason: impl std::fmt::Display) -> Self {
        Error::MacroParse {
            reason: reason.to_string(),
        }
    }
}

/// Attach a human-readable context to `io::Error`s, in the spirit of
/// `anyhow::Context` but producing a typed [`Error::Io`].
pub(crate) trait IoContext<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn io_context<F, S>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|source| Error::io(f(), source))
    }
}
