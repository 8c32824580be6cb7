//! Error taxonomy shared by the orchestrators and backends.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Failure reported by a collaborator (mount, dump, archive, format, checksum).
///
/// `status` is the numeric code the backend failed with: a child process exit
/// code, an errno, or 1 when nothing more specific is known. It is never zero.
#[derive(Debug, Error)]
#[error("{message} (status {status})")]
pub struct BackendError {
    pub status: i32,
    pub message: String,
}

impl BackendError {
    pub fn new(message: impl Into<String>) -> Self {
        Self::with_status(1, message)
    }

    pub fn with_status(status: i32, message: impl Into<String>) -> Self {
        Self {
            status: if status == 0 { 1 } else { status },
            message: message.into(),
        }
    }

    /// Wrap an I/O error, keeping its errno as the status.
    pub fn io(context: impl fmt::Display, err: io::Error) -> Self {
        let status = err.raw_os_error().unwrap_or(libc::EIO);
        Self::with_status(status, format!("{}: {}", context, err))
    }
}

impl From<io::Error> for BackendError {
    fn from(err: io::Error) -> Self {
        let status = err.raw_os_error().unwrap_or(libc::EIO);
        Self::with_status(status, err.to_string())
    }
}

impl From<nix::Error> for BackendError {
    fn from(err: nix::Error) -> Self {
        Self::with_status(err as i32, err.desc())
    }
}

/// The step an orchestrator was performing when a backend failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Mount,
    Dump,
    Archive,
    Format,
    RestoreImage,
    Unarchive,
    Checksum,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mount => "mounting",
            Self::Dump => "dumping",
            Self::Archive => "archiving",
            Self::Format => "formatting",
            Self::RestoreImage => "writing image to",
            Self::Unarchive => "unarchiving",
            Self::Checksum => "generating checksums for",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("can't mount removable media at {0}")]
    MediaUnavailable(PathBuf),

    #[error("no volume registered for {0}")]
    MissingVolume(PathBuf),

    #[error("checksum verification failed for {dir}: {reason}")]
    IntegrityError { dir: PathBuf, reason: String },

    #[error("error while {operation} {partition}: {source}")]
    BackendFailure {
        partition: String,
        operation: Operation,
        #[source]
        source: BackendError,
    },

    #[error("failed to create {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl Error {
    pub fn backend(partition: &str, operation: Operation, source: BackendError) -> Self {
        Self::BackendFailure {
            partition: partition.to_string(),
            operation,
            source,
        }
    }

    /// Process exit status for this failure. Always non-zero.
    pub fn exit_status(&self) -> i32 {
        match self {
            Self::BackendFailure { source, .. } => source.status,
            _ => 1,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
