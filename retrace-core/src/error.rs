use crate::models::DeltaKind;
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{kind} failed for {}: {source}", path.display())]
    DeltaIo {
        kind: DeltaKind,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Target already exists: {}", .0.display())]
    TargetExists(PathBuf),

    #[error("Path conflict: {} exists with unexpected content", .0.display())]
    PathConflict(PathBuf),

    #[error("Invalid symlink target {}: {reason}", path.display())]
    InvalidSymlinkTarget { path: PathBuf, reason: String },

    #[error("relative_to path does not exist: {}", .0.display())]
    RelativeToMissing(PathBuf),

    #[error("Symlink target must be specified for {0}")]
    MissingSymlinkTarget(DeltaKind),

    #[error("{kind} delta is missing required field '{field}'")]
    MissingField { kind: DeltaKind, field: &'static str },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Operation not found at index {0}")]
    OperationNotFound(usize),

    #[error("Corrupt history: {0}")]
    CorruptHistory(String),

    #[error("{direction} of '{description}' failed after {completed} operation(s): {source}")]
    Replay {
        direction: &'static str,
        description: String,
        completed: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("Rollback of partially applied '{description}' failed, history may be inconsistent with the filesystem: {source}")]
    InconsistentState {
        description: String,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// True for errors raised before any filesystem mutation took place.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Error::TargetExists(_)
                | Error::PathConflict(_)
                | Error::InvalidSymlinkTarget { .. }
                | Error::RelativeToMissing(_)
                | Error::MissingSymlinkTarget(_)
                | Error::MissingField { .. }
        )
    }
}
