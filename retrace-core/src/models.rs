use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeltaKind {
    FileCreate,
    FileModify,
    FileDelete,
    DirCreate,
    DirDelete,
    SymlinkFileCreate,
    SymlinkFileDelete,
    SymlinkDirCreate,
    SymlinkDirDelete,
}

impl DeltaKind {
    pub const ALL: [DeltaKind; 9] = [
        DeltaKind::FileCreate,
        DeltaKind::FileModify,
        DeltaKind::FileDelete,
        DeltaKind::DirCreate,
        DeltaKind::DirDelete,
        DeltaKind::SymlinkFileCreate,
        DeltaKind::SymlinkFileDelete,
        DeltaKind::SymlinkDirCreate,
        DeltaKind::SymlinkDirDelete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeltaKind::FileCreate => "file_create",
            DeltaKind::FileModify => "file_modify",
            DeltaKind::FileDelete => "file_delete",
            DeltaKind::DirCreate => "dir_create",
            DeltaKind::DirDelete => "dir_delete",
            DeltaKind::SymlinkFileCreate => "symlink_file_create",
            DeltaKind::SymlinkFileDelete => "symlink_file_delete",
            DeltaKind::SymlinkDirCreate => "symlink_dir_create",
            DeltaKind::SymlinkDirDelete => "symlink_dir_delete",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_str() == s)
    }

    pub fn is_symlink(&self) -> bool {
        matches!(
            self,
            DeltaKind::SymlinkFileCreate
                | DeltaKind::SymlinkFileDelete
                | DeltaKind::SymlinkDirCreate
                | DeltaKind::SymlinkDirDelete
        )
    }

    pub fn is_file(&self) -> bool {
        matches!(
            self,
            DeltaKind::FileCreate | DeltaKind::FileModify | DeltaKind::FileDelete
        )
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One reversible filesystem mutation.
///
/// Which optional fields are populated depends on `kind`; the handlers in
/// [`crate::delta`] reject deltas whose fields do not match their kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub target_path: PathBuf,
    pub old_content: Option<Vec<u8>>,
    pub new_content: Option<Vec<u8>>,
    pub symlink_target: Option<PathBuf>,
    pub relative_to: Option<PathBuf>,
    pub file_existed: bool,
    pub processed: bool,
    pub timestamp: DateTime<Utc>,
    pub checksum: Option<String>,
}

impl Delta {
    pub fn new(kind: DeltaKind, target_path: impl Into<PathBuf>) -> Self {
        let file_existed = matches!(
            kind,
            DeltaKind::FileModify
                | DeltaKind::FileDelete
                | DeltaKind::DirDelete
                | DeltaKind::SymlinkFileDelete
                | DeltaKind::SymlinkDirDelete
        );

        Self {
            kind,
            target_path: target_path.into(),
            old_content: None,
            new_content: None,
            symlink_target: None,
            relative_to: None,
            file_existed,
            processed: false,
            timestamp: Utc::now(),
            checksum: None,
        }
    }

    pub fn with_old_content(mut self, content: Vec<u8>) -> Self {
        if self.new_content.is_none() {
            self.checksum = Some(hash_content(&content));
        }
        self.old_content = Some(content);
        self
    }

    pub fn with_new_content(mut self, content: Vec<u8>) -> Self {
        self.checksum = Some(hash_content(&content));
        self.new_content = Some(content);
        self
    }

    pub fn with_symlink(mut self, target: impl Into<PathBuf>, relative_to: Option<PathBuf>) -> Self {
        self.symlink_target = Some(target.into());
        self.relative_to = relative_to;
        self
    }

    pub fn processed(mut self) -> Self {
        self.processed = true;
        self
    }

    /// Content the checksum was computed over: new content, else old content.
    fn checksummed_content(&self) -> Option<&[u8]> {
        self.new_content
            .as_deref()
            .or(self.old_content.as_deref())
    }

    /// Spot-check the recorded checksum. Deltas without one verify trivially.
    pub fn verify_checksum(&self) -> bool {
        match (&self.checksum, self.checksummed_content()) {
            (Some(expected), Some(content)) => *expected == hash_content(content),
            (Some(_), None) => false,
            (None, _) => true,
        }
    }
}

pub(crate) fn hash_content(content: &[u8]) -> String {
    use sha2::{Digest, Sha256};
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// A named, timestamped bundle of deltas undone and redone as one unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operation {
    pub id: Uuid,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub completed: bool,
    pub deltas: Vec<Delta>,
}

impl Operation {
    /// Returns `None` for an empty delta list; empty operations are never recorded.
    pub fn new(description: impl Into<String>, deltas: Vec<Delta>) -> Option<Self> {
        let timestamp = deltas.first()?.timestamp;
        Some(Self {
            id: Uuid::new_v4(),
            description: description.into(),
            timestamp,
            completed: true,
            deltas,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub index: usize,
    pub id: Uuid,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub delta_count: usize,
    pub applied: bool,
    pub current: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistorySummary {
    pub operations: Vec<HistoryEntry>,
    pub current_position: usize,
    pub total_operations: usize,
    pub can_undo: bool,
    pub can_redo: bool,
}

/// Result of an undo or redo request. `count` is the number of operations
/// actually replayed after clamping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    pub count: usize,
    pub message: String,
}
