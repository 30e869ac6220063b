//! Snapshot pipeline errors

use stanza_core::BoxError;
use stanza_repo::{ObjectId, RepoError};
use std::fmt;

/// Result alias for pipeline operations
pub type SnapshotResult<T> = Result<T, SnapshotError>;

/// Steps of [`snapshot_source`](crate::pipeline::snapshot_source)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Step {
    /// Locate the baseline manifest
    FindPrevious,
    /// Resolve the effective policy
    PolicyTree,
    /// Upload the source tree
    Upload,
    /// Persist the new manifest
    SaveManifest,
    /// Expire old manifests
    ApplyRetention,
    /// Mark the source as manually scheduled
    SetManual,
    /// Make writes durable
    Flush,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FindPrevious => "Failed to find previous manifests",
            Self::PolicyTree => "Failed to get policy tree",
            Self::Upload => "Failed to upload the snapshot",
            Self::SaveManifest => "Failed to save manifest",
            Self::ApplyRetention => "Failed to apply retention policy",
            Self::SetManual => "Failed to set manual field in scheduling policy for source",
            Self::Flush => "Failed to flush repository",
        })
    }
}

/// Errors raised while uploading a source tree
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    /// Context was cancelled or its deadline passed
    #[error(transparent)]
    Interrupted(#[from] stanza_core::Error),

    /// Repository rejected a read or write
    #[error(transparent)]
    Repo(#[from] RepoError),

    /// Source entry could not be read
    #[error("failed to read {path}: {source}")]
    Read {
        /// Entry being read
        path: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised by the snapshot pipeline
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// No persisted password beside the repository config
    #[error("Failed to retrieve client passphrase")]
    MissingPassword,

    /// Repository could not be opened
    #[error("Failed to open repository: {0}")]
    Open(#[source] RepoError),

    /// A pipeline step failed
    #[error("{step}: {source}")]
    Step {
        /// Failing step
        step: Step,
        /// Underlying cause
        #[source]
        source: BoxError,
    },

    /// Backup id is malformed or does not resolve
    #[error("Failed to parse backupID: {backup_id}: {reason}")]
    InvalidBackupId {
        /// Id as given
        backup_id: String,
        /// What went wrong
        reason: String,
    },

    /// Resolved object could not be opened
    #[error("error opening object {id}: {source}")]
    OpenObject {
        /// Object id
        id: ObjectId,
        /// Underlying error
        #[source]
        source: RepoError,
    },

    /// Streaming into the sink failed
    #[error("Failed to copy data to target: {0}")]
    Copy(#[source] std::io::Error),

    /// Context was cancelled or its deadline passed
    #[error(transparent)]
    Interrupted(#[from] stanza_core::Error),
}

impl SnapshotError {
    /// Wrap a step failure
    pub fn at(step: Step, source: impl Into<BoxError>) -> Self {
        Self::Step {
            step,
            source: source.into(),
        }
    }

    /// Step that failed, for step failures
    #[must_use]
    pub fn step(&self) -> Option<Step> {
        match self {
            Self::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}
