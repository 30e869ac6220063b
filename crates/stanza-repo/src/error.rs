//! Repository errors

use crate::hash::{ContentId, HashError, ObjectId};
use crate::manifest::ManifestId;
use std::path::PathBuf;

/// Result alias for repository operations
pub type RepoResult<T> = Result<T, RepoError>;

/// Errors raised by a content repository
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    /// Filesystem access failed
    #[error("repository I/O error at {path}: {source}")]
    Io {
        /// Path being accessed
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Stored record could not be encoded or decoded
    #[error("repository serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Password does not match the repository
    #[error("invalid repository password")]
    InvalidPassword,

    /// Repository configuration is missing or unusable
    #[error("repository not connected: {0}")]
    NotConnected(String),

    /// Content blob does not exist
    #[error("content {0} not found")]
    ContentNotFound(ContentId),

    /// Object does not exist
    #[error("object {0} not found")]
    ObjectNotFound(ObjectId),

    /// Object exists but has a different kind than requested
    #[error("object {id} is not a {expected}")]
    UnexpectedObjectKind {
        /// Object that was opened
        id: ObjectId,
        /// Kind the caller needed
        expected: &'static str,
    },

    /// Manifest does not exist
    #[error("manifest {0} not found")]
    ManifestNotFound(ManifestId),

    /// Identifier could not be parsed
    #[error("invalid identifier: {0}")]
    InvalidId(#[from] HashError),
}

impl RepoError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
