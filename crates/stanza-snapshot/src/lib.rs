//! Stanza Snapshot - content snapshot pipeline
//!
//! Takes snapshots of virtual source trees into a
//! [`Repository`](stanza_repo::Repository):
//! - [`source`]: static directories, streaming and local files
//! - [`upload`]: chunking, parallel hashing and deduplication
//! - [`retention`]: expiry of old manifests
//! - [`pipeline`]: [`snapshot_source`], [`write`] and [`read`]

#![warn(unreachable_pub)]

pub mod error;
pub mod pipeline;
pub mod progress;
pub mod retention;
pub mod source;
pub mod upload;

pub use error::{SnapshotError, SnapshotResult, Step, UploadError};
pub use pipeline::{
    find_previous_snapshot_manifest, open_repository, parse_object_id_with_path,
    policy_tree_for_source, read, set_manual, snapshot_source, write, write_as, STREAM_PURPOSE,
    WRITE_DESCRIPTION,
};
pub use progress::{NullProgress, ProgressStats, SnapshotProgress, UploadProgress};
pub use retention::{apply_retention_policy, expired_manifests};
pub use source::{Entry, FileContent, FileEntry, StaticDirectory};
pub use upload::{Uploader, DEFAULT_CHUNK_SIZE};
