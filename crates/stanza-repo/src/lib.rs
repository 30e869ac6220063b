//! Stanza Repo - content-addressed snapshot repository
//!
//! Storage model used by the snapshot pipeline:
//! - [`ContentId`] / [`ObjectId`]: Blake3 content addressing
//! - [`Object`]: file chunk lists and directory listings
//! - [`Manifest`]: one snapshot of a [`SourceInfo`]
//! - [`Policy`]: retention, file selection and scheduling
//! - [`Repository`]: storage interface, with [`LocalRepository`] as the
//!   directory-backed implementation
//! - [`BufferPool`]: reusable 64 KiB copy buffers

#![warn(unreachable_pub)]

pub mod buffer;
pub mod error;
pub mod hash;
pub mod local;
pub mod manifest;
pub mod object;
pub mod policy;
pub mod repository;

pub use buffer::{read_some, BufferPool, PooledBuffer, BUFFER_SIZE};
pub use error::{RepoError, RepoResult};
pub use hash::{ContentId, HashError, ObjectId};
pub use local::{get_persisted_password, persist_password, LocalRepository, RepositoryConfig};
pub use manifest::{Manifest, ManifestId, SnapshotStats, SourceInfo};
pub use object::{ChunkRef, ChunkReader, ContentSource, DirEntry, DirObject, EntryKind, FileObject, Object};
pub use policy::{FilesPolicy, Policy, PolicyTarget, RetentionPolicy, SchedulingPolicy};
pub use repository::{ClientOptions, Repository};
