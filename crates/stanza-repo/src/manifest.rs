//! Snapshot manifests
//!
//! A [`Manifest`] records one snapshot of a [`SourceInfo`]. Manifests are
//! immutable once saved; a source may have many, ordered by start time.

use crate::hash::ObjectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Identity of a snapshot lineage inside a repository
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceInfo {
    /// Owning user
    pub user_name: String,
    /// Host the data came from
    pub host: String,
    /// Path of the data on that host
    pub path: String,
}

impl SourceInfo {
    /// Create source info
    #[must_use]
    pub fn new(user_name: impl Into<String>, host: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            user_name: user_name.into(),
            host: host.into(),
            path: path.into(),
        }
    }
}

impl fmt::Display for SourceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.user_name, self.host, self.path)
    }
}

/// Manifest identifier (ULID, sortable by creation)
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ManifestId(String);

impl ManifestId {
    /// Generate a fresh id
    #[inline]
    #[must_use]
    pub fn generate() -> Self {
        Self(Ulid::new().to_string().to_lowercase())
    }

    /// Wrap an existing id
    #[inline]
    #[must_use]
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check if unset
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ManifestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counters gathered while uploading a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotStats {
    /// Files in the snapshot
    pub total_files: u64,
    /// Directories in the snapshot
    pub total_dirs: u64,
    /// Logical bytes in the snapshot
    pub total_bytes: u64,
    /// Files reused from the previous snapshot without reading
    pub cached_files: u64,
    /// Files left out by policy
    pub excluded_files: u64,
    /// Bytes of new content written to the repository
    pub uploaded_bytes: u64,
}

/// Record of one snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    /// Assigned when saved
    #[serde(default, skip_serializing_if = "ManifestId::is_empty")]
    pub id: ManifestId,
    /// Lineage this snapshot belongs to
    pub source: SourceInfo,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// When the upload started
    pub start_time: DateTime<Utc>,
    /// When the upload finished
    pub end_time: DateTime<Utc>,
    /// Root directory object
    pub root_object_id: ObjectId,
    /// Why the snapshot is incomplete; empty means complete
    #[serde(default)]
    pub incomplete_reason: String,
    /// Upload counters
    #[serde(default)]
    pub stats: SnapshotStats,
}

impl Manifest {
    /// Check if the snapshot completed
    #[inline]
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.incomplete_reason.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentId;

    #[test]
    fn source_display() {
        let s = SourceInfo::new("root", "db-0", "/var/lib/mysql");
        assert_eq!(s.to_string(), "root@db-0:/var/lib/mysql");
    }

    #[test]
    fn generated_ids_are_unique() {
        assert_ne!(ManifestId::generate(), ManifestId::generate());
        assert!(ManifestId::default().is_empty());
    }

    #[test]
    fn manifest_json_omits_unset_id() {
        let m = Manifest {
            id: ManifestId::default(),
            source: SourceInfo::new("u", "h", "/p"),
            description: String::new(),
            start_time: Utc::now(),
            end_time: Utc::now(),
            root_object_id: ObjectId::new(ContentId::compute(b"root")),
            incomplete_reason: String::new(),
            stats: SnapshotStats::default(),
        };
        let json = serde_json::to_value(&m).unwrap();
        assert!(json.get("id").is_none());
        assert!(m.is_complete());

        let back: Manifest = serde_json::from_value(json).unwrap();
        assert_eq!(back, m);
    }
}
