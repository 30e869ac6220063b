//! Content repository interface

use crate::error::RepoResult;
use crate::hash::{ContentId, ObjectId};
use crate::manifest::{Manifest, ManifestId, SourceInfo};
use crate::object::Object;
use crate::policy::{Policy, PolicyTarget};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::io::Read;
use std::sync::Arc;

/// Identity a client writes snapshots under
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientOptions {
    /// User name recorded in snapshot sources
    pub username: String,
    /// Host name recorded in snapshot sources
    pub hostname: String,
}

impl ClientOptions {
    /// Create client options
    #[must_use]
    pub fn new(username: impl Into<String>, hostname: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            hostname: hostname.into(),
        }
    }

    /// Source info for a path written by this client
    #[must_use]
    pub fn source(&self, path: impl Into<String>) -> SourceInfo {
        SourceInfo::new(&self.username, &self.hostname, path)
    }
}

/// Content-addressed snapshot repository
///
/// Writes may be staged; [`flush`](Repository::flush) makes them durable.
#[async_trait]
pub trait Repository: Send + Sync {
    /// Client identity
    fn client_options(&self) -> ClientOptions;

    /// Manifests of a source, oldest first
    async fn list_manifests(&self, source: &SourceInfo) -> RepoResult<Vec<Manifest>>;

    /// Store a manifest under a fresh id
    async fn save_manifest(&self, manifest: Manifest) -> RepoResult<ManifestId>;

    /// Load one manifest
    async fn load_manifest(&self, id: &ManifestId) -> RepoResult<Manifest>;

    /// Delete one manifest
    async fn delete_manifest(&self, id: &ManifestId) -> RepoResult<()>;

    /// Check if a content blob exists
    async fn has_content(&self, id: &ContentId) -> RepoResult<bool>;

    /// Store a content blob under its precomputed id
    async fn put_content(&self, id: ContentId, data: Vec<u8>) -> RepoResult<()>;

    /// Read a content blob
    async fn get_content(&self, id: &ContentId) -> RepoResult<Arc<[u8]>>;

    /// Store a structured object
    async fn put_object(&self, object: &Object) -> RepoResult<ObjectId>;

    /// Read a structured object
    async fn get_object(&self, id: &ObjectId) -> RepoResult<Object>;

    /// Open a file object for streaming
    async fn open_object(&self, id: &ObjectId) -> RepoResult<Box<dyn Read + Send>>;

    /// Policy stored for a target
    async fn get_policy(&self, target: &PolicyTarget) -> RepoResult<Option<Policy>>;

    /// Replace the policy for a target
    async fn set_policy(&self, target: &PolicyTarget, policy: Policy) -> RepoResult<()>;

    /// Make staged writes durable
    async fn flush(&self) -> RepoResult<()>;

    /// Defaults, then the global policy, then the source policy
    async fn effective_policy(&self, source: &SourceInfo) -> RepoResult<Policy> {
        let mut policy = Policy::defaults();
        if let Some(global) = self.get_policy(&PolicyTarget::Global).await? {
            policy = policy.merge(&global);
        }
        if let Some(own) = self
            .get_policy(&PolicyTarget::Source(source.clone()))
            .await?
        {
            policy = policy.merge(&own);
        }
        Ok(policy)
    }
}
