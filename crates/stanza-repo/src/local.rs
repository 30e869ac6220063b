//! Directory-backed repository
//!
//! On-disk layout under the storage directory:
//!
//! ```text
//! blobs/<shard>/<content-id>
//! manifests/<manifest-id>.json
//! policies.json
//! ```
//!
//! Writes are staged in memory and written out by [`Repository::flush`].
//! An in-memory repository (no storage directory) never writes anything.

use crate::error::{RepoError, RepoResult};
use crate::hash::{ContentId, ObjectId};
use crate::manifest::{Manifest, ManifestId, SourceInfo};
use crate::object::{ChunkReader, ContentSource, Object};
use crate::policy::{Policy, PolicyTarget};
use crate::repository::{ClientOptions, Repository};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BLOBS_DIR: &str = "blobs";
const MANIFESTS_DIR: &str = "manifests";
const POLICIES_FILE: &str = "policies.json";

/// Connection settings stored in the repository config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Storage directory
    pub storage: PathBuf,
    /// Client host name
    pub hostname: String,
    /// Client user name
    pub username: String,
    /// Blake3 digest of the repository password
    pub password_digest: String,
}

impl RepositoryConfig {
    /// Create config for a storage directory
    #[must_use]
    pub fn new(storage: impl Into<PathBuf>, options: &ClientOptions, password: &str) -> Self {
        Self {
            storage: storage.into(),
            hostname: options.hostname.clone(),
            username: options.username.clone(),
            password_digest: password_digest(password),
        }
    }

    /// Client identity recorded in the config
    #[must_use]
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions::new(&self.username, &self.hostname)
    }

    /// Check a password against the stored digest
    #[must_use]
    pub fn check_password(&self, password: &str) -> bool {
        self.password_digest == password_digest(password)
    }

    /// Load from a JSON file
    ///
    /// # Errors
    /// [`RepoError::NotConnected`] if the file does not exist
    pub fn load(path: &Path) -> RepoResult<Self> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(RepoError::NotConnected(format!(
                    "no repository config at {}",
                    path.display()
                )))
            }
            Err(e) => return Err(RepoError::io(path, e)),
        };
        Ok(serde_json::from_str(&content)?)
    }

    /// Save as a JSON file
    ///
    /// # Errors
    /// I/O or serialization errors
    pub fn save(&self, path: &Path) -> RepoResult<()> {
        write_atomic(path, &serde_json::to_vec_pretty(self)?)
    }
}

fn password_digest(password: &str) -> String {
    blake3::hash(password.as_bytes()).to_hex().to_string()
}

/// Path of the persisted password beside a config file
#[must_use]
pub fn password_file(config_path: &Path) -> PathBuf {
    let mut name = config_path.as_os_str().to_owned();
    name.push(".password");
    PathBuf::from(name)
}

/// Persist the password beside the config file
///
/// # Errors
/// I/O errors writing the file
pub fn persist_password(config_path: &Path, password: &str) -> RepoResult<()> {
    write_atomic(&password_file(config_path), password.as_bytes())
}

/// Password persisted by [`persist_password`], if any
#[must_use]
pub fn get_persisted_password(config_path: &Path) -> Option<String> {
    fs::read_to_string(password_file(config_path))
        .ok()
        .map(|p| p.trim_end_matches(['\n', '\r']).to_string())
}

fn write_atomic(path: &Path, data: &[u8]) -> RepoResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| RepoError::io(parent, e))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, data).map_err(|e| RepoError::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| RepoError::io(path, e))
}

/// Blob storage: staged blobs in memory, flushed blobs on disk
#[derive(Debug)]
struct BlobStore {
    dir: Option<PathBuf>,
    pending: DashMap<ContentId, Arc<[u8]>>,
}

impl BlobStore {
    fn new(dir: Option<PathBuf>) -> Self {
        Self {
            dir,
            pending: DashMap::new(),
        }
    }

    fn path(&self, id: &ContentId) -> Option<PathBuf> {
        self.dir
            .as_ref()
            .map(|dir| dir.join(id.shard()).join(id.to_string()))
    }

    fn contains(&self, id: &ContentId) -> bool {
        self.pending.contains_key(id) || self.path(id).is_some_and(|p| p.exists())
    }

    /// Stage a blob; returns false if it was already stored
    fn put(&self, id: ContentId, data: Arc<[u8]>) -> bool {
        if self.contains(&id) {
            return false;
        }
        self.pending.insert(id, data);
        true
    }

    fn flush(&self) -> RepoResult<usize> {
        if self.dir.is_none() {
            return Ok(0);
        }
        let ids: Vec<ContentId> = self.pending.iter().map(|e| *e.key()).collect();
        for id in &ids {
            let data = self.pending.get(id).map(|e| Arc::clone(e.value()));
            if let (Some(data), Some(path)) = (data, self.path(id)) {
                write_atomic(&path, &data)?;
                self.pending.remove(id);
            }
        }
        Ok(ids.len())
    }
}

impl ContentSource for BlobStore {
    fn read_content(&self, id: &ContentId) -> RepoResult<Arc<[u8]>> {
        if let Some(data) = self.pending.get(id) {
            return Ok(Arc::clone(data.value()));
        }
        let Some(path) = self.path(id) else {
            return Err(RepoError::ContentNotFound(*id));
        };
        match fs::read(&path) {
            Ok(bytes) => Ok(Arc::from(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Err(RepoError::ContentNotFound(*id)),
            Err(e) => Err(RepoError::io(path, e)),
        }
    }
}

#[derive(Debug, Default)]
struct State {
    manifests: BTreeMap<ManifestId, Manifest>,
    dirty_manifests: BTreeSet<ManifestId>,
    deleted_manifests: BTreeSet<ManifestId>,
    policies: BTreeMap<String, Policy>,
    policies_dirty: bool,
}

/// Repository stored in a local directory
#[derive(Debug)]
pub struct LocalRepository {
    options: ClientOptions,
    storage: Option<PathBuf>,
    blobs: Arc<BlobStore>,
    state: RwLock<State>,
}

impl LocalRepository {
    /// Create a repository that lives only in memory
    #[must_use]
    pub fn in_memory(options: ClientOptions) -> Self {
        Self {
            options,
            storage: None,
            blobs: Arc::new(BlobStore::new(None)),
            state: RwLock::new(State::default()),
        }
    }

    /// Initialize storage and write a config file pointing at it
    ///
    /// # Errors
    /// I/O or serialization errors
    pub fn create(
        config_path: &Path,
        storage: impl Into<PathBuf>,
        options: ClientOptions,
        password: &str,
    ) -> RepoResult<Self> {
        let storage = storage.into();
        for dir in [BLOBS_DIR, MANIFESTS_DIR] {
            let path = storage.join(dir);
            fs::create_dir_all(&path).map_err(|e| RepoError::io(path, e))?;
        }
        RepositoryConfig::new(&storage, &options, password).save(config_path)?;
        info!(storage = %storage.display(), "Created repository");
        Self::open_storage(storage, options)
    }

    /// Open the repository described by a config file
    ///
    /// # Errors
    /// - [`RepoError::NotConnected`] if the config file is missing
    /// - [`RepoError::InvalidPassword`] if the password does not match
    pub fn open(config_path: &Path, password: &str, purpose: &str) -> RepoResult<Self> {
        let config = RepositoryConfig::load(config_path)?;
        if !config.check_password(password) {
            return Err(RepoError::InvalidPassword);
        }
        info!(purpose, storage = %config.storage.display(), "Opening repository");
        let options = config.client_options();
        Self::open_storage(config.storage, options)
    }

    fn open_storage(storage: PathBuf, options: ClientOptions) -> RepoResult<Self> {
        let mut state = State::default();

        let manifests_dir = storage.join(MANIFESTS_DIR);
        if manifests_dir.is_dir() {
            let entries =
                fs::read_dir(&manifests_dir).map_err(|e| RepoError::io(&manifests_dir, e))?;
            for entry in entries {
                let path = entry.map_err(|e| RepoError::io(&manifests_dir, e))?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                let bytes = fs::read(&path).map_err(|e| RepoError::io(&path, e))?;
                let mut manifest: Manifest = serde_json::from_slice(&bytes)?;
                if manifest.id.is_empty() {
                    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or_default();
                    manifest.id = ManifestId::from_string(stem);
                }
                state.manifests.insert(manifest.id.clone(), manifest);
            }
        }

        let policies_path = storage.join(POLICIES_FILE);
        match fs::read(&policies_path) {
            Ok(bytes) => state.policies = serde_json::from_slice(&bytes)?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(RepoError::io(policies_path, e)),
        }

        debug!(
            storage = %storage.display(),
            manifests = state.manifests.len(),
            policies = state.policies.len(),
            "Loaded repository state"
        );

        Ok(Self {
            options,
            blobs: Arc::new(BlobStore::new(Some(storage.join(BLOBS_DIR)))),
            storage: Some(storage),
            state: RwLock::new(state),
        })
    }

    /// Storage directory, if any
    #[inline]
    #[must_use]
    pub fn storage(&self) -> Option<&Path> {
        self.storage.as_deref()
    }

    /// Number of blobs staged but not yet flushed
    #[inline]
    #[must_use]
    pub fn pending_blobs(&self) -> usize {
        self.blobs.pending.len()
    }

    fn flush_state(&self, storage: &Path) -> RepoResult<(usize, usize)> {
        let mut state = self.state.write();
        let manifests_dir = storage.join(MANIFESTS_DIR);

        let written = state.dirty_manifests.len();
        for id in &state.dirty_manifests {
            if let Some(manifest) = state.manifests.get(id) {
                let path = manifests_dir.join(format!("{id}.json"));
                write_atomic(&path, &serde_json::to_vec_pretty(manifest)?)?;
            }
        }
        state.dirty_manifests.clear();

        let deleted = state.deleted_manifests.len();
        for id in &state.deleted_manifests {
            let path = manifests_dir.join(format!("{id}.json"));
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(RepoError::io(path, e)),
            }
        }
        state.deleted_manifests.clear();

        if state.policies_dirty {
            write_atomic(
                &storage.join(POLICIES_FILE),
                &serde_json::to_vec_pretty(&state.policies)?,
            )?;
            state.policies_dirty = false;
        }

        Ok((written, deleted))
    }
}

#[async_trait]
impl Repository for LocalRepository {
    fn client_options(&self) -> ClientOptions {
        self.options.clone()
    }

    async fn list_manifests(&self, source: &SourceInfo) -> RepoResult<Vec<Manifest>> {
        let state = self.state.read();
        let mut manifests: Vec<Manifest> = state
            .manifests
            .values()
            .filter(|m| &m.source == source)
            .cloned()
            .collect();
        manifests.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        Ok(manifests)
    }

    async fn save_manifest(&self, mut manifest: Manifest) -> RepoResult<ManifestId> {
        let id = ManifestId::generate();
        manifest.id = id.clone();
        let mut state = self.state.write();
        state.deleted_manifests.remove(&id);
        state.dirty_manifests.insert(id.clone());
        state.manifests.insert(id.clone(), manifest);
        Ok(id)
    }

    async fn load_manifest(&self, id: &ManifestId) -> RepoResult<Manifest> {
        self.state
            .read()
            .manifests
            .get(id)
            .cloned()
            .ok_or_else(|| RepoError::ManifestNotFound(id.clone()))
    }

    async fn delete_manifest(&self, id: &ManifestId) -> RepoResult<()> {
        let mut state = self.state.write();
        if state.manifests.remove(id).is_none() {
            return Err(RepoError::ManifestNotFound(id.clone()));
        }
        state.dirty_manifests.remove(id);
        state.deleted_manifests.insert(id.clone());
        Ok(())
    }

    async fn has_content(&self, id: &ContentId) -> RepoResult<bool> {
        Ok(self.blobs.contains(id))
    }

    async fn put_content(&self, id: ContentId, data: Vec<u8>) -> RepoResult<()> {
        self.blobs.put(id, Arc::from(data));
        Ok(())
    }

    async fn get_content(&self, id: &ContentId) -> RepoResult<Arc<[u8]>> {
        self.blobs.read_content(id)
    }

    async fn put_object(&self, object: &Object) -> RepoResult<ObjectId> {
        let (id, bytes) = object.encode()?;
        self.blobs.put(id.content_id(), Arc::from(bytes));
        Ok(id)
    }

    async fn get_object(&self, id: &ObjectId) -> RepoResult<Object> {
        let bytes = self
            .blobs
            .read_content(&id.content_id())
            .map_err(|e| match e {
                RepoError::ContentNotFound(_) => RepoError::ObjectNotFound(*id),
                other => other,
            })?;
        Object::decode(&bytes)
    }

    async fn open_object(&self, id: &ObjectId) -> RepoResult<Box<dyn Read + Send>> {
        let file = self.get_object(id).await?.into_file(*id)?;
        let source: Arc<dyn ContentSource> = self.blobs.clone();
        Ok(Box::new(ChunkReader::new(source, file)))
    }

    async fn get_policy(&self, target: &PolicyTarget) -> RepoResult<Option<Policy>> {
        Ok(self.state.read().policies.get(&target.key()).cloned())
    }

    async fn set_policy(&self, target: &PolicyTarget, policy: Policy) -> RepoResult<()> {
        let mut state = self.state.write();
        state.policies.insert(target.key(), policy);
        state.policies_dirty = true;
        Ok(())
    }

    async fn flush(&self) -> RepoResult<()> {
        let Some(storage) = self.storage.as_deref() else {
            debug!("In-memory repository, nothing to flush");
            return Ok(());
        };
        let blobs = self.blobs.flush()?;
        let (manifests, deleted) = self.flush_state(storage)?;
        info!(blobs, manifests, deleted, "Flushed repository");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentId;
    use crate::manifest::SnapshotStats;
    use crate::object::FileObject;
    use chrono::{Duration, Utc};

    fn options() -> ClientOptions {
        ClientOptions::new("root", "db-0")
    }

    fn manifest(source: &SourceInfo, age_secs: i64) -> Manifest {
        let start = Utc::now() - Duration::seconds(age_secs);
        Manifest {
            id: ManifestId::default(),
            source: source.clone(),
            description: "test".into(),
            start_time: start,
            end_time: start,
            root_object_id: ObjectId::new(ContentId::compute(b"root")),
            incomplete_reason: String::new(),
            stats: SnapshotStats::default(),
        }
    }

    #[tokio::test]
    async fn content_is_deduplicated() {
        let repo = LocalRepository::in_memory(options());
        let id = ContentId::compute(b"chunk");
        assert!(!repo.has_content(&id).await.unwrap());

        repo.put_content(id, b"chunk".to_vec()).await.unwrap();
        repo.put_content(id, b"chunk".to_vec()).await.unwrap();
        assert!(repo.has_content(&id).await.unwrap());
        assert_eq!(repo.pending_blobs(), 1);
        assert_eq!(&*repo.get_content(&id).await.unwrap(), b"chunk");
    }

    #[tokio::test]
    async fn manifests_listed_oldest_first() {
        let repo = LocalRepository::in_memory(options());
        let source = repo.client_options().source("/data");
        let other = SourceInfo::new("x", "y", "/z");

        let newer = repo.save_manifest(manifest(&source, 10)).await.unwrap();
        let older = repo.save_manifest(manifest(&source, 100)).await.unwrap();
        repo.save_manifest(manifest(&other, 5)).await.unwrap();

        let listed: Vec<_> = repo
            .list_manifests(&source)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.id)
            .collect();
        assert_eq!(listed, vec![older.clone(), newer]);

        repo.delete_manifest(&older).await.unwrap();
        assert_eq!(repo.list_manifests(&source).await.unwrap().len(), 1);
        assert!(matches!(
            repo.delete_manifest(&older).await,
            Err(RepoError::ManifestNotFound(_))
        ));
    }

    #[tokio::test]
    async fn open_object_rejects_directories_and_unknown_ids() {
        let repo = LocalRepository::in_memory(options());
        let dir = repo
            .put_object(&Object::Directory(crate::object::DirObject::default()))
            .await
            .unwrap();
        assert!(matches!(
            repo.open_object(&dir).await,
            Err(RepoError::UnexpectedObjectKind { expected: "file", .. })
        ));

        let missing = ObjectId::new(ContentId::compute(b"nope"));
        assert!(matches!(
            repo.get_object(&missing).await,
            Err(RepoError::ObjectNotFound(_))
        ));
    }

    #[tokio::test]
    async fn effective_policy_layers_global_and_source() {
        let repo = LocalRepository::in_memory(options());
        let source = repo.client_options().source("/data");
        repo.set_policy(&PolicyTarget::Global, Policy::default().with_ignore("*.tmp"))
            .await
            .unwrap();
        repo.set_policy(
            &PolicyTarget::Source(source.clone()),
            Policy::default().with_manual(true),
        )
        .await
        .unwrap();

        let effective = repo.effective_policy(&source).await.unwrap();
        assert!(effective.scheduling.is_manual());
        assert!(effective.files.is_ignored("a.tmp"));
        assert_eq!(
            effective.retention.keep_latest,
            Some(crate::policy::DEFAULT_KEEP_LATEST)
        );
    }

    #[tokio::test]
    async fn flush_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("repo.config");
        let repo =
            LocalRepository::create(&config, dir.path().join("storage"), options(), "secret")
                .unwrap();
        let source = repo.client_options().source("/data");

        let chunk = ContentId::compute(b"payload");
        repo.put_content(chunk, b"payload".to_vec()).await.unwrap();
        let file = repo
            .put_object(&Object::File(FileObject {
                length: 7,
                chunks: vec![crate::object::ChunkRef {
                    id: chunk,
                    length: 7,
                }],
            }))
            .await
            .unwrap();
        let kept = repo.save_manifest(manifest(&source, 1)).await.unwrap();
        let dropped = repo.save_manifest(manifest(&source, 2)).await.unwrap();
        repo.set_policy(&PolicyTarget::Global, Policy::default().with_manual(true))
            .await
            .unwrap();
        repo.flush().await.unwrap();
        repo.delete_manifest(&dropped).await.unwrap();
        repo.flush().await.unwrap();
        assert_eq!(repo.pending_blobs(), 0);

        let reopened = LocalRepository::open(&config, "secret", "test").unwrap();
        assert_eq!(reopened.client_options(), options());
        let manifests = reopened.list_manifests(&source).await.unwrap();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0].id, kept);

        let mut out = Vec::new();
        reopened
            .open_object(&file)
            .await
            .unwrap()
            .read_to_end(&mut out)
            .unwrap();
        assert_eq!(out, b"payload");

        let global = reopened.get_policy(&PolicyTarget::Global).await.unwrap();
        assert!(global.unwrap().scheduling.is_manual());
    }

    #[test]
    fn open_checks_password_and_config() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("repo.config");
        assert!(matches!(
            LocalRepository::open(&config, "secret", "test"),
            Err(RepoError::NotConnected(_))
        ));

        LocalRepository::create(&config, dir.path().join("storage"), options(), "secret").unwrap();
        assert!(matches!(
            LocalRepository::open(&config, "wrong", "test"),
            Err(RepoError::InvalidPassword)
        ));
    }

    #[test]
    fn persisted_password_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let config = dir.path().join("repo.config");
        assert_eq!(get_persisted_password(&config), None);

        persist_password(&config, "hunter2").unwrap();
        assert_eq!(
            password_file(&config),
            dir.path().join("repo.config.password")
        );
        assert_eq!(get_persisted_password(&config).as_deref(), Some("hunter2"));
    }
}
