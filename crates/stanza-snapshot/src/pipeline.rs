//! Snapshot pipeline
//!
//! [`snapshot_source`] drives one snapshot end to end. [`write`] and [`read`]
//! stream a single file into and out of the repository.

use crate::error::{SnapshotError, SnapshotResult, Step};
use crate::source::{FileEntry, StaticDirectory};
use crate::upload::Uploader;
use chrono::{DateTime, Utc};
use stanza_core::ExecContext;
use stanza_repo::{
    get_persisted_password, read_some, BufferPool, ClientOptions, LocalRepository, Manifest, ManifestId, ObjectId, Policy,
    PolicyTarget, RepoResult, Repository, SourceInfo,
};
use std::io::{self, Read, Write};
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info};

/// Description recorded for snapshots taken by [`write`]
pub const WRITE_DESCRIPTION: &str = "Stanza Database Backup";

/// Purpose logged when opening the repository for streaming
pub const STREAM_PURPOSE: &str = "stanza stream push";

/// Open the repository described by `config_path` with its persisted password
///
/// # Errors
/// - [`SnapshotError::MissingPassword`] if no password was persisted
/// - [`SnapshotError::Open`] if the repository cannot be opened
pub fn open_repository(config_path: &Path, purpose: &str) -> SnapshotResult<LocalRepository> {
    let password = get_persisted_password(config_path)
        .filter(|p| !p.is_empty())
        .ok_or(SnapshotError::MissingPassword)?;
    LocalRepository::open(config_path, &password, purpose).map_err(SnapshotError::Open)
}

/// Latest complete manifest of `source` started no later than `no_later_than`
///
/// # Errors
/// Repository errors listing manifests
pub async fn find_previous_snapshot_manifest(
    repo: &dyn Repository,
    source: &SourceInfo,
    no_later_than: Option<DateTime<Utc>>,
) -> RepoResult<Option<Manifest>> {
    let manifests = repo.list_manifests(source).await?;
    let mut previous: Option<Manifest> = None;
    for manifest in manifests {
        if no_later_than.is_some_and(|limit| manifest.start_time > limit) {
            continue;
        }
        if manifest.is_complete()
            && previous
                .as_ref()
                .map_or(true, |p| manifest.start_time > p.start_time)
        {
            previous = Some(manifest);
        }
    }
    Ok(previous)
}

/// Effective policy for `source`
///
/// # Errors
/// Repository errors reading policies
pub async fn policy_tree_for_source(repo: &dyn Repository, source: &SourceInfo) -> RepoResult<Policy> {
    repo.effective_policy(source).await
}

/// Mark `source` as manually scheduled, keeping the rest of its policy
///
/// # Errors
/// Repository errors reading or writing policies
pub async fn set_manual(repo: &dyn Repository, source: &SourceInfo) -> RepoResult<()> {
    let target = PolicyTarget::Source(source.clone());
    let policy = repo.get_policy(&target).await?.unwrap_or_default();
    repo.set_policy(&target, policy.with_manual(true)).await
}

/// Snapshot `root` as `source` and return `(snapshot_id, root_object_id)`
///
/// Steps run in order and stop at the first failure; completed steps are not
/// undone.
///
/// # Errors
/// [`SnapshotError::Step`] naming the failing step
pub async fn snapshot_source(
    ctx: &ExecContext,
    repo: &dyn Repository,
    uploader: &Uploader,
    source: &SourceInfo,
    root: StaticDirectory,
    description: &str,
) -> SnapshotResult<(ManifestId, ObjectId)> {
    info!(%source, "Snapshotting");
    let started = Instant::now();

    let previous = find_previous_snapshot_manifest(repo, source, None)
        .await
        .map_err(|e| SnapshotError::at(Step::FindPrevious, e))?;
    debug!(%source, baseline = ?previous.as_ref().map(|m| m.id.as_str()), "Selected baseline");

    let policy = policy_tree_for_source(repo, source)
        .await
        .map_err(|e| SnapshotError::at(Step::PolicyTree, e))?;

    let mut manifest = uploader
        .upload(ctx, repo, root, &policy, source, previous.as_ref())
        .await
        .map_err(|e| SnapshotError::at(Step::Upload, e))?;
    manifest.description = description.to_string();
    let root_object_id = manifest.root_object_id;

    ctx.check().map_err(|e| SnapshotError::at(Step::Upload, e))?;
    let snapshot_id = repo
        .save_manifest(manifest)
        .await
        .map_err(|e| SnapshotError::at(Step::SaveManifest, e))?;

    apply_retention(repo, source, &snapshot_id).await?;

    set_manual(repo, source)
        .await
        .map_err(|e| SnapshotError::at(Step::SetManual, e))?;

    repo.flush()
        .await
        .map_err(|e| SnapshotError::at(Step::Flush, e))?;

    info!(
        %source,
        root = %root_object_id,
        id = %snapshot_id,
        elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        "Created snapshot"
    );
    Ok((snapshot_id, root_object_id))
}

async fn apply_retention(
    repo: &dyn Repository,
    source: &SourceInfo,
    protect: &ManifestId,
) -> SnapshotResult<()> {
    crate::retention::apply_retention_policy(repo, source, Some(protect))
        .await
        .map(|expired| debug!(%source, expired = expired.len(), "Applied retention"))
        .map_err(|e| SnapshotError::at(Step::ApplyRetention, e))
}

fn split_path(path: &str) -> (String, String) {
    let p = Path::new(path);
    let dir = match p.parent().map(|d| d.to_string_lossy().into_owned()) {
        Some(d) if !d.is_empty() => d,
        _ => ".".to_string(),
    };
    let base = p
        .file_name()
        .map_or_else(|| path.to_string(), |n| n.to_string_lossy().into_owned());
    (dir, base)
}

/// Snapshot a single stream as file `basename(path)` of source `dirname(path)`
///
/// # Errors
/// Any [`snapshot_source`] error
pub async fn write<R>(
    ctx: &ExecContext,
    repo: &dyn Repository,
    path: &str,
    reader: R,
) -> SnapshotResult<(ManifestId, ObjectId)>
where
    R: Read + Send + 'static,
{
    write_as(ctx, repo, &repo.client_options(), path, reader).await
}

/// [`write`] recording the snapshot under another client identity
///
/// # Errors
/// Any [`snapshot_source`] error
pub async fn write_as<R>(
    ctx: &ExecContext,
    repo: &dyn Repository,
    client: &ClientOptions,
    path: &str,
    reader: R,
) -> SnapshotResult<(ManifestId, ObjectId)>
where
    R: Read + Send + 'static,
{
    let (dir, base) = split_path(path);
    let source = client.source(dir.clone());
    let root = StaticDirectory::new(dir, vec![]).with_entry(FileEntry::streaming(base, reader));
    snapshot_source(ctx, repo, &Uploader::new(), &source, root, WRITE_DESCRIPTION).await
}

/// Resolve `<object-id>[/<entry>/...]` to an object id
///
/// # Errors
/// [`SnapshotError::InvalidBackupId`] if the id is malformed or a path
/// component does not exist
pub async fn parse_object_id_with_path(repo: &dyn Repository, backup_id: &str) -> SnapshotResult<ObjectId> {
    let invalid = |reason: String| SnapshotError::InvalidBackupId {
        backup_id: backup_id.to_string(),
        reason,
    };
    let mut parts = backup_id.split('/').filter(|p| !p.is_empty());
    let head = parts.next().ok_or_else(|| invalid("empty id".to_string()))?;
    let mut id: ObjectId = head.parse().map_err(|e| invalid(format!("{e}")))?;

    for name in parts {
        let dir = repo
            .get_object(&id)
            .await
            .and_then(|o| o.into_dir(id))
            .map_err(|e| invalid(e.to_string()))?;
        id = dir
            .entries
            .get(name)
            .map(|entry| entry.object_id)
            .ok_or_else(|| invalid(format!("entry {name} not found")))?;
    }
    Ok(id)
}

/// Stream the object named by `backup_id` into `sink`
///
/// Reads run on tokio's blocking pool; the context is checked before each
/// buffer is written. Returns the number of bytes copied.
///
/// # Errors
/// - [`SnapshotError::InvalidBackupId`] if the id does not resolve
/// - [`SnapshotError::OpenObject`] if the object is not a readable file
/// - [`SnapshotError::Copy`] if streaming fails
pub async fn read<W>(ctx: &ExecContext, repo: &dyn Repository, backup_id: &str, sink: &mut W) -> SnapshotResult<u64>
where
    W: Write + ?Sized,
{
    ctx.check()?;
    let id = parse_object_id_with_path(repo, backup_id).await?;
    let mut reader = repo
        .open_object(&id)
        .await
        .map_err(|source| SnapshotError::OpenObject { id, source })?;

    let mut buf = BufferPool::shared().acquire();
    let mut copied = 0u64;
    loop {
        ctx.check()?;
        let (returned, filled, n) = tokio::task::spawn_blocking(move || {
            let n = read_some(&mut reader, &mut buf);
            (reader, buf, n)
        })
        .await
        .map_err(|e| SnapshotError::Copy(io::Error::other(e)))?;
        (reader, buf) = (returned, filled);
        let n = n.map_err(SnapshotError::Copy)?;
        if n == 0 {
            break;
        }
        sink.write_all(&buf[..n]).map_err(SnapshotError::Copy)?;
        copied += n as u64;
    }
    sink.flush().map_err(SnapshotError::Copy)?;
    debug!(%id, bytes = copied, "Restored object");
    Ok(copied)
}
