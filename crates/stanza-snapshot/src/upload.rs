//! Source tree upload
//!
//! Files are split into fixed-size chunks. Each batch is read on tokio's
//! blocking pool and hashed in parallel on the rayon pool; chunks already in
//! the repository are skipped. The context is checked around every batch.
//! A file whose name, size and modification time match the baseline entry is
//! reused without being read.

use crate::error::UploadError;
use crate::progress::{NullProgress, UploadProgress};
use crate::source::{Entry, FileEntry, StaticDirectory};
use chrono::Utc;
use futures::future::{BoxFuture, FutureExt};
use rayon::prelude::*;
use stanza_core::ExecContext;
use stanza_repo::{
    ChunkRef, ContentId, DirEntry, DirObject, EntryKind, FilesPolicy, FileObject, Manifest,
    ManifestId, Object, ObjectId, Policy, Repository, SnapshotStats, SourceInfo,
};
use std::io::{self, ErrorKind, Read};
use std::sync::Arc;
use tracing::debug;

/// Default chunk size (4 MiB)
pub const DEFAULT_CHUNK_SIZE: usize = 4 * 1024 * 1024;

/// Uploads source trees into a repository
#[derive(Clone)]
pub struct Uploader {
    chunk_size: usize,
    batch: usize,
    progress: Arc<dyn UploadProgress>,
}

impl std::fmt::Debug for Uploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uploader")
            .field("chunk_size", &self.chunk_size)
            .field("batch", &self.batch)
            .finish_non_exhaustive()
    }
}

impl Default for Uploader {
    fn default() -> Self {
        Self::new()
    }
}

impl Uploader {
    /// Create uploader with default chunking and no progress reporting
    #[must_use]
    pub fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            batch: rayon::current_num_threads().max(1),
            progress: Arc::new(NullProgress),
        }
    }

    /// Set chunk size
    #[inline]
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Set progress sink
    #[inline]
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn UploadProgress>) -> Self {
        self.progress = progress;
        self
    }

    /// Chunk size in bytes
    #[inline]
    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Upload `root` and build an unsaved manifest for it
    ///
    /// `previous` is the baseline used to reuse unchanged files. A cancelled
    /// or failed upload yields no manifest.
    ///
    /// # Errors
    /// - [`UploadError::Interrupted`] when the context finishes
    /// - [`UploadError::Repo`] / [`UploadError::Read`] on storage or source failures
    pub async fn upload(
        &self,
        ctx: &ExecContext,
        repo: &dyn Repository,
        root: StaticDirectory,
        policy: &Policy,
        source: &SourceInfo,
        previous: Option<&Manifest>,
    ) -> Result<Manifest, UploadError> {
        let start_time = Utc::now();
        self.progress.upload_started();
        let (files, bytes) = root.estimate();
        self.progress.estimated_data_size(files, bytes);

        let baseline = match previous {
            Some(manifest) => load_dir(repo, manifest.root_object_id).await,
            None => None,
        };

        let mut stats = SnapshotStats::default();
        let result = self
            .upload_dir(ctx, repo, root, baseline, &policy.files, &mut stats)
            .await;
        self.progress.upload_finished();
        let (root_object_id, _) = result?;

        debug!(
            %source,
            files = stats.total_files,
            dirs = stats.total_dirs,
            cached = stats.cached_files,
            uploaded_bytes = stats.uploaded_bytes,
            "Upload finished"
        );

        Ok(Manifest {
            id: ManifestId::default(),
            source: source.clone(),
            description: String::new(),
            start_time,
            end_time: Utc::now(),
            root_object_id,
            incomplete_reason: String::new(),
            stats,
        })
    }

    fn upload_dir<'a>(
        &'a self,
        ctx: &'a ExecContext,
        repo: &'a dyn Repository,
        dir: StaticDirectory,
        baseline: Option<DirObject>,
        files: &'a FilesPolicy,
        stats: &'a mut SnapshotStats,
    ) -> BoxFuture<'a, Result<(ObjectId, u64), UploadError>> {
        async move {
            self.progress.started_directory(&dir.name);
            let mut listing = DirObject::default();
            let mut total = 0u64;

            for entry in dir.entries {
                ctx.check()?;
                let name = entry.name().to_string();
                if files.is_ignored(&name) {
                    stats.excluded_files += 1;
                    self.progress.excluded_file(&name);
                    continue;
                }
                let prior = baseline.as_ref().and_then(|b| b.entries.get(&name));

                let uploaded = match entry {
                    Entry::Directory(sub) => {
                        let sub_baseline = match prior {
                            Some(p) if p.kind == EntryKind::Directory => {
                                load_dir(repo, p.object_id).await
                            }
                            _ => None,
                        };
                        let (object_id, size) = self
                            .upload_dir(ctx, repo, sub, sub_baseline, files, stats)
                            .await?;
                        DirEntry {
                            kind: EntryKind::Directory,
                            object_id,
                            size,
                            modified: None,
                        }
                    }
                    Entry::File(file) => self.upload_file(ctx, repo, file, prior, stats).await?,
                };
                total += uploaded.size;
                listing.entries.insert(name, uploaded);
            }

            stats.total_dirs += 1;
            let id = repo.put_object(&Object::Directory(listing)).await?;
            self.progress.finished_directory(&dir.name);
            Ok((id, total))
        }
        .boxed()
    }

    async fn upload_file(
        &self,
        ctx: &ExecContext,
        repo: &dyn Repository,
        file: FileEntry,
        prior: Option<&DirEntry>,
        stats: &mut SnapshotStats,
    ) -> Result<DirEntry, UploadError> {
        let FileEntry {
            name,
            size,
            modified,
            content,
        } = file;

        if let (Some(prior), Some(size), Some(modified)) = (prior, size, modified) {
            if prior.kind == EntryKind::File && prior.size == size && prior.modified == Some(modified) {
                stats.total_files += 1;
                stats.total_bytes += size;
                stats.cached_files += 1;
                self.progress.cached_file(&name, size);
                return Ok(prior.clone());
            }
        }

        let read_err = |source| UploadError::Read {
            path: name.clone(),
            source,
        };
        let mut reader = blocking(move || content.open()).await.map_err(read_err)?;
        self.progress.hashing_file(&name);

        let (chunk_size, max_chunks) = (self.chunk_size, self.batch);
        let mut object = FileObject::default();
        loop {
            ctx.check()?;
            let (returned, batch) = blocking(move || {
                let batch = read_and_hash(&mut reader, chunk_size, max_chunks)?;
                Ok((reader, batch))
            })
            .await
            .map_err(read_err)?;
            reader = returned;
            ctx.check()?;

            for (id, data) in batch.chunks {
                let length = data.len() as u64;
                self.progress.hashed_bytes(length);
                if repo.has_content(&id).await? {
                    self.progress.cached_bytes(length);
                } else {
                    repo.put_content(id, data).await?;
                    stats.uploaded_bytes += length;
                    self.progress.uploaded_bytes(length);
                }
                object.chunks.push(ChunkRef { id, length });
                object.length += length;
            }
            if batch.eof {
                break;
            }
        }
        self.progress.finished_hashing_file(&name, object.length);

        let length = object.length;
        let object_id = repo.put_object(&Object::File(object)).await?;
        stats.total_files += 1;
        stats.total_bytes += length;

        Ok(DirEntry {
            kind: EntryKind::File,
            object_id,
            size: length,
            modified,
        })
    }
}

async fn load_dir(repo: &dyn Repository, id: ObjectId) -> Option<DirObject> {
    match repo.get_object(&id).await.and_then(|o| o.into_dir(id)) {
        Ok(dir) => Some(dir),
        Err(e) => {
            debug!(%id, error = %e, "Baseline directory unavailable");
            None
        }
    }
}

/// Run blocking source I/O off the async worker threads
async fn blocking<T, F>(work: F) -> io::Result<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work).await.map_err(io::Error::other)?
}

/// Chunks of one batch with their content ids
struct HashedBatch {
    chunks: Vec<(ContentId, Vec<u8>)>,
    eof: bool,
}

/// Read a batch and hash its chunks on the rayon pool
fn read_and_hash(reader: &mut dyn Read, chunk_size: usize, max_chunks: usize) -> io::Result<HashedBatch> {
    let (batch, eof) = read_batch(reader, chunk_size, max_chunks)?;
    let ids: Vec<ContentId> = batch.par_iter().map(|c| ContentId::compute(c)).collect();
    Ok(HashedBatch {
        chunks: ids.into_iter().zip(batch).collect(),
        eof,
    })
}

/// Read up to `max_chunks` full chunks; `true` once the reader is exhausted
fn read_batch(
    reader: &mut dyn Read,
    chunk_size: usize,
    max_chunks: usize,
) -> io::Result<(Vec<Vec<u8>>, bool)> {
    let mut batch = Vec::with_capacity(max_chunks);
    while batch.len() < max_chunks {
        let chunk = read_chunk(reader, chunk_size)?;
        let short = chunk.len() < chunk_size;
        if !chunk.is_empty() {
            batch.push(chunk);
        }
        if short {
            return Ok((batch, true));
        }
    }
    Ok((batch, false))
}

fn read_chunk(reader: &mut dyn Read, chunk_size: usize) -> io::Result<Vec<u8>> {
    let mut chunk = vec![0u8; chunk_size];
    let mut filled = 0;
    while filled < chunk_size {
        match reader.read(&mut chunk[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    chunk.truncate(filled);
    Ok(chunk)
}
