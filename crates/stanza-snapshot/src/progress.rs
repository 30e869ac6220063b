//! Upload progress reporting
//!
//! The uploader calls an [`UploadProgress`] as it walks the source tree.
//! [`SnapshotProgress`] accumulates counters; it may be shared across the
//! hashing workers, so counters are atomics and only the estimates take a
//! lock.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Callbacks invoked during an upload
///
/// Every method has a no-op default.
#[allow(unused_variables)]
pub trait UploadProgress: Send + Sync {
    /// Upload is starting
    fn upload_started(&self) {}
    /// Estimated size of the source tree
    fn estimated_data_size(&self, file_count: u64, total_bytes: u64) {}
    /// File content is about to be hashed
    fn hashing_file(&self, name: &str) {}
    /// File content has been hashed
    fn finished_hashing_file(&self, name: &str, bytes: u64) {}
    /// Bytes hashed
    fn hashed_bytes(&self, bytes: u64) {}
    /// File reused from the baseline without reading
    fn cached_file(&self, name: &str, bytes: u64) {}
    /// Chunk already present in the repository
    fn cached_bytes(&self, bytes: u64) {}
    /// New content written
    fn uploaded_bytes(&self, bytes: u64) {}
    /// Entry left out by policy
    fn excluded_file(&self, name: &str) {}
    /// Directory walk started
    fn started_directory(&self, name: &str) {}
    /// Directory walk finished
    fn finished_directory(&self, name: &str) {}
    /// Upload is done
    fn upload_finished(&self) {}
}

/// Progress sink that ignores everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl UploadProgress for NullProgress {}

/// Point-in-time byte counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressStats {
    /// Bytes hashed
    pub hashed: u64,
    /// Bytes not written because they were already stored
    pub cached: u64,
    /// Bytes written
    pub uploaded: u64,
}

#[derive(Debug, Default)]
struct Estimates {
    file_count: u64,
    total_bytes: u64,
}

/// Accumulating progress counters
#[derive(Debug, Default)]
pub struct SnapshotProgress {
    uploaded_bytes: AtomicU64,
    cached_bytes: AtomicU64,
    hashed_bytes: AtomicU64,

    cached_files: AtomicU64,
    hashed_files: AtomicU64,
    uploaded_chunks: AtomicU64,
    in_progress_hashing: AtomicI64,

    uploading: AtomicBool,
    finished: AtomicBool,

    estimates: Mutex<Estimates>,
}

impl SnapshotProgress {
    /// Create empty counters
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Byte counters
    #[must_use]
    pub fn stats(&self) -> ProgressStats {
        ProgressStats {
            hashed: self.hashed_bytes.load(Ordering::Relaxed),
            cached: self.cached_bytes.load(Ordering::Relaxed),
            uploaded: self.uploaded_bytes.load(Ordering::Relaxed),
        }
    }

    /// Estimated `(file_count, total_bytes)`
    #[must_use]
    pub fn estimate(&self) -> (u64, u64) {
        let estimates = self.estimates.lock();
        (estimates.file_count, estimates.total_bytes)
    }

    /// Files reused from the baseline
    #[must_use]
    pub fn cached_files(&self) -> u64 {
        self.cached_files.load(Ordering::Relaxed)
    }

    /// Files fully hashed
    #[must_use]
    pub fn hashed_files(&self) -> u64 {
        self.hashed_files.load(Ordering::Relaxed)
    }

    /// Chunks written
    #[must_use]
    pub fn uploaded_chunks(&self) -> u64 {
        self.uploaded_chunks.load(Ordering::Relaxed)
    }

    /// Files currently being hashed
    #[must_use]
    pub fn in_progress_hashing(&self) -> i64 {
        self.in_progress_hashing.load(Ordering::Relaxed)
    }

    /// Check if an upload is running
    #[must_use]
    pub fn is_uploading(&self) -> bool {
        self.uploading.load(Ordering::Acquire) && !self.finished.load(Ordering::Acquire)
    }
}

impl UploadProgress for SnapshotProgress {
    fn upload_started(&self) {
        for counter in [
            &self.uploaded_bytes,
            &self.cached_bytes,
            &self.hashed_bytes,
            &self.cached_files,
            &self.hashed_files,
            &self.uploaded_chunks,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
        self.in_progress_hashing.store(0, Ordering::Relaxed);
        *self.estimates.lock() = Estimates::default();
        self.finished.store(false, Ordering::Release);
        self.uploading.store(true, Ordering::Release);
    }

    fn estimated_data_size(&self, file_count: u64, total_bytes: u64) {
        let mut estimates = self.estimates.lock();
        estimates.file_count = file_count;
        estimates.total_bytes = total_bytes;
    }

    fn hashing_file(&self, _name: &str) {
        self.in_progress_hashing.fetch_add(1, Ordering::Relaxed);
    }

    fn finished_hashing_file(&self, _name: &str, _bytes: u64) {
        self.hashed_files.fetch_add(1, Ordering::Relaxed);
        self.in_progress_hashing.fetch_sub(1, Ordering::Relaxed);
    }

    fn hashed_bytes(&self, bytes: u64) {
        self.hashed_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn cached_file(&self, _name: &str, bytes: u64) {
        self.cached_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.cached_files.fetch_add(1, Ordering::Relaxed);
    }

    fn cached_bytes(&self, bytes: u64) {
        self.cached_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    fn uploaded_bytes(&self, bytes: u64) {
        self.uploaded_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.uploaded_chunks.fetch_add(1, Ordering::Relaxed);
    }

    fn upload_finished(&self) {
        self.finished.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counters_accumulate_across_threads() {
        let progress = Arc::new(SnapshotProgress::new());
        progress.upload_started();
        assert!(progress.is_uploading());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let p = Arc::clone(&progress);
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        p.hashed_bytes(10);
                        p.uploaded_bytes(5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let stats = progress.stats();
        assert_eq!(stats.hashed, 4000);
        assert_eq!(stats.uploaded, 2000);
        assert_eq!(progress.uploaded_chunks(), 400);

        progress.upload_finished();
        assert!(!progress.is_uploading());
    }

    #[test]
    fn restart_resets_counters() {
        let progress = SnapshotProgress::new();
        progress.cached_file("a", 7);
        progress.estimated_data_size(3, 30);
        assert_eq!(progress.cached_files(), 1);
        assert_eq!(progress.estimate(), (3, 30));

        progress.upload_started();
        assert_eq!(progress.stats(), ProgressStats::default());
        assert_eq!(progress.estimate(), (0, 0));
    }

    #[test]
    fn hashing_tracks_in_progress() {
        let progress = SnapshotProgress::new();
        progress.hashing_file("a");
        progress.hashing_file("b");
        progress.finished_hashing_file("a", 1);
        assert_eq!(progress.in_progress_hashing(), 1);
        assert_eq!(progress.hashed_files(), 1);
    }
}
