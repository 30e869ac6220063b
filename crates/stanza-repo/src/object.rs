//! Repository objects
//!
//! Two kinds of objects are stored:
//! - [`FileObject`]: ordered list of content chunks
//! - [`DirObject`]: named entries pointing at other objects
//!
//! Objects are serialized deterministically and addressed by the hash of
//! their encoding, so identical trees share storage.

use crate::error::{RepoError, RepoResult};
use crate::hash::{ContentId, ObjectId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{self, Read};
use std::sync::Arc;

/// Reference to one stored chunk of file content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkRef {
    /// Content id of the chunk
    pub id: ContentId,
    /// Chunk length in bytes
    pub length: u64,
}

/// File content as a chunk list
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileObject {
    /// Total length in bytes
    pub length: u64,
    /// Chunks in file order
    pub chunks: Vec<ChunkRef>,
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    /// Regular file
    File,
    /// Sub-directory
    Directory,
}

/// One named entry of a directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    /// Entry kind
    pub kind: EntryKind,
    /// Object holding the entry's content
    pub object_id: ObjectId,
    /// Logical size (recursive for directories)
    pub size: u64,
    /// Modification time, if the source knew one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified: Option<DateTime<Utc>>,
}

/// Directory listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirObject {
    /// Entries by name
    pub entries: BTreeMap<String, DirEntry>,
}

/// A stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Object {
    /// File content
    File(FileObject),
    /// Directory listing
    Directory(DirObject),
}

impl Object {
    /// Serialize and compute the object id
    ///
    /// # Errors
    /// [`RepoError::Serialization`] if encoding fails
    pub fn encode(&self) -> RepoResult<(ObjectId, Vec<u8>)> {
        let bytes = serde_json::to_vec(self)?;
        Ok((ObjectId::new(ContentId::compute(&bytes)), bytes))
    }

    /// Decode a serialized object
    ///
    /// # Errors
    /// [`RepoError::Serialization`] if the bytes are not an object
    pub fn decode(bytes: &[u8]) -> RepoResult<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }

    /// Kind name for diagnostics
    #[inline]
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::File(_) => "file",
            Self::Directory(_) => "directory",
        }
    }

    /// Unwrap a file object
    ///
    /// # Errors
    /// [`RepoError::UnexpectedObjectKind`] for directories
    pub fn into_file(self, id: ObjectId) -> RepoResult<FileObject> {
        match self {
            Self::File(f) => Ok(f),
            Self::Directory(_) => Err(RepoError::UnexpectedObjectKind {
                id,
                expected: "file",
            }),
        }
    }

    /// Unwrap a directory object
    ///
    /// # Errors
    /// [`RepoError::UnexpectedObjectKind`] for files
    pub fn into_dir(self, id: ObjectId) -> RepoResult<DirObject> {
        match self {
            Self::Directory(d) => Ok(d),
            Self::File(_) => Err(RepoError::UnexpectedObjectKind {
                id,
                expected: "directory",
            }),
        }
    }
}

/// Synchronous access to stored chunks
pub trait ContentSource: Send + Sync {
    /// Read one chunk
    ///
    /// # Errors
    /// [`RepoError::ContentNotFound`] or an I/O error
    fn read_content(&self, id: &ContentId) -> RepoResult<Arc<[u8]>>;
}

/// Streams the bytes of a [`FileObject`], loading one chunk at a time
pub struct ChunkReader {
    source: Arc<dyn ContentSource>,
    chunks: std::vec::IntoIter<ChunkRef>,
    current: Option<Arc<[u8]>>,
    offset: usize,
}

impl ChunkReader {
    /// Create reader over a file's chunks
    #[must_use]
    pub fn new(source: Arc<dyn ContentSource>, file: FileObject) -> Self {
        Self {
            source,
            chunks: file.chunks.into_iter(),
            current: None,
            offset: 0,
        }
    }
}

impl Read for ChunkReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            if let Some(chunk) = &self.current {
                if self.offset < chunk.len() {
                    let n = buf.len().min(chunk.len() - self.offset);
                    buf[..n].copy_from_slice(&chunk[self.offset..self.offset + n]);
                    self.offset += n;
                    return Ok(n);
                }
            }
            match self.chunks.next() {
                Some(next) => {
                    let data = self.source.read_content(&next.id).map_err(io::Error::other)?;
                    self.current = Some(data);
                    self.offset = 0;
                }
                None => return Ok(0),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct Chunks(HashMap<ContentId, Arc<[u8]>>);

    impl ContentSource for Chunks {
        fn read_content(&self, id: &ContentId) -> RepoResult<Arc<[u8]>> {
            self.0.get(id).cloned().ok_or(RepoError::ContentNotFound(*id))
        }
    }

    fn file_of(parts: &[&[u8]]) -> (Arc<dyn ContentSource>, FileObject) {
        let mut map = HashMap::new();
        let mut file = FileObject::default();
        for part in parts {
            let id = ContentId::compute(part);
            map.insert(id, Arc::<[u8]>::from(*part));
            file.chunks.push(ChunkRef {
                id,
                length: part.len() as u64,
            });
            file.length += part.len() as u64;
        }
        (Arc::new(Chunks(map)), file)
    }

    #[test]
    fn encoding_is_deterministic() {
        let mut a = DirObject::default();
        let mut b = DirObject::default();
        let entry = |n: &[u8]| DirEntry {
            kind: EntryKind::File,
            object_id: ObjectId::new(ContentId::compute(n)),
            size: 1,
            modified: None,
        };
        a.entries.insert("x".into(), entry(b"x"));
        a.entries.insert("y".into(), entry(b"y"));
        b.entries.insert("y".into(), entry(b"y"));
        b.entries.insert("x".into(), entry(b"x"));

        let (ida, _) = Object::Directory(a).encode().unwrap();
        let (idb, _) = Object::Directory(b).encode().unwrap();
        assert_eq!(ida, idb);
    }

    #[test]
    fn decode_roundtrip_and_kind() {
        let (id, bytes) = Object::File(FileObject::default()).encode().unwrap();
        let obj = Object::decode(&bytes).unwrap();
        assert_eq!(obj.kind_name(), "file");
        assert!(obj.clone().into_file(id).is_ok());
        assert!(matches!(
            obj.into_dir(id),
            Err(RepoError::UnexpectedObjectKind { expected: "directory", .. })
        ));
    }

    #[test]
    fn chunk_reader_concatenates_chunks() {
        let (source, file) = file_of(&[b"hello ", b"chunked ", b"world"]);
        let mut out = String::new();
        ChunkReader::new(source, file).read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello chunked world");
    }

    #[test]
    fn chunk_reader_small_buffer() {
        let (source, file) = file_of(&[b"abc", b"", b"defg"]);
        let mut reader = ChunkReader::new(source, file);
        let mut buf = [0u8; 2];
        let mut out = Vec::new();
        loop {
            let n = reader.read(&mut buf).unwrap();
            if n == 0 {
                break;
            }
            out.extend_from_slice(&buf[..n]);
        }
        assert_eq!(out, b"abcdefg");
    }

    #[test]
    fn chunk_reader_missing_chunk_is_io_error() {
        let (_, file) = file_of(&[b"gone"]);
        let empty: Arc<dyn ContentSource> = Arc::new(Chunks(HashMap::new()));
        let mut out = Vec::new();
        assert!(ChunkReader::new(empty, file).read_to_end(&mut out).is_err());
    }

    proptest::proptest! {
        #[test]
        fn chunk_reader_yields_concatenation(
            parts in proptest::collection::vec(proptest::collection::vec(proptest::num::u8::ANY, 0..64), 0..8),
            buf_len in 1usize..17,
        ) {
            let slices: Vec<&[u8]> = parts.iter().map(Vec::as_slice).collect();
            let (source, file) = file_of(&slices);
            let mut reader = ChunkReader::new(source, file);
            let mut buf = vec![0u8; buf_len];
            let mut out = Vec::new();
            loop {
                let n = reader.read(&mut buf).unwrap();
                if n == 0 {
                    break;
                }
                out.extend_from_slice(&buf[..n]);
            }
            proptest::prop_assert_eq!(out, parts.concat());
        }
    }
}
