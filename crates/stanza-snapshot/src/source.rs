//! Virtual source trees
//!
//! A snapshot is taken of a [`StaticDirectory`]: an in-memory tree whose
//! files are streams, byte buffers or paths on the local filesystem.

use chrono::{DateTime, Utc};
use std::fmt;
use std::fs;
use std::io::{self, Cursor, Read};
use std::path::{Path, PathBuf};

/// Where a file's bytes come from
pub enum FileContent {
    /// One-shot stream
    Stream(Box<dyn Read + Send>),
    /// In-memory bytes
    Bytes(Vec<u8>),
    /// Local file, opened on upload
    Path(PathBuf),
}

impl FileContent {
    /// Open for reading
    ///
    /// # Errors
    /// I/O error opening a local file
    pub fn open(self) -> io::Result<Box<dyn Read + Send>> {
        Ok(match self {
            Self::Stream(reader) => reader,
            Self::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            Self::Path(path) => Box::new(fs::File::open(path)?),
        })
    }
}

impl fmt::Debug for FileContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(_) => f.write_str("Stream"),
            Self::Bytes(b) => write!(f, "Bytes({})", b.len()),
            Self::Path(p) => f.debug_tuple("Path").field(p).finish(),
        }
    }
}

/// A file in a source tree
#[derive(Debug)]
pub struct FileEntry {
    /// Entry name
    pub name: String,
    /// Size, when known up front
    pub size: Option<u64>,
    /// Modification time, when known
    pub modified: Option<DateTime<Utc>>,
    /// Content
    pub content: FileContent,
}

impl FileEntry {
    /// File read once from a stream; never reused from a baseline
    #[must_use]
    pub fn streaming(name: impl Into<String>, reader: impl Read + Send + 'static) -> Self {
        Self {
            name: name.into(),
            size: None,
            modified: None,
            content: FileContent::Stream(Box::new(reader)),
        }
    }

    /// File with known content and modification time
    #[must_use]
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>, modified: DateTime<Utc>) -> Self {
        let bytes = bytes.into();
        Self {
            name: name.into(),
            size: Some(bytes.len() as u64),
            modified: Some(modified),
            content: FileContent::Bytes(bytes),
        }
    }

    /// File on the local filesystem
    #[must_use]
    pub fn from_path(
        name: impl Into<String>,
        path: impl Into<PathBuf>,
        size: u64,
        modified: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            name: name.into(),
            size: Some(size),
            modified,
            content: FileContent::Path(path.into()),
        }
    }
}

/// An entry in a source tree
#[derive(Debug)]
pub enum Entry {
    /// File
    File(FileEntry),
    /// Sub-directory
    Directory(StaticDirectory),
}

impl Entry {
    /// Entry name
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::File(f) => &f.name,
            Self::Directory(d) => &d.name,
        }
    }
}

impl From<FileEntry> for Entry {
    fn from(file: FileEntry) -> Self {
        Self::File(file)
    }
}

impl From<StaticDirectory> for Entry {
    fn from(dir: StaticDirectory) -> Self {
        Self::Directory(dir)
    }
}

/// Directory with a fixed list of entries
#[derive(Debug, Default)]
pub struct StaticDirectory {
    /// Directory name
    pub name: String,
    /// Entries in upload order
    pub entries: Vec<Entry>,
}

impl StaticDirectory {
    /// Create a directory
    #[must_use]
    pub fn new(name: impl Into<String>, entries: Vec<Entry>) -> Self {
        Self {
            name: name.into(),
            entries,
        }
    }

    /// Append an entry
    #[must_use]
    pub fn with_entry(mut self, entry: impl Into<Entry>) -> Self {
        self.entries.push(entry.into());
        self
    }

    /// Load a local directory tree
    ///
    /// Symlinks and special files are skipped.
    ///
    /// # Errors
    /// I/O errors listing the tree
    pub fn from_local_dir(path: &Path) -> io::Result<Self> {
        let name = path
            .file_name()
            .map_or_else(|| path.display().to_string(), |n| n.to_string_lossy().into_owned());
        let mut entries = Vec::new();
        let mut listing: Vec<_> = fs::read_dir(path)?.collect::<io::Result<_>>()?;
        listing.sort_by_key(fs::DirEntry::file_name);

        for item in listing {
            let file_type = item.file_type()?;
            let item_path = item.path();
            if file_type.is_dir() {
                entries.push(Entry::Directory(Self::from_local_dir(&item_path)?));
            } else if file_type.is_file() {
                let meta = item.metadata()?;
                let modified = meta.modified().ok().map(DateTime::<Utc>::from);
                entries.push(Entry::File(FileEntry::from_path(
                    item.file_name().to_string_lossy(),
                    item_path,
                    meta.len(),
                    modified,
                )));
            }
        }
        Ok(Self { name, entries })
    }

    /// Number of files and their known total size
    #[must_use]
    pub fn estimate(&self) -> (u64, u64) {
        self.entries.iter().fold((0, 0), |(files, bytes), entry| match entry {
            Entry::File(f) => (files + 1, bytes + f.size.unwrap_or(0)),
            Entry::Directory(d) => {
                let (f, b) = d.estimate();
                (files + f, bytes + b)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn estimate_counts_nested_files() {
        let now = Utc::now();
        let tree = StaticDirectory::new("root", vec![])
            .with_entry(FileEntry::from_bytes("a", b"12345".to_vec(), now))
            .with_entry(FileEntry::streaming("s", io::empty()))
            .with_entry(
                StaticDirectory::new("sub", vec![])
                    .with_entry(FileEntry::from_bytes("b", b"123".to_vec(), now)),
            );
        assert_eq!(tree.estimate(), (3, 8));
    }

    #[test]
    fn local_dir_is_loaded_sorted() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b.txt"), b"bb").unwrap();
        fs::write(dir.path().join("a.txt"), b"a").unwrap();
        fs::create_dir(dir.path().join("nested")).unwrap();
        fs::write(dir.path().join("nested").join("c.txt"), b"ccc").unwrap();

        let tree = StaticDirectory::from_local_dir(dir.path()).unwrap();
        let names: Vec<_> = tree.entries.iter().map(Entry::name).collect();
        assert_eq!(names, vec!["a.txt", "b.txt", "nested"]);
        assert_eq!(tree.estimate(), (3, 6));

        let Entry::File(a) = &tree.entries[0] else {
            panic!("expected file");
        };
        assert_eq!(a.size, Some(1));
        assert!(a.modified.is_some());
    }

    #[test]
    fn content_opens_as_reader() {
        let mut out = String::new();
        FileContent::Bytes(b"hi".to_vec())
            .open()
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        assert_eq!(out, "hi");
    }
}
