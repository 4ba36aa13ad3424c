//! Tree listing and file access.
//!
//! A [`FileTree`] is an ordered list of regular files under a root, addressed by
//! relative paths with forward slashes. Symbolic links are collected separately
//! and never read.

use memmap2::Mmap;
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::{PatchError, Result};

/// One regular file in a tree listing. Size is read on first use unless the
/// lister already knew it.
#[derive(Debug)]
pub struct FileEntry {
    pub relative_path: String,
    pub full_path: PathBuf,
    size: OnceLock<u64>,
}

impl FileEntry {
    pub fn new(root: &Path, relative_path: impl Into<String>) -> Self {
        let relative_path = relative_path.into();
        let full_path = root.join(&relative_path);
        Self {
            relative_path,
            full_path,
            size: OnceLock::new(),
        }
    }

    fn with_size(root: &Path, relative_path: String, size: u64) -> Self {
        let full_path = root.join(&relative_path);
        Self {
            relative_path,
            full_path,
            size: OnceLock::from(size),
        }
    }

    pub fn size(&self) -> Result<u64> {
        if let Some(size) = self.size.get() {
            return Ok(*size);
        }
        let meta = std::fs::metadata(&self.full_path)
            .map_err(|e| PatchError::read(&self.full_path, e))?;
        Ok(*self.size.get_or_init(|| meta.len()))
    }

    pub fn hash(&self) -> Result<blake3::Hash> {
        hash_file_streaming(&self.full_path)
    }
}

/// Read-only view of a file's bytes.
pub enum Contents {
    Mapped(Mmap),
    Empty,
}

impl Contents {
    pub fn open(path: &Path) -> Result<Self> {
        let meta = std::fs::metadata(path).map_err(|e| PatchError::read(path, e))?;
        if meta.len() == 0 {
            return Ok(Contents::Empty);
        }
        mmap_file(path).map(Contents::Mapped)
    }
}

impl Deref for Contents {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        match self {
            Contents::Mapped(map) => map,
            Contents::Empty => &[],
        }
    }
}

/// The regular files (and, separately, symlinks) found under one root.
#[derive(Debug)]
pub struct FileTree {
    pub root: PathBuf,
    pub files: Vec<FileEntry>,
    pub symlinks: Vec<String>,
}

impl FileTree {
    /// Build a tree from an externally produced listing, rejecting duplicates.
    pub fn from_paths<I, S>(root: impl Into<PathBuf>, paths: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let root = root.into();
        let files = paths
            .into_iter()
            .map(|p| FileEntry::new(&root, p))
            .collect();
        Self::checked(root, files, Vec::new())
    }

    fn checked(root: PathBuf, files: Vec<FileEntry>, symlinks: Vec<String>) -> Result<Self> {
        let mut seen = HashSet::with_capacity(files.len());
        for file in &files {
            if !seen.insert(file.relative_path.as_str()) {
                return Err(PatchError::DuplicatePath {
                    root,
                    path: file.relative_path.clone(),
                });
            }
        }
        Ok(Self {
            root,
            files,
            symlinks,
        })
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.iter().map(|f| f.relative_path.as_str())
    }
}

/// Walk `root` and list its regular files in file-name order.
pub fn list_tree(root: &Path) -> Result<FileTree> {
    let listing_error = |source: std::io::Error| PatchError::Listing {
        root: root.to_path_buf(),
        source,
    };

    let meta = std::fs::metadata(root).map_err(listing_error)?;
    if !meta.is_dir() {
        return Err(listing_error(std::io::Error::other("not a directory")));
    }

    let mut files = Vec::new();
    let mut symlinks = Vec::new();

    for entry in WalkDir::new(root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| listing_error(e.into()))?;
        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        let relative = relative_path(root, entry.path())?;
        if file_type.is_symlink() {
            debug!(path = %relative, "skipping symlink");
            symlinks.push(relative);
        } else if file_type.is_file() {
            let size = entry
                .metadata()
                .map_err(|e| listing_error(e.into()))?
                .len();
            files.push(FileEntry::with_size(root, relative, size));
        }
    }

    FileTree::checked(root.to_path_buf(), files, symlinks)
}

/// Join the components of `full` below `root` with `/`. Only real separators
/// are rewritten; a `\` inside a Unix file name stays part of the name.
fn relative_path(root: &Path, full: &Path) -> Result<String> {
    let relative = full.strip_prefix(root).unwrap_or(full);
    let mut parts = Vec::new();
    for component in relative.components() {
        let part = component
            .as_os_str()
            .to_str()
            .ok_or_else(|| PatchError::UnsupportedPath {
                path: full.to_path_buf(),
                reason: "path is not valid UTF-8",
            })?;
        parts.push(part);
    }
    Ok(parts.join("/"))
}

/// Memory-map a file for read-only access.
///
/// # Safety
/// The mapping is read-only. Callers must not concurrently truncate or replace
/// the underlying file while the `Mmap` is live.
pub fn mmap_file(path: &Path) -> Result<Mmap> {
    let file = std::fs::File::open(path).map_err(|e| PatchError::read(path, e))?;
    // SAFETY: input trees are treated as immutable for the whole run.
    unsafe { Mmap::map(&file).map_err(|e| PatchError::read(path, e)) }
}

/// Stream-hash a file using BLAKE3 with a 256 KB buffer.
pub fn hash_file_streaming(path: &Path) -> Result<blake3::Hash> {
    let file = std::fs::File::open(path).map_err(|e| PatchError::read(path, e))?;
    let mut reader = std::io::BufReader::with_capacity(256 * 1024, file);
    let mut hasher = blake3::Hasher::new();
    std::io::copy(&mut reader, &mut hasher).map_err(|e| PatchError::read(path, e))?;
    Ok(hasher.finalize())
}

/// Byte equality of two files: sizes first, hashes only when sizes agree.
pub fn same_content(a: &FileEntry, b: &FileEntry) -> Result<bool> {
    if a.size()? != b.size()? {
        return Ok(false);
    }
    Ok(a.hash()? == b.hash()?)
}

/// Digest of a whole tree: every file in byte-wise path order contributes its
/// path, a NUL, its little-endian length and its own BLAKE3.
pub fn tree_digest(tree: &FileTree) -> Result<blake3::Hash> {
    let mut files: Vec<&FileEntry> = tree.files.iter().collect();
    files.sort_by(|a, b| a.relative_path.cmp(&b.relative_path));

    let mut hasher = blake3::Hasher::new();
    for file in files {
        hasher.update(file.relative_path.as_bytes());
        hasher.update(&[0]);
        hasher.update(&file.size()?.to_le_bytes());
        hasher.update(file.hash()?.as_bytes());
    }
    Ok(hasher.finalize())
}
