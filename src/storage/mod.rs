// src/storage/mod.rs

//! Storage abstraction for the mirror tree
//!
//! All mirror writes go through a `StorageBackend`. The filesystem driver
//! is the production one; the trait keeps the pipeline portable to object
//! stores, whose drivers emulate rename and symlink. The two invariants
//! every backend must uphold:
//!
//! - `write`/`write_binary` are atomic with respect to readers: bytes land
//!   in a sibling temp name starting with `.` and are renamed into place.
//!   Disk-full during a write never corrupts the previous value.
//! - `rename` is atomic within a single backend instance.

pub mod filesystem;

use crate::error::{Error, Result};
use crate::hash::DigestName;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fs2::FileExt;
use std::fs::File;
use std::path::{Path, PathBuf};

pub use filesystem::FilesystemBackend;

/// Size and mtime of a stored file, for `compare-method = stat`.
///
/// Backends that cannot preserve client-set timestamps (some object
/// stores) report `mtime = None`, which degrades the stat comparison to
/// size-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileInfo {
    pub size: u64,
    pub mtime: Option<DateTime<Utc>>,
}

/// One entry from `scandir`
#[derive(Debug, Clone)]
pub struct DirEntryInfo {
    pub name: String,
    pub path: PathBuf,
    pub is_dir: bool,
}

/// In-flight streaming write; bytes become visible only on `commit`
#[async_trait]
pub trait StreamingWrite: Send {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()>;

    /// Rename the temp file into its final path
    async fn commit(self: Box<Self>) -> Result<()>;

    /// Drop the temp file, leaving the destination untouched
    async fn abort(self: Box<Self>) -> Result<()>;
}

/// Uniform storage operations over a pluggable backend
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Driver name for logging
    fn name(&self) -> &'static str;

    async fn read(&self, path: &Path) -> Result<String>;
    async fn read_binary(&self, path: &Path) -> Result<Vec<u8>>;

    /// Atomic text write (temp + rename)
    async fn write(&self, path: &Path, content: &str) -> Result<()>;

    /// Atomic binary write (temp + rename)
    async fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()>;

    async fn exists(&self, path: &Path) -> bool;
    async fn is_dir(&self, path: &Path) -> bool;
    async fn is_file(&self, path: &Path) -> bool;

    async fn delete(&self, path: &Path) -> Result<()>;

    /// Remove a directory; with `recurse` the whole tree goes
    async fn rmdir(&self, path: &Path, recurse: bool) -> Result<()>;

    /// Atomic move within this backend
    async fn rename(&self, from: &Path, to: &Path) -> Result<()>;

    async fn copy(&self, from: &Path, to: &Path) -> Result<()>;

    async fn mkdir(&self, path: &Path) -> Result<()>;

    /// Point `link` at `target`. Emulated as a pointer file on backends
    /// without native symlinks; readers must not depend on kernel-visible
    /// links.
    async fn symlink(&self, target: &Path, link: &Path) -> Result<()>;

    /// Immediate children of a directory
    async fn scandir(&self, path: &Path) -> Result<Vec<DirEntryInfo>>;

    /// All files beneath a directory, recursively
    async fn walk(&self, path: &Path) -> Result<Vec<PathBuf>>;

    async fn file_info(&self, path: &Path) -> Result<FileInfo>;

    /// Digest of a stored file; offloaded off the async runtime
    async fn hash_file(&self, path: &Path, digest: DigestName) -> Result<String>;

    /// Whether two stored files have identical content under `digest`
    async fn compare_files(&self, a: &Path, b: &Path, digest: DigestName) -> Result<bool> {
        let ha = self.hash_file(a, digest).await?;
        let hb = self.hash_file(b, digest).await?;
        Ok(ha == hb)
    }

    /// Open a temp-backed streaming write that commits atomically
    async fn open_streaming_write(&self, path: &Path) -> Result<Box<dyn StreamingWrite>>;
}

/// Scoped exclusive lock over the whole mirror directory
///
/// Held for the lifetime of a run; a second wheelhouse process against the
/// same directory fails fast with `LockContention`. The flock releases on
/// every exit path because the handle closes on drop.
pub struct MirrorLock {
    #[allow(dead_code)]
    file: File,
    path: PathBuf,
}

impl MirrorLock {
    /// Lock file name inside the mirror directory
    pub const LOCK_NAME: &'static str = ".lock";

    /// Try to take the lock without blocking
    pub fn acquire(mirror_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(mirror_dir)
            .map_err(|e| Error::IoError(format!("cannot create {}: {e}", mirror_dir.display())))?;
        let path = mirror_dir.join(Self::LOCK_NAME);
        let file = File::create(&path)
            .map_err(|e| Error::IoError(format!("cannot create {}: {e}", path.display())))?;

        match file.try_lock_exclusive() {
            Ok(()) => {
                tracing::debug!("Acquired mirror lock at {}", path.display());
                Ok(Self { file, path })
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => Err(Error::LockContention(
                format!("another instance is running against {}", mirror_dir.display()),
            )),
            Err(e) => Err(Error::IoError(format!(
                "cannot lock {}: {e}",
                path.display()
            ))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for MirrorLock {
    fn drop(&mut self) {
        tracing::debug!("Released mirror lock at {}", self.path.display());
    }
}
