// src/storage/filesystem.rs

//! Local filesystem storage driver
//!
//! The production backend. Writes land in a dot-prefixed sibling temp file
//! and rename into place, so readers (including an HTTP server pointed at
//! the tree) never observe partial content. Digest computation and
//! recursive walks run on the blocking pool.

use super::{DirEntryInfo, FileInfo, StorageBackend, StreamingWrite};
use crate::error::{Error, Result};
use crate::hash::{self, DigestName};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::debug;
use walkdir::WalkDir;

/// Map an IO error to the storage error taxonomy, keeping the path
fn io_context(path: &Path, e: std::io::Error) -> Error {
    use std::io::ErrorKind;
    let msg = format!("{}: {e}", path.display());
    match e.kind() {
        ErrorKind::NotFound => Error::NotFound(msg),
        ErrorKind::AlreadyExists => Error::AlreadyExists(msg),
        ErrorKind::PermissionDenied => Error::PermissionDenied(msg),
        ErrorKind::StorageFull => Error::IoFull(msg),
        _ => Error::IoError(msg),
    }
}

/// Sibling temp name for an atomic write: `.{filename}.tmp`
fn temp_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "unnamed".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

#[derive(Debug, Default)]
pub struct FilesystemBackend;

impl FilesystemBackend {
    pub fn new() -> Self {
        Self
    }

    async fn ensure_parent(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| io_context(parent, e))?;
        }
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for FilesystemBackend {
    fn name(&self) -> &'static str {
        "filesystem"
    }

    async fn read(&self, path: &Path) -> Result<String> {
        tokio::fs::read_to_string(path)
            .await
            .map_err(|e| io_context(path, e))
    }

    async fn read_binary(&self, path: &Path) -> Result<Vec<u8>> {
        tokio::fs::read(path).await.map_err(|e| io_context(path, e))
    }

    async fn write(&self, path: &Path, content: &str) -> Result<()> {
        self.write_binary(path, content.as_bytes()).await
    }

    async fn write_binary(&self, path: &Path, content: &[u8]) -> Result<()> {
        self.ensure_parent(path).await?;
        let temp = temp_path(path);
        tokio::fs::write(&temp, content)
            .await
            .map_err(|e| io_context(&temp, e))?;
        match tokio::fs::rename(&temp, path).await {
            Ok(()) => Ok(()),
            Err(e) => {
                // Leave no temp droppings behind a failed rename
                let _ = tokio::fs::remove_file(&temp).await;
                Err(io_context(path, e))
            }
        }
    }

    async fn exists(&self, path: &Path) -> bool {
        tokio::fs::try_exists(path).await.unwrap_or(false)
    }

    async fn is_dir(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_dir())
            .unwrap_or(false)
    }

    async fn is_file(&self, path: &Path) -> bool {
        tokio::fs::metadata(path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false)
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        tokio::fs::remove_file(path)
            .await
            .map_err(|e| io_context(path, e))
    }

    async fn rmdir(&self, path: &Path, recurse: bool) -> Result<()> {
        let result = if recurse {
            tokio::fs::remove_dir_all(path).await
        } else {
            tokio::fs::remove_dir(path).await
        };
        result.map_err(|e| io_context(path, e))
    }

    async fn rename(&self, from: &Path, to: &Path) -> Result<()> {
        self.ensure_parent(to).await?;
        tokio::fs::rename(from, to)
            .await
            .map_err(|e| io_context(to, e))
    }

    async fn copy(&self, from: &Path, to: &Path) -> Result<()> {
        self.ensure_parent(to).await?;
        tokio::fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|e| io_context(to, e))
    }

    async fn mkdir(&self, path: &Path) -> Result<()> {
        tokio::fs::create_dir_all(path)
            .await
            .map_err(|e| io_context(path, e))
    }

    async fn symlink(&self, target: &Path, link: &Path) -> Result<()> {
        self.ensure_parent(link).await?;
        if self.exists(link).await {
            tokio::fs::remove_file(link)
                .await
                .map_err(|e| io_context(link, e))?;
        }
        #[cfg(unix)]
        {
            tokio::fs::symlink(target, link)
                .await
                .map_err(|e| io_context(link, e))
        }
        #[cfg(not(unix))]
        {
            // Pointer-file emulation for platforms without symlinks
            self.write(link, &target.to_string_lossy()).await
        }
    }

    async fn scandir(&self, path: &Path) -> Result<Vec<DirEntryInfo>> {
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path)
            .await
            .map_err(|e| io_context(path, e))?;
        while let Some(entry) = dir.next_entry().await.map_err(|e| io_context(path, e))? {
            let file_type = entry.file_type().await.map_err(|e| io_context(path, e))?;
            entries.push(DirEntryInfo {
                name: entry.file_name().to_string_lossy().into_owned(),
                path: entry.path(),
                is_dir: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn walk(&self, path: &Path) -> Result<Vec<PathBuf>> {
        let root = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut files = Vec::new();
            for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
                if entry.file_type().is_file() {
                    files.push(entry.into_path());
                }
            }
            files.sort();
            Ok(files)
        })
        .await
        .map_err(|e| Error::IoError(format!("walk task failed: {e}")))?
    }

    async fn file_info(&self, path: &Path) -> Result<FileInfo> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|e| io_context(path, e))?;
        let mtime = meta
            .modified()
            .ok()
            .map(|t| DateTime::<Utc>::from(t));
        Ok(FileInfo {
            size: meta.len(),
            mtime,
        })
    }

    async fn hash_file(&self, path: &Path, digest: DigestName) -> Result<String> {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || {
            let mut file = std::fs::File::open(&path).map_err(|e| io_context(&path, e))?;
            hash::hash_reader(digest, &mut file).map_err(|e| io_context(&path, e))
        })
        .await
        .map_err(|e| Error::IoError(format!("hash task failed: {e}")))?
    }

    async fn open_streaming_write(&self, path: &Path) -> Result<Box<dyn StreamingWrite>> {
        self.ensure_parent(path).await?;
        let temp = temp_path(path);
        let file = tokio::fs::File::create(&temp)
            .await
            .map_err(|e| io_context(&temp, e))?;
        debug!("Streaming write to {} via {}", path.display(), temp.display());
        Ok(Box::new(FsStreamingWrite {
            file: Some(file),
            temp,
            dest: path.to_path_buf(),
        }))
    }
}

/// Streaming write that commits with an atomic rename
struct FsStreamingWrite {
    file: Option<tokio::fs::File>,
    temp: PathBuf,
    dest: PathBuf,
}

#[async_trait]
impl StreamingWrite for FsStreamingWrite {
    async fn write_chunk(&mut self, data: &[u8]) -> Result<()> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::IoError("write after commit".to_string()))?;
        file.write_all(data)
            .await
            .map_err(|e| io_context(&self.temp, e))
    }

    async fn commit(mut self: Box<Self>) -> Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush().await.map_err(|e| io_context(&self.temp, e))?;
            file.sync_all()
                .await
                .map_err(|e| io_context(&self.temp, e))?;
        }
        tokio::fs::rename(&self.temp, &self.dest)
            .await
            .map_err(|e| io_context(&self.dest, e))
    }

    async fn abort(mut self: Box<Self>) -> Result<()> {
        self.file.take();
        match tokio::fs::remove_file(&self.temp).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_context(&self.temp, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_atomic_write_and_read() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let path = temp.path().join("status");

        backend.write(&path, "12345").await.unwrap();
        assert_eq!(backend.read(&path).await.unwrap(), "12345");

        // Overwrite goes through the same temp+rename path
        backend.write(&path, "67890").await.unwrap();
        assert_eq!(backend.read(&path).await.unwrap(), "67890");

        // No temp file left behind
        assert!(!backend.exists(&temp_path(&path)).await);
    }

    #[tokio::test]
    async fn test_write_creates_parents() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let path = temp.path().join("web/simple/peerme/index.html");
        backend.write(&path, "<html/>").await.unwrap();
        assert!(backend.is_file(&path).await);
    }

    #[tokio::test]
    async fn test_read_missing_is_not_found() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let err = backend.read(&temp.path().join("absent")).await.unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_streaming_write_commit() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let path = temp.path().join("pkg.whl");

        let mut writer = backend.open_streaming_write(&path).await.unwrap();
        writer.write_chunk(b"hello ").await.unwrap();
        writer.write_chunk(b"world").await.unwrap();

        // Destination must not exist before commit
        assert!(!backend.exists(&path).await);

        writer.commit().await.unwrap();
        assert_eq!(backend.read_binary(&path).await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_streaming_write_abort() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let path = temp.path().join("pkg.whl");

        let mut writer = backend.open_streaming_write(&path).await.unwrap();
        writer.write_chunk(b"partial").await.unwrap();
        writer.abort().await.unwrap();

        assert!(!backend.exists(&path).await);
        assert!(!backend.exists(&temp_path(&path)).await);
    }

    #[tokio::test]
    async fn test_hash_file() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let path = temp.path().join("data");
        backend.write_binary(&path, b"hello world").await.unwrap();

        let digest = backend.hash_file(&path, DigestName::Sha256).await.unwrap();
        assert_eq!(
            digest,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn test_walk_and_scandir() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        backend
            .write(&temp.path().join("a/one.txt"), "1")
            .await
            .unwrap();
        backend
            .write(&temp.path().join("a/b/two.txt"), "2")
            .await
            .unwrap();

        let files = backend.walk(temp.path()).await.unwrap();
        assert_eq!(files.len(), 2);

        let entries = backend.scandir(&temp.path().join("a")).await.unwrap();
        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["b", "one.txt"]);
        assert!(entries[0].is_dir);
    }

    #[tokio::test]
    async fn test_rename_and_copy() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let a = temp.path().join("a");
        let b = temp.path().join("sub/b");
        backend.write(&a, "content").await.unwrap();

        backend.copy(&a, &b).await.unwrap();
        assert!(backend.exists(&a).await && backend.exists(&b).await);

        let c = temp.path().join("c");
        backend.rename(&a, &c).await.unwrap();
        assert!(!backend.exists(&a).await);
        assert_eq!(backend.read(&c).await.unwrap(), "content");
    }

    #[tokio::test]
    async fn test_compare_files() {
        let temp = tempfile::tempdir().unwrap();
        let backend = FilesystemBackend::new();
        let a = temp.path().join("a");
        let b = temp.path().join("b");
        backend.write(&a, "same").await.unwrap();
        backend.write(&b, "same").await.unwrap();
        assert!(backend.compare_files(&a, &b, DigestName::Sha256).await.unwrap());

        backend.write(&b, "different").await.unwrap();
        assert!(!backend.compare_files(&a, &b, DigestName::Sha256).await.unwrap());
    }
}
