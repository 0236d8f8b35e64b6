// src/package.rs

//! Per-project sync pipeline
//!
//! One `PackageSync` processes one project end-to-end: fetch metadata,
//! run the filter chain, plan the wanted file set, diff it against disk,
//! download what is missing with integrity checks, and publish the index
//! documents and JSON mirror. The pipeline is strictly sequential within
//! a project; the scheduler guarantees no two pipelines run for the same
//! project concurrently.

use crate::config::{CompareMethod, MirrorConfig};
use crate::error::{Error, Result};
use crate::filters::{FilterChain, FilterDecision};
use crate::hash::DigestName;
use crate::model::{self, normalize, ProjectMetadata, Release, ReleaseFile};
use crate::simple::SimpleApi;
use crate::storage::StorageBackend;
use crate::upstream::UpstreamClient;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Download attempts per file before the project fails
const FILE_RETRIES: u32 = 3;

/// Base delay between file download attempts
const FILE_RETRY_DELAY_MS: u64 = 1000;

/// Everything a pipeline run needs, shared across all workers of a run
pub struct SyncContext {
    pub config: MirrorConfig,
    pub storage: Arc<dyn StorageBackend>,
    pub client: UpstreamClient,
    pub filters: FilterChain,
    pub simple: SimpleApi,
    pub cancel: CancellationToken,
}

impl SyncContext {
    /// Paths that may hold state for a project, across both index layouts
    fn project_dirs(&self, webdir: &Path, normalized: &str) -> Vec<PathBuf> {
        let letter = normalized.chars().next().unwrap_or('_').to_string();
        vec![
            webdir.join("simple").join(normalized),
            webdir.join("simple").join(&letter).join(normalized),
        ]
    }

    /// Remove every trace of a project from the mirror.
    ///
    /// Used for upstream deletions, filtered-away projects, and the
    /// `delete` command. The release files to remove come from the local
    /// JSON mirror when present; without it only the index state goes
    /// (content-addressed files are shared and reclaimed by `verify`).
    pub async fn delete_project_state(&self, normalized: &str) -> Result<Vec<PathBuf>> {
        let webdir = self.config.webdir();
        let mut removed = Vec::new();

        let json_path = webdir.join("json").join(normalized);
        if let Ok(raw) = self.storage.read(&json_path).await {
            if let Ok(value) = serde_json::from_str::<serde_json::Value>(&raw) {
                if let Ok(metadata) = ProjectMetadata::from_value(&value) {
                    for file in metadata.release_files() {
                        if let Ok(rel) = file.local_path() {
                            let path = webdir.join(rel);
                            match self.storage.delete(&path).await {
                                Ok(()) => removed.push(path),
                                Err(Error::NotFound(_)) => {}
                                Err(e) => return Err(e),
                            }
                        }
                    }
                }
            }
        }

        for dir in self.project_dirs(&webdir, normalized) {
            if self.storage.is_dir(&dir).await {
                self.storage.rmdir(&dir, true).await?;
                removed.push(dir);
            }
        }

        for path in [
            json_path,
            webdir.join("pypi").join(normalized).join("json"),
        ] {
            match self.storage.delete(&path).await {
                Ok(()) => removed.push(path),
                Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        // The pypi/<project>/ directory itself
        let pypi_dir = webdir.join("pypi").join(normalized);
        if self.storage.is_dir(&pypi_dir).await {
            self.storage.rmdir(&pypi_dir, true).await?;
        }

        if !removed.is_empty() {
            info!("Deleted package: {}", normalized);
        }
        Ok(removed)
    }
}

/// Counters and artifacts of one pipeline run
#[derive(Debug, Default)]
pub struct SyncOutcome {
    pub downloaded_files: usize,
    pub downloaded_bytes: u64,
    pub releases_kept: usize,
    /// Paths created or replaced, collected into the run's diff file
    pub written_paths: Vec<PathBuf>,
}

/// One project's pipeline invocation
pub struct PackageSync {
    /// Name as upstream reported it
    pub raw_name: String,
    /// PEP 503 normalized name
    pub normalized: String,
    /// Serial this project is expected to be at (0 = no expectation)
    pub serial: u64,
}

impl PackageSync {
    pub fn new(name: &str, serial: u64) -> Self {
        Self {
            raw_name: name.to_string(),
            normalized: normalize(name),
            serial,
        }
    }

    /// Run the pipeline to completion.
    ///
    /// An upstream deletion or a project-filter drop counts as success:
    /// local state is removed and the controller moves on. Every other
    /// error fails the project and is collected by the controller.
    pub async fn sync(&self, ctx: &SyncContext) -> Result<SyncOutcome> {
        info!("Syncing package: {} (serial {})", self.raw_name, self.serial);
        let mut outcome = SyncOutcome::default();

        let required = if self.serial > 0 { Some(self.serial) } else { None };
        let mut raw = match ctx
            .client
            .fetch_project_metadata(&self.raw_name, required)
            .await
        {
            Ok(raw) => raw,
            Err(e) if e.is_gone() => {
                info!("Package {} no longer exists upstream, removing", self.raw_name);
                outcome.written_paths = ctx.delete_project_state(&self.normalized).await?;
                return Ok(outcome);
            }
            Err(e) => return Err(e),
        };

        let metadata = ProjectMetadata::from_value(&raw)?;

        if ctx.filters.filter_project(&metadata) == FilterDecision::DropProject {
            debug!("Project {} filtered, removing local state", self.normalized);
            outcome.written_paths = ctx.delete_project_state(&self.normalized).await?;
            return Ok(outcome);
        }

        // Release filters prune the versions dict; file filters then trim
        // each surviving release. DropProject from a file filter treats
        // the project like a filtered one.
        let releases = metadata.to_releases();
        let mut kept =
            ctx.filters
                .filter_releases(&self.normalized, Some(&metadata.info.version), releases);
        for release in &mut kept {
            let mut files = Vec::with_capacity(release.files.len());
            for file in release.files.drain(..) {
                match ctx.filters.filter_file(&self.normalized, &file) {
                    FilterDecision::Keep => files.push(file),
                    FilterDecision::Drop => {}
                    FilterDecision::DropProject => {
                        debug!("Project {} dropped by a file filter", self.normalized);
                        outcome.written_paths =
                            ctx.delete_project_state(&self.normalized).await?;
                        return Ok(outcome);
                    }
                }
            }
            release.files = files;
        }
        outcome.releases_kept = kept.len();

        if ctx.config.release_files {
            let plan = self.plan_downloads(ctx, &kept).await?;
            for file in plan {
                if ctx.cancel.is_cancelled() {
                    return Err(Error::Cancelled);
                }
                let bytes = download_release_file(ctx, file).await?;
                outcome.downloaded_files += 1;
                outcome.downloaded_bytes += bytes;
                outcome
                    .written_paths
                    .push(ctx.config.webdir().join(file.local_path()?));
            }
        }

        // Publication order matters: indexes only ever reference files
        // that are already on disk.
        let webdir = ctx.config.webdir();
        let written = ctx
            .simple
            .publish_project(&webdir, &metadata.info.name, metadata.last_serial, &kept)
            .await?;
        outcome.written_paths.extend(written);

        if ctx.config.json_save {
            model::prune_releases(&mut raw, &kept);
            let written = publish_project_json(ctx, &self.normalized, &raw).await?;
            outcome.written_paths.extend(written);
        }

        Ok(outcome)
    }

    /// Wanted files that are missing or mismatched on disk
    async fn plan_downloads<'a>(
        &self,
        ctx: &SyncContext,
        kept: &'a [Release],
    ) -> Result<Vec<&'a ReleaseFile>> {
        let webdir = ctx.config.webdir();
        let mut plan = Vec::new();
        for release in kept {
            for file in &release.files {
                if self.needs_download(ctx, &webdir, file).await? {
                    plan.push(file);
                }
            }
        }
        debug!(
            "Package {}: {} file(s) to download",
            self.normalized,
            plan.len()
        );
        Ok(plan)
    }

    /// Compare one wanted file against disk by the configured method
    async fn needs_download(
        &self,
        ctx: &SyncContext,
        webdir: &Path,
        file: &ReleaseFile,
    ) -> Result<bool> {
        let path = webdir.join(file.local_path()?);
        if !ctx.storage.is_file(&path).await {
            return Ok(true);
        }

        match ctx.config.compare_method {
            CompareMethod::Hash => {
                let local = ctx.storage.hash_file(&path, DigestName::Sha256).await?;
                if local == file.digests.sha256.to_lowercase() {
                    Ok(false)
                } else {
                    info!(
                        "Checksum mismatch for local file {}: expected {}, got {}, will re-download",
                        path.display(),
                        file.digests.sha256,
                        local
                    );
                    Ok(true)
                }
            }
            CompareMethod::Stat => {
                let local = ctx.storage.file_info(&path).await?;
                if local.size != file.size {
                    return Ok(true);
                }
                // A backend without mtimes degrades to size-only; with
                // mtimes, the local copy must not predate the upload.
                match (local.mtime, file.upload_time_iso_8601) {
                    (Some(mtime), Some(uploaded)) => Ok(mtime < uploaded),
                    _ => Ok(false),
                }
            }
        }
    }

}

/// Download one file to its content-addressed path, with retries.
///
/// Bytes stream into a temp file and only an integrity-checked download
/// is renamed into place, so partial or corrupt content never appears
/// under the canonical path. Shared with the verify pass.
pub(crate) async fn download_release_file(ctx: &SyncContext, file: &ReleaseFile) -> Result<u64> {
    let dest = ctx.config.webdir().join(file.local_path()?);
    debug!("Downloading: {}", file.url);

    let mut attempt = 0;
    loop {
        attempt += 1;
        let mut writer = ctx.storage.open_streaming_write(&dest).await?;
        match ctx
            .client
            .stream_artifact(&file.url, &file.digests.sha256, file.size, &mut writer)
            .await
        {
            Ok(bytes) => {
                writer.commit().await?;
                return Ok(bytes);
            }
            Err(e) => {
                writer.abort().await?;
                if e.is_retryable() && attempt < FILE_RETRIES {
                    warn!(
                        "Download of {} attempt {} failed: {}, retrying",
                        file.filename, attempt, e
                    );
                    tokio::time::sleep(Duration::from_millis(
                        FILE_RETRY_DELAY_MS * attempt as u64,
                    ))
                    .await;
                } else {
                    return Err(e);
                }
            }
        }
    }
}

/// Write the JSON mirror for a project: `web/json/<project>` holds the
/// document, `web/pypi/<project>/json` points at it.
pub(crate) async fn publish_project_json(
    ctx: &SyncContext,
    normalized: &str,
    raw: &serde_json::Value,
) -> Result<Vec<PathBuf>> {
    let webdir = ctx.config.webdir();
    let json_path = webdir.join("json").join(normalized);
    let link_path = webdir.join("pypi").join(normalized).join("json");

    ctx.storage
        .write(&json_path, &serde_json::to_string(raw)?)
        .await?;
    ctx.storage
        .symlink(
            &Path::new("../..").join("json").join(normalized),
            &link_path,
        )
        .await?;
    debug!("Stored JSON metadata for {}", normalized);
    Ok(vec![json_path, link_path])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_on_construction() {
        let sync = PackageSync::new("Pillow.Fork_Test", 7);
        assert_eq!(sync.normalized, "pillow-fork-test");
        assert_eq!(sync.raw_name, "Pillow.Fork_Test");
        assert_eq!(sync.serial, 7);
    }
}
