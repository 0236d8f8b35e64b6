// src/verify.rs

//! Verify/repair pass
//!
//! Reconciles on-disk state against authoritative upstream metadata: every
//! mirrored project is re-fetched, every local release file is
//! hash-checked, corrupted or missing files are re-downloaded, and files
//! no release references any more are deleted. Projects gone from
//! upstream are removed only with `--delete`. A dry run reports what
//! would change without touching the tree.

use crate::error::{Error, Result};
use crate::filters::FilterDecision;
use crate::hash::DigestName;
use crate::model::{ProjectMetadata, Release};
use crate::package::{self, SyncContext};
use futures::stream::{self, StreamExt};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Options of one verify run
#[derive(Debug, Clone, Copy, Default)]
pub struct VerifyOptions {
    /// Remove projects that upstream no longer knows
    pub delete: bool,
    /// Refresh the local JSON mirror from the fetched metadata
    pub json_update: bool,
    /// Report only; no downloads, no deletions
    pub dry_run: bool,
}

/// Counters of a verify run
#[derive(Debug, Default)]
pub struct VerifyReport {
    pub projects_checked: usize,
    pub files_redownloaded: usize,
    pub files_deleted: usize,
    pub projects_deleted: usize,
    pub errors: Vec<(String, Error)>,
}

impl VerifyReport {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }
}

struct ProjectVerify {
    /// Every path this project's surviving releases own
    wanted: Vec<PathBuf>,
    redownloaded: usize,
    deleted_files: usize,
    deleted_project: bool,
}

/// What the local copy of one wanted file looks like
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FileState {
    Healthy,
    Missing,
    /// Digest mismatch; the copy was deleted (kept on dry runs)
    Corrupt,
}

/// Hash-check one wanted file on disk.
///
/// A mismatched copy is deleted so the re-download lands cleanly; dry
/// runs report the mismatch and leave the file alone.
async fn check_local_file(
    ctx: &SyncContext,
    path: &std::path::Path,
    expected_sha256: &str,
    dry_run: bool,
) -> Result<FileState> {
    if !ctx.storage.is_file(path).await {
        return Ok(FileState::Missing);
    }
    let local = ctx.storage.hash_file(path, DigestName::Sha256).await?;
    if local == expected_sha256.to_lowercase() {
        return Ok(FileState::Healthy);
    }
    info!(
        "Checksum mismatch for {}: expected {}, got {}",
        path.display(),
        expected_sha256,
        local
    );
    if !dry_run {
        ctx.storage.delete(path).await?;
    }
    Ok(FileState::Corrupt)
}

/// Handle a project upstream no longer knows.
///
/// Removal is operator opt-in: without `--delete` the local state stays
/// and the operator is warned. Returns whether the project was (or on a
/// dry run, would be) deleted.
async fn handle_gone_project(ctx: &SyncContext, name: &str, opts: VerifyOptions) -> Result<bool> {
    if !opts.delete {
        warn!("{} no longer exists upstream (kept; use --delete)", name);
        return Ok(false);
    }
    info!("{} no longer exists upstream, deleting", name);
    if !opts.dry_run {
        ctx.delete_project_state(name).await?;
    }
    Ok(true)
}

/// Verify one project against fresh upstream metadata
async fn verify_project(
    ctx: &SyncContext,
    name: &str,
    opts: VerifyOptions,
) -> Result<ProjectVerify> {
    let mut result = ProjectVerify {
        wanted: Vec::new(),
        redownloaded: 0,
        deleted_files: 0,
        deleted_project: false,
    };

    debug!("Verifying {}", name);
    let mut raw = match ctx.client.fetch_project_metadata(name, None).await {
        Ok(raw) => raw,
        Err(e) if e.is_gone() => {
            result.deleted_project = handle_gone_project(ctx, name, opts).await?;
            return Ok(result);
        }
        Err(e) => return Err(e),
    };

    let metadata = ProjectMetadata::from_value(&raw)?;
    let normalized = metadata.normalized_name();

    // A project the filters reject is treated like an upstream deletion
    if ctx.filters.filter_project(&metadata) == FilterDecision::DropProject {
        if opts.delete && !opts.dry_run {
            ctx.delete_project_state(&normalized).await?;
            result.deleted_project = true;
        }
        return Ok(result);
    }

    let releases = metadata.to_releases();
    let mut kept: Vec<Release> =
        ctx.filters
            .filter_releases(&normalized, Some(&metadata.info.version), releases);
    for release in &mut kept {
        release
            .files
            .retain(|f| ctx.filters.filter_file(&normalized, f) == FilterDecision::Keep);
    }

    let webdir = ctx.config.webdir();
    for release in &kept {
        for file in &release.files {
            let path = webdir.join(file.local_path()?);
            result.wanted.push(path.clone());

            if !ctx.config.release_files {
                continue;
            }

            let state =
                check_local_file(ctx, &path, &file.digests.sha256, opts.dry_run).await?;
            if state == FileState::Corrupt {
                result.deleted_files += 1;
            }
            if state != FileState::Healthy {
                if opts.dry_run {
                    info!("[DRY RUN] Would download {}", file.url);
                } else {
                    package::download_release_file(ctx, file).await?;
                }
                result.redownloaded += 1;
            }
        }
    }

    if opts.json_update && !opts.dry_run {
        crate::model::prune_releases(&mut raw, &kept);
        package::publish_project_json(ctx, &normalized, &raw).await?;
    }

    Ok(result)
}

/// Project names currently present in the simple tree
async fn mirrored_projects(ctx: &SyncContext) -> Result<Vec<String>> {
    let simple_dir = ctx.config.webdir().join("simple");
    if !ctx.storage.is_dir(&simple_dir).await {
        return Ok(Vec::new());
    }

    let mut roots = vec![simple_dir.clone()];
    if ctx.config.hash_index {
        roots = ctx
            .storage
            .scandir(&simple_dir)
            .await?
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.path)
            .collect();
    }

    let mut projects = Vec::new();
    for root in roots {
        for entry in ctx.storage.scandir(&root).await? {
            if entry.is_dir && entry.name != "versions" {
                projects.push(entry.name);
            }
        }
    }
    projects.sort();
    projects.dedup();
    Ok(projects)
}

/// Delete (or report) files under `web/packages` that no surviving
/// release references
async fn delete_unowned_files(
    ctx: &SyncContext,
    owned: &BTreeSet<PathBuf>,
    dry_run: bool,
) -> Result<usize> {
    let packages_dir = ctx.config.webdir().join("packages");
    if !ctx.storage.is_dir(&packages_dir).await {
        return Ok(0);
    }

    let all_files = ctx.storage.walk(&packages_dir).await?;
    let unowned: Vec<&PathBuf> = all_files.iter().filter(|f| !owned.contains(*f)).collect();
    info!(
        "We have {} owned file(s), {} unowned file(s)",
        owned.len(),
        unowned.len()
    );

    if dry_run {
        for path in &unowned {
            info!("[DRY RUN] Would delete {}", path.display());
        }
        return Ok(unowned.len());
    }

    let mut deleted = 0;
    for path in unowned {
        debug!("unlink {}", path.display());
        ctx.storage.delete(path).await?;
        deleted += 1;

        // Drop emptied parent directories up to the packages root
        let mut parent = path.parent();
        while let Some(dir) = parent {
            if dir == packages_dir {
                break;
            }
            match ctx.storage.rmdir(dir, false).await {
                Ok(()) => parent = dir.parent(),
                Err(_) => break,
            }
        }
    }
    Ok(deleted)
}

/// Run the verify/repair pass over the whole mirror
pub async fn verify_mirror(ctx: Arc<SyncContext>, opts: VerifyOptions) -> Result<VerifyReport> {
    let projects = mirrored_projects(&ctx).await?;
    info!("Verifying {} project(s)", projects.len());

    let verifiers = ctx.config.verifiers;
    let results: Vec<(String, Result<ProjectVerify>)> = stream::iter(projects)
        .map(|name| {
            let ctx = ctx.clone();
            async move {
                let result = verify_project(&ctx, &name, opts).await;
                (name, result)
            }
        })
        .buffer_unordered(verifiers)
        .collect()
        .await;

    let mut report = VerifyReport::default();
    let mut owned: BTreeSet<PathBuf> = BTreeSet::new();
    for (name, result) in results {
        report.projects_checked += 1;
        match result {
            Ok(outcome) => {
                owned.extend(outcome.wanted);
                report.files_redownloaded += outcome.redownloaded;
                report.files_deleted += outcome.deleted_files;
                if outcome.deleted_project {
                    report.projects_deleted += 1;
                }
            }
            Err(e) => {
                warn!("Verification of {} failed: {}", name, e);
                report.errors.push((name, e));
            }
        }
    }

    // Orphaned files only go with the operator's explicit opt-in
    if ctx.config.release_files && opts.delete {
        report.files_deleted += delete_unowned_files(&ctx, &owned, opts.dry_run).await?;
    }

    if !opts.dry_run {
        let serial = ctx
            .storage
            .read(&ctx.config.directory.join("status"))
            .await
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0);
        ctx.simple
            .publish_root_index(&ctx.config.webdir(), serial)
            .await?;
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MirrorConfig;
    use crate::filters::FilterChain;
    use crate::hash::sha256;
    use crate::simple::SimpleApi;
    use crate::storage::{FilesystemBackend, StorageBackend};
    use crate::upstream::UpstreamClient;
    use std::path::Path;
    use tokio_util::sync::CancellationToken;

    /// Sync context over a temp mirror; the client is never contacted
    fn context(dir: &Path) -> SyncContext {
        let config = MirrorConfig::from_str(&format!(
            "[mirror]\ndirectory = {}\nmaster = https://pypi.org\n",
            dir.display()
        ))
        .unwrap();
        let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new());
        let client = UpstreamClient::from_config(&config).unwrap();
        let simple = SimpleApi::from_config(storage.clone(), &config);
        SyncContext {
            config,
            storage,
            client,
            filters: FilterChain::empty(),
            simple,
            cancel: CancellationToken::new(),
        }
    }

    fn write_file(path: &Path, content: &[u8]) {
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[tokio::test]
    async fn test_check_local_file_states() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let path = temp.path().join("web/packages/aa/bb/cc/pkg-1.0.whl");
        let content = b"wheel bytes";
        write_file(&path, content);

        let good = sha256(content);
        assert_eq!(
            check_local_file(&ctx, &path, &good, false).await.unwrap(),
            FileState::Healthy
        );
        assert!(path.exists());

        let missing = temp.path().join("web/packages/aa/bb/cc/absent.whl");
        assert_eq!(
            check_local_file(&ctx, &missing, &good, false).await.unwrap(),
            FileState::Missing
        );
    }

    #[tokio::test]
    async fn test_check_local_file_deletes_corrupt_copy() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let path = temp.path().join("web/packages/aa/bb/cc/pkg-1.0.whl");
        write_file(&path, b"corrupted bytes");

        let expected = sha256(b"the real bytes");
        assert_eq!(
            check_local_file(&ctx, &path, &expected, false).await.unwrap(),
            FileState::Corrupt
        );
        // The bad copy is gone so the re-download lands cleanly
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_check_local_file_dry_run_keeps_corrupt_copy() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let path = temp.path().join("web/packages/aa/bb/cc/pkg-1.0.whl");
        write_file(&path, b"corrupted bytes");

        let expected = sha256(b"the real bytes");
        assert_eq!(
            check_local_file(&ctx, &path, &expected, true).await.unwrap(),
            FileState::Corrupt
        );
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_gone_project_kept_without_delete() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let index = temp.path().join("web/simple/ghost/index.html");
        write_file(&index, b"<html/>");

        let opts = VerifyOptions::default();
        assert!(!handle_gone_project(&ctx, "ghost", opts).await.unwrap());
        assert!(index.exists());
    }

    #[tokio::test]
    async fn test_gone_project_deleted_with_delete() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let index = temp.path().join("web/simple/ghost/index.html");
        write_file(&index, b"<html/>");

        let opts = VerifyOptions {
            delete: true,
            ..Default::default()
        };
        assert!(handle_gone_project(&ctx, "ghost", opts).await.unwrap());
        assert!(!temp.path().join("web/simple/ghost").exists());
    }

    #[tokio::test]
    async fn test_gone_project_dry_run_reports_without_deleting() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let index = temp.path().join("web/simple/ghost/index.html");
        write_file(&index, b"<html/>");

        let opts = VerifyOptions {
            delete: true,
            dry_run: true,
            ..Default::default()
        };
        assert!(handle_gone_project(&ctx, "ghost", opts).await.unwrap());
        assert!(index.exists());
    }

    #[tokio::test]
    async fn test_delete_unowned_files_prunes_empty_parents() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let packages = temp.path().join("web/packages");
        let owned_file = packages.join("aa/bb/cc/kept-1.0.whl");
        let unowned_file = packages.join("dd/ee/ff/orphan-1.0.whl");
        write_file(&owned_file, b"kept");
        write_file(&unowned_file, b"orphan");

        let owned: BTreeSet<PathBuf> = [owned_file.clone()].into_iter().collect();
        let deleted = delete_unowned_files(&ctx, &owned, false).await.unwrap();
        assert_eq!(deleted, 1);

        assert!(owned_file.exists());
        assert!(!unowned_file.exists());
        // Emptied parents are pruned up to, but not including, packages/
        assert!(!packages.join("dd").exists());
        assert!(packages.exists());
    }

    #[tokio::test]
    async fn test_delete_unowned_files_dry_run() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        let unowned_file = temp.path().join("web/packages/dd/ee/ff/orphan-1.0.whl");
        write_file(&unowned_file, b"orphan");

        let owned = BTreeSet::new();
        let would_delete = delete_unowned_files(&ctx, &owned, true).await.unwrap();
        assert_eq!(would_delete, 1);
        assert!(unowned_file.exists());
    }

    #[tokio::test]
    async fn test_mirrored_projects_skips_versions_dirs() {
        let temp = tempfile::tempdir().unwrap();
        let ctx = context(temp.path());
        write_file(&temp.path().join("web/simple/peerme/index.html"), b"x");
        write_file(&temp.path().join("web/simple/versions/stray"), b"x");
        write_file(&temp.path().join("web/simple/zzz/index.html"), b"x");
        // Plain files at the simple/ level are not projects either
        write_file(&temp.path().join("web/simple/index.html"), b"x");

        let projects = mirrored_projects(&ctx).await.unwrap();
        assert_eq!(projects, vec!["peerme", "zzz"]);
    }
}
