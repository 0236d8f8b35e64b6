// src/mirror.rs

//! Mirror run controller
//!
//! Drives one replication run through its states: acquire the mirror
//! lock, load the durable cursor (`generation`, `status`, `todo`),
//! discover what to sync (resume an interrupted run or ask the changelog),
//! clean up legacy directories, drain the worker pool, and finalize. The
//! `status` cursor only ever advances after a fully successful drain, so
//! a crash or failure leaves the mirror resumable and consistent.

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::filters::FilterChain;
use crate::model::normalize;
use crate::package::{PackageSync, SyncContext};
use crate::pool::{Completion, WorkerPool};
use crate::simple::SimpleApi;
use crate::storage::{FilesystemBackend, MirrorLock, StorageBackend};
use crate::upstream::UpstreamClient;
use chrono::Utc;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Mirror format generation. Bumping it invalidates prior mirror state
/// and forces a full resync.
pub const CURRENT_GENERATION: u64 = 5;

/// Rewrite the todo file after this many successful completions
const TODO_FLUSH_INTERVAL: usize = 10;

/// Counters reported by a completed run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub packages_synced: usize,
    pub downloaded_files: usize,
    pub downloaded_bytes: u64,
    pub failed: Vec<String>,
}

/// One mirror instance bound to a directory
pub struct Mirror {
    ctx: Arc<SyncContext>,
    homedir: PathBuf,
    /// Serial the mirror is consistently synced to
    synced_serial: u64,
    /// Serial this run is trying to reach
    target_serial: u64,
    packages_to_sync: BTreeMap<String, u64>,
    /// Whether the root index needs regeneration this run
    need_index_sync: bool,
}

impl Mirror {
    /// Build a mirror from configuration. Fails fast on filter errors.
    pub fn from_config(config: MirrorConfig, cancel: CancellationToken) -> Result<Self> {
        let storage: Arc<dyn StorageBackend> = match config.storage_backend {
            crate::config::StorageDriver::Filesystem => Arc::new(FilesystemBackend::new()),
            other => {
                return Err(Error::ConfigError(format!(
                    "storage backend {other:?} is not built into this binary"
                )));
            }
        };
        let client = UpstreamClient::from_config(&config)?;
        let filters = FilterChain::from_config(&config)?;
        let simple = SimpleApi::from_config(storage.clone(), &config);
        let homedir = config.directory.clone();

        Ok(Self {
            ctx: Arc::new(SyncContext {
                config,
                storage,
                client,
                filters,
                simple,
                cancel,
            }),
            homedir,
            synced_serial: 0,
            target_serial: 0,
            packages_to_sync: BTreeMap::new(),
            need_index_sync: false,
        })
    }

    pub fn context(&self) -> &Arc<SyncContext> {
        &self.ctx
    }

    fn status_path(&self) -> PathBuf {
        self.homedir.join("status")
    }

    fn generation_path(&self) -> PathBuf {
        self.homedir.join("generation")
    }

    fn todo_path(&self) -> PathBuf {
        self.homedir.join("todo")
    }

    /// Create the mirror skeleton on first run
    async fn bootstrap(&self) -> Result<()> {
        let webdir = self.ctx.config.webdir();
        for dir in ["simple", "packages", "json", "pypi"] {
            self.ctx.storage.mkdir(&webdir.join(dir)).await?;
        }
        Ok(())
    }

    /// Load `generation` and `status`; a generation mismatch wipes the
    /// cursor and forces a full sync.
    async fn load_cursor(&mut self) -> Result<()> {
        let storage = &self.ctx.storage;

        let generation = match storage.read(&self.generation_path()).await {
            Ok(raw) => raw.trim().parse::<u64>().ok(),
            Err(Error::NotFound(_)) => None,
            Err(e) => return Err(e),
        };
        if generation != Some(CURRENT_GENERATION) {
            if let Some(old) = generation {
                info!(
                    "Mirror generation {} != {}, forcing full sync",
                    old, CURRENT_GENERATION
                );
            } else {
                info!("Status file missing. Starting over.");
            }
            for stale in [self.status_path(), self.todo_path()] {
                match storage.delete(&stale).await {
                    Ok(()) | Err(Error::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            storage
                .write(&self.generation_path(), &CURRENT_GENERATION.to_string())
                .await?;
            self.synced_serial = 0;
            return Ok(());
        }

        self.synced_serial = match storage.read(&self.status_path()).await {
            Ok(raw) => raw.trim().parse::<u64>().unwrap_or(0),
            Err(Error::NotFound(_)) => 0,
            Err(e) => return Err(e),
        };
        info!("Current mirror serial: {}", self.synced_serial);
        Ok(())
    }

    /// Parse the todo file: first line is the target serial, then one
    /// `<project>\t<serial>` line per remaining package.
    fn parse_todo(raw: &str) -> Option<(u64, BTreeMap<String, u64>)> {
        let mut lines = raw.lines();
        let target = lines.next()?.trim().parse::<u64>().ok()?;
        let mut packages = BTreeMap::new();
        for line in lines {
            if line.trim().is_empty() {
                continue;
            }
            let (name, serial) = line.split_once('\t')?;
            packages.insert(name.to_string(), serial.trim().parse::<u64>().ok()?);
        }
        Some((target, packages))
    }

    fn render_todo(target: u64, packages: &BTreeMap<String, u64>) -> String {
        let mut out = format!("{target}\n");
        for (name, serial) in packages {
            out.push_str(&format!("{name}\t{serial}\n"));
        }
        out
    }

    async fn write_todo(&self) -> Result<()> {
        self.ctx
            .storage
            .write(
                &self.todo_path(),
                &Self::render_todo(self.target_serial, &self.packages_to_sync),
            )
            .await
    }

    /// Decide what this run will sync.
    ///
    /// A well-formed todo file resumes the interrupted run it describes;
    /// a malformed one is deleted and discovery starts over. Otherwise
    /// the changelog delta since `status` feeds the queue (the full list
    /// when `status` is 0 or `--force-check` was given).
    async fn discover(&mut self, force_check: bool) -> Result<()> {
        let storage = &self.ctx.storage;

        match storage.read(&self.todo_path()).await {
            Ok(raw) => {
                if let Some((target, packages)) = Self::parse_todo(&raw) {
                    info!("Resuming interrupted sync from todo ({} packages)", packages.len());
                    self.target_serial = target;
                    self.packages_to_sync = packages;
                    self.need_index_sync = !self.packages_to_sync.is_empty();
                    return Ok(());
                }
                warn!("Removing malformed todo file");
                storage.delete(&self.todo_path()).await?;
            }
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        let since = if force_check { 0 } else { self.synced_serial };
        let (target, packages) = self.ctx.client.changelog_since(since).await?;
        info!("Current master serial: {}", target);

        // Nothing new upstream: stay on the current serial
        self.target_serial = target.max(self.synced_serial);
        self.packages_to_sync = packages;
        self.need_index_sync = !self.packages_to_sync.is_empty();

        if self.packages_to_sync.is_empty() {
            info!("Mirror is up to date (serial {})", self.synced_serial);
            return Ok(());
        }

        self.write_todo().await
    }

    /// Remove legacy non-normalized project directories.
    ///
    /// Runs as its own phase between discovery and drain so it never
    /// races with a worker publishing into the same tree.
    async fn cleanup_legacy_dirs(&self) -> Result<()> {
        if !self.ctx.config.cleanup {
            return Ok(());
        }
        let simple_dir = self.ctx.config.webdir().join("simple");
        if !self.ctx.storage.is_dir(&simple_dir).await {
            return Ok(());
        }

        let mut roots = vec![simple_dir.clone()];
        if self.ctx.config.hash_index {
            roots = self
                .ctx
                .storage
                .scandir(&simple_dir)
                .await?
                .into_iter()
                .filter(|e| e.is_dir)
                .map(|e| e.path)
                .collect();
        }

        for root in roots {
            for entry in self.ctx.storage.scandir(&root).await? {
                if !entry.is_dir || entry.name == "versions" {
                    continue;
                }
                if entry.name != normalize(&entry.name) {
                    info!("Removing legacy directory {}", entry.path.display());
                    self.ctx.storage.rmdir(&entry.path, true).await?;
                }
            }
        }
        Ok(())
    }

    /// Drain the queue through the worker pool, checkpointing the todo
    /// file as packages complete.
    async fn drain(&mut self) -> Result<(crate::pool::DrainReport, BTreeMap<String, u64>)> {
        let queue: Vec<(String, u64)> = self
            .packages_to_sync
            .iter()
            .map(|(name, serial)| (name.clone(), *serial))
            .collect();

        let pool = WorkerPool::new(
            self.ctx.config.workers,
            self.ctx.config.stop_on_error,
            self.ctx.config.global_timeout,
            self.ctx.cancel.clone(),
        );

        // Workers report completions over a channel; this side rewrites
        // the todo file every few packages so a crash loses little work.
        let (tx, mut rx) = mpsc::unbounded_channel::<Completion>();
        let storage = self.ctx.storage.clone();
        let todo_path = self.todo_path();
        let target = self.target_serial;
        let mut remaining = self.packages_to_sync.clone();
        let progress = crate::progress::for_terminal();
        progress.begin(remaining.len() as u64);
        let checkpointer = tokio::spawn(async move {
            let mut since_flush = 0;
            while let Some(completion) = rx.recv().await {
                progress.advance(&completion.name);
                if completion.success {
                    remaining.remove(&completion.name);
                    since_flush += 1;
                }
                if since_flush >= TODO_FLUSH_INTERVAL {
                    let rendered = Self::render_todo(target, &remaining);
                    if let Err(e) = storage.write(&todo_path, &rendered).await {
                        warn!("Failed to checkpoint todo file: {}", e);
                    }
                    since_flush = 0;
                }
            }
            progress.finish();
            remaining
        });

        let ctx = self.ctx.clone();
        let report = pool
            .drain(queue, Some(tx), move |name, serial| {
                let ctx = ctx.clone();
                async move { PackageSync::new(&name, serial).sync(&ctx).await }
            })
            .await;

        let remaining = checkpointer
            .await
            .unwrap_or_else(|_| self.packages_to_sync.clone());
        Ok((report, remaining))
    }

    /// Emit the diff file listing every path this run created or touched
    async fn write_diff_file(&self, written: &[PathBuf]) -> Result<()> {
        let Some(diff_file) = &self.ctx.config.diff_file else {
            return Ok(());
        };
        let path = if self.ctx.config.diff_append_epoch {
            let epoch = Utc::now().timestamp();
            diff_file.with_file_name(format!(
                "{}-{epoch}",
                diff_file
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "mirrored-files".to_string())
            ))
        } else {
            diff_file.clone()
        };

        let mut content = String::new();
        for entry in written {
            content.push_str(&entry.to_string_lossy());
            content.push('\n');
        }
        info!("Writing diff file to {}", path.display());
        self.ctx.storage.write(&path, &content).await
    }

    /// Run a full replication pass. Returns the run counters; any failed
    /// package surfaces as `SyncIncomplete` after the drain so the caller
    /// exits non-zero.
    pub async fn synchronize(&mut self, force_check: bool) -> Result<RunSummary> {
        let started = Utc::now();
        let _lock = MirrorLock::acquire(&self.homedir)?;

        self.bootstrap().await?;
        self.load_cursor().await?;
        self.discover(force_check).await?;

        if self.packages_to_sync.is_empty() {
            // Empty changelog: a no-op run. No index rewrites, and no
            // status write unless the serial actually moved.
            if self.target_serial > self.synced_serial {
                self.ctx
                    .storage
                    .write(&self.status_path(), &self.target_serial.to_string())
                    .await?;
                self.synced_serial = self.target_serial;
            }
            // A leftover todo with no remaining work has nothing to resume
            match self.ctx.storage.delete(&self.todo_path()).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
            return Ok(RunSummary::default());
        }

        self.cleanup_legacy_dirs().await?;

        let (report, remaining) = self.drain().await?;

        let mut summary = RunSummary {
            packages_synced: report.outcomes.len(),
            ..Default::default()
        };
        let mut written: Vec<PathBuf> = Vec::new();
        for (_, outcome) in &report.outcomes {
            summary.downloaded_files += outcome.downloaded_files;
            summary.downloaded_bytes += outcome.downloaded_bytes;
            written.extend(outcome.written_paths.iter().cloned());
        }

        if report.is_success() {
            if self.need_index_sync {
                let paths = self
                    .ctx
                    .simple
                    .publish_root_index(&self.ctx.config.webdir(), self.target_serial)
                    .await?;
                written.extend(paths);
            }

            self.synced_serial = self.target_serial;
            self.ctx
                .storage
                .write(&self.status_path(), &self.synced_serial.to_string())
                .await?;
            match self.ctx.storage.delete(&self.todo_path()).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }

            // Downstream consumers use this stamp to gauge freshness
            self.ctx
                .storage
                .write(
                    &self.ctx.config.webdir().join("last-modified"),
                    &format!("{}\n", started.format("%Y%m%dT%H:%M:%S")),
                )
                .await?;

            self.write_diff_file(&written).await?;
            info!("New mirror serial: {}", self.synced_serial);
            Ok(summary)
        } else {
            // Keep the rest of the work for the next run; status stays put
            self.packages_to_sync = remaining;
            self.write_todo().await?;

            if report.cancelled && report.errors.is_empty() {
                return Err(Error::Cancelled);
            }
            summary.failed = report.errors.iter().map(|(n, _)| n.clone()).collect();
            warn!(
                "{} package(s) failed, not advancing status (still {})",
                summary.failed.len(),
                self.synced_serial
            );
            Err(Error::SyncIncomplete(summary.failed.len()))
        }
    }

    /// Sync the named projects once, at whatever serial upstream reports.
    ///
    /// Used by the `sync` command: the cursor is untouched, but the
    /// project indexes and the root index are regenerated.
    pub async fn sync_projects(&mut self, projects: &[String]) -> Result<RunSummary> {
        let _lock = MirrorLock::acquire(&self.homedir)?;
        self.bootstrap().await?;
        self.load_cursor().await?;

        let mut summary = RunSummary::default();
        for name in projects {
            let sync = PackageSync::new(name, 0);
            match sync.sync(&self.ctx).await {
                Ok(outcome) => {
                    summary.packages_synced += 1;
                    summary.downloaded_files += outcome.downloaded_files;
                    summary.downloaded_bytes += outcome.downloaded_bytes;
                }
                Err(e) => {
                    warn!("Error syncing package {}: {}", name, e);
                    summary.failed.push(name.clone());
                }
            }
        }

        self.ctx
            .simple
            .publish_root_index(&self.ctx.config.webdir(), self.synced_serial)
            .await?;

        if summary.failed.is_empty() {
            Ok(summary)
        } else {
            Err(Error::SyncIncomplete(summary.failed.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_todo_well_formed() {
        let raw = "4242\npeerme\t10\npyaib\t20\n";
        let (target, packages) = Mirror::parse_todo(raw).unwrap();
        assert_eq!(target, 4242);
        assert_eq!(packages.len(), 2);
        assert_eq!(packages["peerme"], 10);
        assert_eq!(packages["pyaib"], 20);
    }

    #[test]
    fn test_parse_todo_rejects_malformed() {
        // First line must be an integer serial
        assert!(Mirror::parse_todo("not-a-serial\npeerme\t10\n").is_none());
        // Entries must be tab-separated
        assert!(Mirror::parse_todo("1\npeerme 10\n").is_none());
        assert!(Mirror::parse_todo("").is_none());
    }

    #[test]
    fn test_todo_round_trip() {
        let mut packages = BTreeMap::new();
        packages.insert("peerme".to_string(), 10u64);
        packages.insert("zzz".to_string(), 30u64);
        let rendered = Mirror::render_todo(77, &packages);
        let (target, parsed) = Mirror::parse_todo(&rendered).unwrap();
        assert_eq!(target, 77);
        assert_eq!(parsed, packages);
    }
}
