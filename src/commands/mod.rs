// src/commands/mod.rs
//! Command handlers for the wheelhouse CLI

use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use wheelhouse::config::MirrorConfig;
use wheelhouse::mirror::Mirror;
use wheelhouse::model::{normalize, SimpleIndexPage};
use wheelhouse::storage::MirrorLock;
use wheelhouse::verify::{self, VerifyOptions};
use wheelhouse::{Error, Result};

/// Cancellation token wired to Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling; all in-flight downloads stop");
            trigger.cancel();
        }
    });
    cancel
}

fn load_config(config_path: &Path) -> Result<MirrorConfig> {
    MirrorConfig::load(config_path)
}

/// `mirror`: full replication run
pub async fn cmd_mirror(config_path: &Path, force_check: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let mut mirror = Mirror::from_config(config, cancel_on_interrupt())?;

    let summary = mirror.synchronize(force_check).await?;
    info!(
        "Synced {} package(s): {} file(s), {} byte(s)",
        summary.packages_synced, summary.downloaded_files, summary.downloaded_bytes
    );
    Ok(())
}

/// `verify`: reconcile local state against upstream metadata
pub async fn cmd_verify(
    config_path: &Path,
    delete: bool,
    json_update: bool,
    dry_run: bool,
) -> Result<()> {
    let config = load_config(config_path)?;
    let mirror = Mirror::from_config(config, cancel_on_interrupt())?;
    let ctx = mirror.context().clone();

    let _lock = MirrorLock::acquire(&ctx.config.directory)?;
    let report = verify::verify_mirror(
        ctx,
        VerifyOptions {
            delete,
            json_update,
            dry_run,
        },
    )
    .await?;

    info!(
        "Verified {} project(s): {} re-downloaded, {} deleted, {} project(s) removed",
        report.projects_checked,
        report.files_redownloaded,
        report.files_deleted,
        report.projects_deleted
    );
    if report.is_success() {
        Ok(())
    } else {
        Err(Error::SyncIncomplete(report.errors.len()))
    }
}

/// `sync`: process the named projects once, without moving the cursor
pub async fn cmd_sync(config_path: &Path, projects: &[String]) -> Result<()> {
    let config = load_config(config_path)?;
    let mut mirror = Mirror::from_config(config, cancel_on_interrupt())?;

    let summary = mirror.sync_projects(projects).await?;
    info!(
        "Synced {} package(s): {} file(s), {} byte(s)",
        summary.packages_synced, summary.downloaded_files, summary.downloaded_bytes
    );
    Ok(())
}

/// `delete`: remove the named projects and their files from the mirror
pub async fn cmd_delete(config_path: &Path, projects: &[String], dry_run: bool) -> Result<()> {
    let config = load_config(config_path)?;
    let mirror = Mirror::from_config(config, cancel_on_interrupt())?;
    let ctx = mirror.context().clone();

    let _lock = MirrorLock::acquire(&ctx.config.directory)?;
    let webdir = ctx.config.webdir();

    for name in projects {
        let normalized = normalize(name);

        // The upstream simple page gives the authoritative file set;
        // fall back to the local JSON mirror when the project is already
        // gone upstream.
        let mut paths = Vec::new();
        match ctx.client.fetch_simple_json(&normalized).await {
            Ok(bytes) => {
                let page = SimpleIndexPage::from_bytes(&bytes)?;
                for rel in page.local_paths() {
                    paths.push(webdir.join(rel));
                }
            }
            Err(e) if e.is_gone() => {}
            Err(e) => return Err(e),
        }

        if dry_run {
            println!("[DRY RUN] Would delete package: {normalized}");
            for path in &paths {
                println!("{}", path.display());
            }
            continue;
        }

        for path in paths {
            match ctx.storage.delete(&path).await {
                Ok(()) | Err(Error::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        ctx.delete_project_state(&normalized).await?;
    }

    if !dry_run {
        let serial = ctx
            .storage
            .read(&ctx.config.directory.join("status"))
            .await
            .ok()
            .and_then(|raw| raw.trim().parse().ok())
            .unwrap_or(0);
        ctx.simple.publish_root_index(&webdir, serial).await?;
    }
    Ok(())
}
