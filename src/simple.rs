// src/simple.rs

//! Simple-index document generation
//!
//! Each mirrored project publishes up to three representations of its
//! file list: the legacy HTML page (`index.html`), the versioned HTML
//! page (`index.v1_html`), and the versioned JSON document
//! (`index.v1_json`). The root simple index lists every mirrored project
//! in the same three forms. All writes are atomic through the storage
//! backend; `keep_index_versions` rotates prior versions behind a
//! pointer.

use crate::config::{MirrorConfig, SimpleFormat};
use crate::error::{Error, Result};
use crate::hash::DigestName;
use crate::model::{normalize, Release, ReleaseFile};
use crate::storage::StorageBackend;
use chrono::Utc;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// PEP 620 repository version advertised in HTML meta tags
const REPOSITORY_VERSION: &str = "1.0";

/// PEP 691 simple API version advertised in JSON meta blocks
const SIMPLE_API_VERSION: &str = "1.0";

/// Escape text for HTML attribute and body positions
fn escape_html(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

/// Generator for project and root index documents
pub struct SimpleApi {
    storage: Arc<dyn StorageBackend>,
    format: SimpleFormat,
    digest_name: DigestName,
    hash_index: bool,
    root_uri: Option<String>,
    keep_index_versions: usize,
}

impl SimpleApi {
    pub fn from_config(storage: Arc<dyn StorageBackend>, config: &MirrorConfig) -> Self {
        Self {
            storage,
            format: config.simple_format,
            digest_name: config.digest_name,
            hash_index: config.hash_index,
            root_uri: config.root_uri.clone(),
            keep_index_versions: config.keep_index_versions,
        }
    }

    /// Directory of a project's index documents under `web/`.
    ///
    /// With `hash-index` the project nests under its first letter to keep
    /// directory fan-out bounded.
    pub fn simple_dir(&self, webdir: &Path, normalized_name: &str) -> PathBuf {
        let simple = webdir.join("simple");
        if self.hash_index {
            let letter = normalized_name.chars().next().unwrap_or('_').to_string();
            simple.join(letter).join(normalized_name)
        } else {
            simple.join(normalized_name)
        }
    }

    /// Anchor digest for a file: the configured digest when upstream
    /// declared it, sha256 otherwise
    fn anchor_digest<'a>(&self, file: &'a ReleaseFile) -> (&'static str, &'a str) {
        match self.digest_name {
            DigestName::Md5 => match &file.digests.md5 {
                Some(md5) => ("md5", md5.as_str()),
                None => ("sha256", file.digests.sha256.as_str()),
            },
            DigestName::Sha256 => ("sha256", file.digests.sha256.as_str()),
        }
    }

    /// Extra attributes on a file anchor
    fn file_tags(file: &ReleaseFile) -> String {
        let mut tags = String::new();
        if let Some(requires) = &file.requires_python {
            tags.push_str(&format!(
                " data-requires-python=\"{}\"",
                escape_html(requires)
            ));
        }
        if file.yanked {
            match &file.yanked_reason {
                Some(reason) => {
                    tags.push_str(&format!(" data-yanked=\"{}\"", escape_html(reason)))
                }
                None => tags.push_str(" data-yanked=\"\""),
            }
        }
        tags
    }

    /// Files of the kept releases, sorted by filename for determinism
    fn sorted_files(releases: &[Release]) -> Vec<&ReleaseFile> {
        let mut files: Vec<&ReleaseFile> = releases.iter().flat_map(|r| &r.files).collect();
        files.sort_by(|a, b| a.filename.cmp(&b.filename));
        files
    }

    /// Render the HTML page for one project
    pub fn generate_html_page(
        &self,
        raw_name: &str,
        serial: u64,
        releases: &[Release],
    ) -> Result<String> {
        let mut page = format!(
            "<!DOCTYPE html>\n<html>\n  <head>\n    \
             <meta name=\"pypi:repository-version\" content=\"{REPOSITORY_VERSION}\">\n    \
             <title>Links for {0}</title>\n  </head>\n  <body>\n    <h1>Links for {0}</h1>\n",
            escape_html(raw_name)
        );

        let anchors = Self::sorted_files(releases)
            .into_iter()
            .map(|file| {
                let (digest_name, digest) = self.anchor_digest(file);
                Ok(format!(
                    "    <a href=\"{}#{}={}\"{}>{}</a><br/>",
                    file.local_url(self.root_uri.as_deref())?,
                    digest_name,
                    digest,
                    Self::file_tags(file),
                    escape_html(&file.filename),
                ))
            })
            .collect::<Result<Vec<String>>>()?;

        page.push_str(&anchors.join("\n"));
        page.push_str(&format!("\n  </body>\n</html>\n<!--SERIAL {serial}-->"));
        Ok(page)
    }

    /// Render the PEP 691 JSON document for one project
    pub fn generate_json_page(
        &self,
        normalized_name: &str,
        serial: u64,
        releases: &[Release],
    ) -> Result<String> {
        let files = Self::sorted_files(releases)
            .into_iter()
            .map(|file| {
                let mut hashes = serde_json::Map::new();
                hashes.insert("sha256".to_string(), json!(file.digests.sha256));
                if let Some(md5) = &file.digests.md5 {
                    hashes.insert("md5".to_string(), json!(md5));
                }
                let yanked = if file.yanked {
                    match &file.yanked_reason {
                        Some(reason) => json!(reason),
                        None => json!(true),
                    }
                } else {
                    json!(false)
                };
                Ok(json!({
                    "filename": file.filename,
                    "hashes": hashes,
                    "requires-python": file.requires_python.clone().unwrap_or_default(),
                    "size": file.size,
                    "upload-time": file.upload_time_iso_8601,
                    "url": file.local_url(self.root_uri.as_deref())?,
                    "yanked": yanked,
                }))
            })
            .collect::<Result<Vec<serde_json::Value>>>()?;

        let document = json!({
            "files": files,
            "meta": {
                "api-version": SIMPLE_API_VERSION,
                "_last-serial": serial.to_string(),
            },
            "name": normalized_name,
        });
        Ok(document.to_string())
    }

    /// Write a project's index documents; returns the written paths.
    ///
    /// An empty release list still produces a valid, empty document.
    pub async fn publish_project(
        &self,
        webdir: &Path,
        raw_name: &str,
        serial: u64,
        releases: &[Release],
    ) -> Result<Vec<PathBuf>> {
        let normalized = normalize(raw_name);
        let dir = self.simple_dir(webdir, &normalized);
        let mut written = Vec::new();

        if self.format.html_enabled() {
            let html = self.generate_html_page(raw_name, serial, releases)?;
            written.push(self.write_rotated(&dir, "index.html", serial, &html).await?);
            written.push(
                self.write_rotated(&dir, "index.v1_html", serial, &html)
                    .await?,
            );
        }
        if self.format.json_enabled() {
            let json = self.generate_json_page(&normalized, serial, releases)?;
            written.push(
                self.write_rotated(&dir, "index.v1_json", serial, &json)
                    .await?,
            );
        }
        debug!("Stored index pages for {}", normalized);
        Ok(written)
    }

    /// Write one index document, rotating prior versions when configured.
    ///
    /// With `keep_index_versions > 0` the content lands in
    /// `versions/index_<serial>_<timestamp>.<ext>` and the user-facing
    /// name becomes a pointer to the newest version; older versions past
    /// the limit are pruned.
    async fn write_rotated(
        &self,
        dir: &Path,
        filename: &str,
        serial: u64,
        content: &str,
    ) -> Result<PathBuf> {
        let target = dir.join(filename);
        if self.keep_index_versions == 0 {
            self.storage.write(&target, content).await?;
            return Ok(target);
        }

        let versions_dir = dir.join("versions");
        self.storage.mkdir(&versions_dir).await?;

        // index.html -> index_<serial>_<ts>.html, index.v1_json keeps its
        // full suffix after the stamp
        let (stem, ext) = filename.split_once('.').unwrap_or((filename, "html"));
        let stamp = Utc::now().format("%Y%m%dT%H%M%S");
        let versioned = versions_dir.join(format!("{stem}_{serial}_{stamp}.{ext}"));
        self.storage.write(&versioned, content).await?;

        // Prune old versions of this document beyond the limit
        let prefix = format!("{stem}_");
        let suffix = format!(".{ext}");
        let mut existing: Vec<String> = self
            .storage
            .scandir(&versions_dir)
            .await?
            .into_iter()
            .filter(|e| !e.is_dir && e.name.starts_with(&prefix) && e.name.ends_with(&suffix))
            .map(|e| e.name)
            .collect();
        existing.sort();
        while existing.len() > self.keep_index_versions {
            let oldest = existing.remove(0);
            self.storage.delete(&versions_dir.join(&oldest)).await?;
        }

        let pointer_name = versioned
            .file_name()
            .ok_or_else(|| Error::IoError("versioned index path has no file name".to_string()))?;
        self.storage
            .symlink(&Path::new("versions").join(pointer_name), &target)
            .await?;
        Ok(versioned)
    }

    /// Letter directories to scan for project indexes
    async fn index_dirs(&self, simple_dir: &Path) -> Result<Vec<PathBuf>> {
        if !self.hash_index {
            return Ok(vec![simple_dir.to_path_buf()]);
        }
        Ok(self
            .storage
            .scandir(simple_dir)
            .await?
            .into_iter()
            .filter(|e| e.is_dir)
            .map(|e| e.path)
            .collect())
    }

    /// Regenerate the root simple index from the on-disk project set.
    ///
    /// Returns the written paths. Projects are discovered by scanning the
    /// simple tree, so the root index and the directories can never
    /// disagree.
    pub async fn publish_root_index(&self, webdir: &Path, serial: u64) -> Result<Vec<PathBuf>> {
        info!("Generating global index page");
        let simple_dir = webdir.join("simple");
        self.storage.mkdir(&simple_dir).await?;

        let mut projects: Vec<String> = Vec::new();
        for dir in self.index_dirs(&simple_dir).await? {
            for entry in self.storage.scandir(&dir).await? {
                if entry.is_dir && entry.name != "versions" {
                    projects.push(normalize(&entry.name));
                }
            }
        }
        projects.sort();
        projects.dedup();

        let mut html = format!(
            "<!DOCTYPE html>\n<html>\n  <head>\n    \
             <meta name=\"pypi:repository-version\" content=\"{REPOSITORY_VERSION}\">\n    \
             <title>Simple Index</title>\n  </head>\n  <body>\n"
        );
        for project in &projects {
            html.push_str(&format!("    <a href=\"{project}/\">{project}</a><br/>\n"));
        }
        html.push_str("  </body>\n</html>");

        let mut written = Vec::new();
        let html_path = simple_dir.join("index.html");
        let v1_html_path = simple_dir.join("index.v1_html");
        let json_path = simple_dir.join("index.v1_json");

        if self.format.html_enabled() {
            self.storage.write(&html_path, &html).await?;
            self.storage.copy(&html_path, &v1_html_path).await?;
            written.push(html_path);
            written.push(v1_html_path);
        } else if self.storage.exists(&html_path).await {
            // HTML disabled: a stale page must not linger
            self.storage.delete(&html_path).await?;
        }

        if self.format.json_enabled() {
            let document = json!({
                "meta": {
                    "api-version": SIMPLE_API_VERSION,
                    "_last-serial": serial,
                },
                "projects": projects.iter().map(|p| json!({"name": p})).collect::<Vec<_>>(),
            });
            self.storage.write(&json_path, &document.to_string()).await?;
            written.push(json_path);
        }

        Ok(written)
    }
}
