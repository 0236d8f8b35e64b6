// src/model.rs

//! Data model for mirrored projects
//!
//! Typed views over the Warehouse JSON documents (`/pypi/<project>/json`):
//! project metadata, releases, and release files, plus PEP 503 name
//! normalization and the mapping from upstream file URLs to on-mirror
//! paths.

use crate::error::{Error, Result};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use url::Url;

/// PEP 503 normalization: lowercase, runs of `-`, `_`, `.` collapse to `-`
pub fn normalize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut in_run = false;
    for c in name.chars() {
        if c == '-' || c == '_' || c == '.' {
            if !in_run {
                out.push('-');
                in_run = true;
            }
        } else {
            out.extend(c.to_lowercase());
            in_run = false;
        }
    }
    out
}

/// Digest set declared by upstream for a release file
///
/// sha256 is mandatory; md5 travels along for legacy index anchors.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digests {
    pub sha256: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md5: Option<String>,
}

/// A single artifact (wheel or sdist) of one release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub packagetype: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
    #[serde(default)]
    pub size: u64,
    pub digests: Digests,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub upload_time_iso_8601: Option<DateTime<Utc>>,
    #[serde(default)]
    pub yanked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub yanked_reason: Option<String>,
}

impl ReleaseFile {
    /// Map the upstream download URL to the canonical on-mirror path,
    /// relative to `web/`.
    ///
    /// Upstream addresses files as `/packages/<2-hex>/<2-hex>/<60-hex>/
    /// <filename>`; the mirror keeps the same layout so byte-identical
    /// files collide safely. A URL outside `/packages` is invalid.
    pub fn local_path(&self) -> Result<String> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| Error::ParseError(format!("invalid download URL {}: {e}", self.url)))?;
        let path = percent_decode(parsed.path());
        if !path.starts_with("/packages") {
            return Err(Error::ParseError(format!(
                "got invalid download URL: {}",
                self.url
            )));
        }
        Ok(path[1..].to_string())
    }

    /// Rewrite the upstream URL for index documents.
    ///
    /// With no `root_uri` the result is relative (`../../packages/...`),
    /// which keeps a file-served mirror self-contained.
    pub fn local_url(&self, root_uri: Option<&str>) -> Result<String> {
        let parsed = Url::parse(&self.url)
            .map_err(|e| Error::ParseError(format!("invalid download URL {}: {e}", self.url)))?;
        if !parsed.path().starts_with("/packages") {
            return Err(Error::ParseError(format!(
                "got invalid download URL: {}",
                self.url
            )));
        }
        let prefix = root_uri.map(|u| u.trim_end_matches('/')).unwrap_or("../..");
        Ok(format!("{}{}", prefix, parsed.path()))
    }
}

/// Minimal percent-decoding for URL paths (hex escapes only)
fn percent_decode(path: &str) -> String {
    let bytes = path.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
            if let Some(byte) = hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// One version of a project with its files
///
/// Built during pipeline planning; the parsed version is `None` when the
/// string does not parse as PEP 440, in which case ordering falls back to
/// the raw string.
#[derive(Debug, Clone)]
pub struct Release {
    pub version: String,
    pub parsed: Option<Version>,
    pub files: Vec<ReleaseFile>,
}

impl Release {
    pub fn new(version: String, files: Vec<ReleaseFile>) -> Self {
        let parsed = Version::parse(&version).ok();
        Self {
            version,
            parsed,
            files,
        }
    }

    /// Whether this release is a pre-release per PEP 440
    pub fn is_prerelease(&self) -> bool {
        self.parsed.as_ref().is_some_and(|v| v.is_prerelease())
    }

    /// Newest upload time across the release's files
    pub fn upload_time(&self) -> Option<DateTime<Utc>> {
        self.files.iter().filter_map(|f| f.upload_time_iso_8601).max()
    }
}

/// The `info` block of a Warehouse document, fields the mirror consumes
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub version: String,
    #[serde(default)]
    pub classifiers: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requires_python: Option<String>,
}

/// Decoded per-project metadata from `/pypi/<project>/json`
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectMetadata {
    pub info: ProjectInfo,
    #[serde(default)]
    pub last_serial: u64,
    #[serde(default)]
    pub releases: BTreeMap<String, Vec<ReleaseFile>>,
}

impl ProjectMetadata {
    /// Decode a raw Warehouse JSON value
    pub fn from_value(value: &serde_json::Value) -> Result<Self> {
        serde_json::from_value(value.clone())
            .map_err(|e| Error::ParseError(format!("malformed project metadata: {e}")))
    }

    /// Normalized project name
    pub fn normalized_name(&self) -> String {
        normalize(&self.info.name)
    }

    /// All release files across all releases
    pub fn release_files(&self) -> Vec<&ReleaseFile> {
        self.releases.values().flatten().collect()
    }

    /// Sum of all declared file sizes, the basis for the size-cap filter
    pub fn total_size(&self) -> u64 {
        self.releases
            .values()
            .flatten()
            .map(|f| f.size)
            .sum()
    }

    /// Build `Release` views in deterministic (BTreeMap) order
    pub fn to_releases(&self) -> Vec<Release> {
        self.releases
            .iter()
            .map(|(version, files)| Release::new(version.clone(), files.clone()))
            .collect()
    }
}

/// One file entry of a PEP 691 simple index page
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleIndexFile {
    pub filename: String,
    pub url: String,
    #[serde(default)]
    pub hashes: BTreeMap<String, String>,
}

/// A project's `/simple/<project>/` page in the versioned JSON format
#[derive(Debug, Clone, Deserialize)]
pub struct SimpleIndexPage {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub files: Vec<SimpleIndexFile>,
}

impl SimpleIndexPage {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| Error::ParseError(format!("malformed simple index page: {e}")))
    }

    /// On-mirror paths (relative to `web/`) of the page's files
    pub fn local_paths(&self) -> Vec<String> {
        self.files
            .iter()
            .filter_map(|f| {
                let parsed = Url::parse(&f.url).ok()?;
                let path = percent_decode(parsed.path());
                path.starts_with("/packages")
                    .then(|| path[1..].to_string())
            })
            .collect()
    }
}

/// Remove from a raw Warehouse value every release not present in `keep`.
///
/// The JSON mirror publishes what the filter chain decided, not what
/// upstream sent; this prunes the original document so the two agree.
pub fn prune_releases(raw: &mut serde_json::Value, keep: &[Release]) {
    use serde_json::Value;

    let kept: std::collections::BTreeSet<&str> =
        keep.iter().map(|r| r.version.as_str()).collect();

    if let Some(Value::Object(releases)) = raw.get_mut("releases") {
        releases.retain(|version, _| kept.contains(version.as_str()));
        for release in keep {
            if let Some(Value::Array(files)) = releases.get_mut(&release.version) {
                let kept_files: std::collections::BTreeSet<&str> =
                    release.files.iter().map(|f| f.filename.as_str()).collect();
                files.retain(|f| {
                    f.get("filename")
                        .and_then(|n| n.as_str())
                        .is_some_and(|n| kept_files.contains(n))
                });
            }
        }
    }
}

/// Sort releases newest-first for the latest-N filter.
///
/// Parsed versions order by PEP 440; unparseable versions sort below all
/// parseable ones, by raw string. Ties resolve by upload time, then by
/// first filename.
pub fn sort_releases_newest_first(releases: &mut [Release]) {
    releases.sort_by(|a, b| {
        let ord = match (&a.parsed, &b.parsed) {
            (Some(va), Some(vb)) => vb.cmp(va),
            (Some(_), None) => std::cmp::Ordering::Less,
            (None, Some(_)) => std::cmp::Ordering::Greater,
            (None, None) => b.version.cmp(&a.version),
        };
        ord.then_with(|| b.upload_time().cmp(&a.upload_time()))
            .then_with(|| {
                let fa = a.files.first().map(|f| f.filename.as_str()).unwrap_or("");
                let fb = b.files.first().map(|f| f.filename.as_str()).unwrap_or("");
                fa.cmp(fb)
            })
    });
}
