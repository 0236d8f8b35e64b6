// src/filters/release.rs

//! Release-level filter plugins
//!
//! These prune the versions dict of a project that passed the project
//! filters. Emptying the dict is a valid outcome: the project then
//! publishes an empty index document rather than being deleted.

use super::requirements::{self, Requirement};
use super::{FilterDecision, ReleaseFilter};
use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::model::{self, normalize, Release};
use crate::version::Version;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::collections::BTreeSet;
use tracing::info;

/// `prerelease_release`: drop releases that PEP 440 considers
/// pre-releases (pre or dev segment).
///
/// With `[prerelease_release] packages` set, only the named projects are
/// affected.
pub struct PrereleaseFilter {
    packages: BTreeSet<String>,
}

impl PrereleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let packages: BTreeSet<String> = config
            .section_list("prerelease_release", "packages")
            .iter()
            .map(|p| normalize(p))
            .collect();
        Ok(Self { packages })
    }
}

impl ReleaseFilter for PrereleaseFilter {
    fn name(&self) -> &'static str {
        "prerelease_release"
    }

    fn evaluate(&self, project: &str, release: &Release) -> FilterDecision {
        if !self.packages.is_empty() && !self.packages.contains(project) {
            return FilterDecision::Keep;
        }
        if release.is_prerelease() {
            FilterDecision::Drop
        } else {
            FilterDecision::Keep
        }
    }
}

/// `latest_release`: keep only the newest N releases.
///
/// Ordering is by parsed version with lexicographic fallback; ties
/// resolve by upload time, then filename. The release matching the
/// project's current `info.version` is always kept when present.
pub struct LatestReleaseFilter {
    keep: usize,
}

impl LatestReleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let keep = config
            .section_get("latest_release", "keep")
            .and_then(|v| v.parse::<usize>().ok())
            .unwrap_or(3)
            .max(1);
        info!("Initialized latest_release plugin with keep={}", keep);
        Ok(Self { keep })
    }

    pub fn with_keep(keep: usize) -> Self {
        Self { keep: keep.max(1) }
    }
}

impl ReleaseFilter for LatestReleaseFilter {
    fn name(&self) -> &'static str {
        "latest_release"
    }

    fn prune(
        &self,
        _project: &str,
        current_version: Option<&str>,
        mut releases: Vec<Release>,
    ) -> Vec<Release> {
        if releases.len() <= self.keep {
            return releases;
        }
        model::sort_releases_newest_first(&mut releases);

        // The project's current version survives even when it falls
        // outside the newest N.
        let rescue = current_version.and_then(|current| {
            releases
                .iter()
                .position(|r| r.version == current)
                .filter(|idx| *idx >= self.keep)
        });
        if let Some(idx) = rescue {
            let current = releases.remove(idx);
            releases.truncate(self.keep.saturating_sub(1));
            releases.push(current);
        } else {
            releases.truncate(self.keep);
        }
        releases
    }
}

/// `upload_window_release`: keep only releases uploaded inside the
/// configured window (`[upload_window_release] after` / `before`,
/// RFC 3339 timestamps).
pub struct UploadWindowFilter {
    after: Option<DateTime<Utc>>,
    before: Option<DateTime<Utc>>,
}

impl UploadWindowFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let parse = |key: &str| -> Result<Option<DateTime<Utc>>> {
            match config.section_get("upload_window_release", key) {
                None => Ok(None),
                Some(raw) => DateTime::parse_from_rfc3339(raw)
                    .map(|t| Some(t.with_timezone(&Utc)))
                    .map_err(|e| {
                        Error::FilterError(format!("invalid {key} timestamp '{raw}': {e}"))
                    }),
            }
        };
        Ok(Self {
            after: parse("after")?,
            before: parse("before")?,
        })
    }
}

impl ReleaseFilter for UploadWindowFilter {
    fn name(&self) -> &'static str {
        "upload_window_release"
    }

    fn evaluate(&self, _project: &str, release: &Release) -> FilterDecision {
        if self.after.is_none() && self.before.is_none() {
            return FilterDecision::Keep;
        }
        // Releases without an upload time can't be placed in the window;
        // keep them rather than silently losing data.
        let Some(uploaded) = release.upload_time() else {
            return FilterDecision::Keep;
        };
        if let Some(after) = self.after {
            if uploaded < after {
                return FilterDecision::Drop;
            }
        }
        if let Some(before) = self.before {
            if uploaded > before {
                return FilterDecision::Drop;
            }
        }
        FilterDecision::Keep
    }
}

/// Shared engine for the specifier-based allow/deny release filters
struct SpecifierList {
    requirements: Vec<Requirement>,
}

impl SpecifierList {
    fn from_section(config: &MirrorConfig, section: &str) -> Result<Self> {
        let mut requirements = Vec::new();
        for line in config.section_lines(section, "packages") {
            if let Some(req) = requirements::parse_line(&line)? {
                // Bare names are handled by the project-level filters
                if !req.specifiers.is_empty() {
                    requirements.push(req);
                }
            }
        }
        Ok(Self { requirements })
    }

    /// Whether any requirement for `project` matches `release`
    fn matches(&self, project: &str, release: &Release) -> Option<bool> {
        let mut saw_project = false;
        for req in self.requirements.iter().filter(|r| r.name == project) {
            saw_project = true;
            let Some(version) = &release.parsed else {
                continue;
            };
            if req.specifiers.matches(version) {
                return Some(true);
            }
        }
        if saw_project { Some(false) } else { None }
    }
}

/// `allowlist_release`: for projects with a specifier in
/// `[allowlist] packages`, keep only matching releases.
pub struct AllowlistReleaseFilter {
    list: SpecifierList,
}

impl AllowlistReleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Ok(Self {
            list: SpecifierList::from_section(config, "allowlist")?,
        })
    }
}

impl ReleaseFilter for AllowlistReleaseFilter {
    fn name(&self) -> &'static str {
        "allowlist_release"
    }

    fn evaluate(&self, project: &str, release: &Release) -> FilterDecision {
        match self.list.matches(project, release) {
            // No specifier for this project: not our concern
            None => FilterDecision::Keep,
            Some(true) => FilterDecision::Keep,
            Some(false) => FilterDecision::Drop,
        }
    }
}

/// `blocklist_release`: drop releases matching a specifier in
/// `[blocklist] packages`.
pub struct BlocklistReleaseFilter {
    list: SpecifierList,
}

impl BlocklistReleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Ok(Self {
            list: SpecifierList::from_section(config, "blocklist")?,
        })
    }
}

impl ReleaseFilter for BlocklistReleaseFilter {
    fn name(&self) -> &'static str {
        "blocklist_release"
    }

    fn evaluate(&self, project: &str, release: &Release) -> FilterDecision {
        match self.list.matches(project, release) {
            Some(true) => FilterDecision::Drop,
            _ => FilterDecision::Keep,
        }
    }
}

/// `regex_release`: drop releases whose version matches any
/// `[filter_regex] releases` pattern.
pub struct RegexReleaseFilter {
    patterns: Vec<Regex>,
}

impl RegexReleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let patterns = config
            .section_lines("filter_regex", "releases")
            .iter()
            .map(|p| {
                Regex::new(p).map_err(|e| Error::FilterError(format!("bad pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }
}

impl ReleaseFilter for RegexReleaseFilter {
    fn name(&self) -> &'static str {
        "regex_release"
    }

    fn evaluate(&self, _project: &str, release: &Release) -> FilterDecision {
        if self.patterns.iter().any(|p| p.is_match(&release.version)) {
            FilterDecision::Drop
        } else {
            FilterDecision::Keep
        }
    }
}

/// `project_requirements_pinned`: requirements files drive exact version
/// pins; a pinned project bypasses every other release filter.
pub struct PinnedReleaseFilter {
    requirements: Vec<Requirement>,
}

impl PinnedReleaseFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let requirements: Vec<Requirement> = requirements::from_requirement_files(config)?
            .into_iter()
            .filter(|r| !r.specifiers.is_empty())
            .collect();
        info!(
            "Initialized project_requirements_pinned with {} pinned requirement(s)",
            requirements.len()
        );
        Ok(Self { requirements })
    }
}

impl ReleaseFilter for PinnedReleaseFilter {
    fn name(&self) -> &'static str {
        "project_requirements_pinned"
    }

    fn pins(&self, project: &str) -> bool {
        self.requirements
            .iter()
            .any(|r| r.name == project && r.specifiers.is_pinned())
    }

    fn evaluate(&self, project: &str, release: &Release) -> FilterDecision {
        let mut saw_project = false;
        for req in self.requirements.iter().filter(|r| r.name == project) {
            saw_project = true;
            if let Some(version) = &release.parsed {
                if req.specifiers.matches(version) {
                    return FilterDecision::Keep;
                }
            }
        }
        if saw_project {
            FilterDecision::Drop
        } else {
            FilterDecision::Keep
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(body: &str) -> MirrorConfig {
        MirrorConfig::from_str(&format!(
            "[mirror]\ndirectory = /srv\nmaster = https://pypi.org\n{body}"
        ))
        .unwrap()
    }

    fn release(version: &str) -> Release {
        Release::new(version.to_string(), Vec::new())
    }

    #[test]
    fn test_prerelease_filter() {
        let filter = PrereleaseFilter::from_config(&config("")).unwrap();
        assert_eq!(
            filter.evaluate("pkg", &release("1.0a1")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate("pkg", &release("1.0.dev2")),
            FilterDecision::Drop
        );
        assert_eq!(filter.evaluate("pkg", &release("1.0")), FilterDecision::Keep);
        // Post releases are not pre-releases
        assert_eq!(
            filter.evaluate("pkg", &release("1.0.post1")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_prerelease_filter_scoped_to_packages() {
        let filter = PrereleaseFilter::from_config(&config(
            "[prerelease_release]\npackages = duckdb\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate("duckdb", &release("1.0a1")),
            FilterDecision::Drop
        );
        // Other projects keep their pre-releases
        assert_eq!(
            filter.evaluate("numpy", &release("1.0a1")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_latest_release_keeps_newest() {
        let filter = LatestReleaseFilter::with_keep(2);
        let releases = vec![release("1.0"), release("3.0"), release("2.0")];
        let kept = filter.prune("pkg", None, releases);
        let versions: Vec<&str> = kept.iter().map(|r| r.version.as_str()).collect();
        assert_eq!(versions, vec!["3.0", "2.0"]);
    }

    #[test]
    fn test_latest_release_under_limit_is_noop() {
        let filter = LatestReleaseFilter::with_keep(5);
        let releases = vec![release("1.0"), release("2.0")];
        assert_eq!(filter.prune("pkg", None, releases).len(), 2);
    }

    #[test]
    fn test_latest_release_rescues_current_version() {
        let filter = LatestReleaseFilter::with_keep(2);
        let releases = vec![
            release("1.0"),
            release("3.0"),
            release("2.0"),
            release("4.0"),
        ];
        let kept = filter.prune("pkg", Some("1.0"), releases);
        let versions: Vec<&str> = kept.iter().map(|r| r.version.as_str()).collect();
        // Newest first, then the rescued current version
        assert_eq!(versions, vec!["4.0", "1.0"]);
    }

    #[test]
    fn test_allowlist_release_specifier() {
        let filter = AllowlistReleaseFilter::from_config(&config(
            "[allowlist]\npackages = requests>=2.0,<3.0\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate("requests", &release("2.5")),
            FilterDecision::Keep
        );
        assert_eq!(
            filter.evaluate("requests", &release("3.1")),
            FilterDecision::Drop
        );
        // No specifier for this project
        assert_eq!(
            filter.evaluate("numpy", &release("0.1")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_blocklist_release_specifier() {
        let filter = BlocklistReleaseFilter::from_config(&config(
            "[blocklist]\npackages = cryptography<2.0\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate("cryptography", &release("1.9")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate("cryptography", &release("2.1")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_regex_release() {
        let filter =
            RegexReleaseFilter::from_config(&config("[filter_regex]\nreleases = .*rc\\d+$\n"))
                .unwrap();
        assert_eq!(
            filter.evaluate("pkg", &release("1.0rc1")),
            FilterDecision::Drop
        );
        assert_eq!(filter.evaluate("pkg", &release("1.0")), FilterDecision::Keep);
    }

    #[test]
    fn test_upload_window() {
        let filter = UploadWindowFilter::from_config(&config(
            "[upload_window_release]\nafter = 2024-01-01T00:00:00Z\n",
        ))
        .unwrap();
        // No upload time: kept
        assert_eq!(filter.evaluate("pkg", &release("1.0")), FilterDecision::Keep);

        let mut old = release("0.9");
        old.files = vec![crate::model::ReleaseFile {
            url: "https://host/packages/aa/bb/cc/f.whl".into(),
            filename: "f.whl".into(),
            packagetype: "bdist_wheel".into(),
            requires_python: None,
            size: 1,
            digests: crate::model::Digests {
                sha256: "00".into(),
                md5: None,
            },
            upload_time_iso_8601: Some(
                DateTime::parse_from_rfc3339("2023-06-01T00:00:00Z")
                    .unwrap()
                    .with_timezone(&Utc),
            ),
            yanked: false,
            yanked_reason: None,
        }];
        assert_eq!(filter.evaluate("pkg", &old), FilterDecision::Drop);
    }
}
