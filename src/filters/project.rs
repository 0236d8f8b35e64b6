// src/filters/project.rs

//! Project-level filter plugins
//!
//! These decide whether a project is mirrored at all. A dropped project
//! has its local state removed, the same as an upstream deletion.

use super::requirements;
use super::{FilterDecision, ProjectFilter};
use crate::config::{self, MirrorConfig};
use crate::error::{Error, Result};
use crate::model::ProjectMetadata;
use regex::Regex;
use std::collections::BTreeSet;
use tracing::info;

/// Compile the pattern list of a section key, failing fast on a bad regex
fn compile_patterns(config: &MirrorConfig, section: &str, key: &str) -> Result<Vec<Regex>> {
    config
        .section_lines(section, key)
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|e| Error::FilterError(format!("bad pattern '{p}': {e}")))
        })
        .collect()
}

/// `allowlist_project`: mirror only the projects named in
/// `[allowlist] packages`.
///
/// Lines carrying a PEP 440 specifier still allow the project here; the
/// release-level allowlist applies the specifier.
pub struct AllowlistProjectFilter {
    packages: BTreeSet<String>,
}

impl AllowlistProjectFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let mut packages = BTreeSet::new();
        for line in config.section_lines("allowlist", "packages") {
            if let Some(req) = requirements::parse_line(&line)? {
                packages.insert(req.name);
            }
        }
        info!(
            "Initialized allowlist_project with {} package(s)",
            packages.len()
        );
        Ok(Self { packages })
    }
}

impl ProjectFilter for AllowlistProjectFilter {
    fn name(&self) -> &'static str {
        "allowlist_project"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        // An empty allowlist does not filter anything
        if self.packages.is_empty() || self.packages.contains(&metadata.normalized_name()) {
            FilterDecision::Keep
        } else {
            FilterDecision::DropProject
        }
    }
}

/// `blocklist_project`: never mirror the projects named in
/// `[blocklist] packages`.
pub struct BlocklistProjectFilter {
    packages: BTreeSet<String>,
}

impl BlocklistProjectFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let mut packages = BTreeSet::new();
        for line in config.section_lines("blocklist", "packages") {
            if let Some(req) = requirements::parse_line(&line)? {
                // Only bare names block the whole project; specifier lines
                // belong to the release-level blocklist.
                if req.specifiers.is_empty() {
                    packages.insert(req.name);
                }
            }
        }
        info!(
            "Initialized blocklist_project with {} package(s)",
            packages.len()
        );
        Ok(Self { packages })
    }
}

impl ProjectFilter for BlocklistProjectFilter {
    fn name(&self) -> &'static str {
        "blocklist_project"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        if self.packages.contains(&metadata.normalized_name()) {
            FilterDecision::DropProject
        } else {
            FilterDecision::Keep
        }
    }
}

/// `regex_project`: drop projects whose name matches any
/// `[filter_regex] packages` pattern.
pub struct RegexProjectFilter {
    patterns: Vec<Regex>,
}

impl RegexProjectFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        Ok(Self {
            patterns: compile_patterns(config, "filter_regex", "packages")?,
        })
    }
}

impl ProjectFilter for RegexProjectFilter {
    fn name(&self) -> &'static str {
        "regex_project"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        let name = metadata.normalized_name();
        if self.patterns.iter().any(|p| p.is_match(&name)) {
            FilterDecision::DropProject
        } else {
            FilterDecision::Keep
        }
    }
}

/// `size_project_metadata`: drop projects whose declared total file size
/// exceeds `[size_project_metadata] max_package_size`.
///
/// Projects on the allowlist are exempt, giving "allow OR under the cap"
/// when combined with `allowlist_project`.
pub struct SizeProjectFilter {
    max_package_size: u64,
    allowlist: BTreeSet<String>,
}

impl SizeProjectFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let max_package_size = match config.section_get("size_project_metadata", "max_package_size")
        {
            Some(raw) => config::parse_size(raw)?,
            None => 0,
        };

        let mut allowlist = BTreeSet::new();
        for line in config.section_lines("allowlist", "packages") {
            if let Some(req) = requirements::parse_line(&line)? {
                allowlist.insert(req.name);
            }
        }

        if max_package_size > 0 {
            info!(
                "Initialized size_project_metadata blocking projects > {} bytes ({} exempt)",
                max_package_size,
                allowlist.len()
            );
        }
        Ok(Self {
            max_package_size,
            allowlist,
        })
    }
}

impl ProjectFilter for SizeProjectFilter {
    fn name(&self) -> &'static str {
        "size_project_metadata"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        if self.max_package_size == 0 {
            return FilterDecision::Keep;
        }
        if self.allowlist.contains(&metadata.normalized_name()) {
            return FilterDecision::Keep;
        }
        if metadata.total_size() > self.max_package_size {
            FilterDecision::DropProject
        } else {
            FilterDecision::Keep
        }
    }
}

/// `project_requirements`: allowlist fed from requirements files named in
/// `[allowlist] requirements` (glob-expanded against `requirements_path`).
pub struct RequirementsProjectFilter {
    packages: BTreeSet<String>,
}

impl RequirementsProjectFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let packages: BTreeSet<String> = requirements::from_requirement_files(config)?
            .into_iter()
            .map(|r| r.name)
            .collect();
        info!(
            "Initialized project_requirements with {} package(s)",
            packages.len()
        );
        Ok(Self { packages })
    }
}

impl ProjectFilter for RequirementsProjectFilter {
    fn name(&self) -> &'static str {
        "project_requirements"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        if self.packages.is_empty() || self.packages.contains(&metadata.normalized_name()) {
            FilterDecision::Keep
        } else {
            FilterDecision::DropProject
        }
    }
}

/// How a metadata pattern key combines its matches
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MatchMode {
    Any,
    All,
    None,
}

/// One metadata selector: a dotted JSON path with patterns and qualifiers
struct MetadataSelector {
    path: String,
    mode: MatchMode,
    nulls_match: bool,
    patterns: Vec<Regex>,
}

impl MetadataSelector {
    /// Parse a section key of the form `tag:tag:path.to.node`.
    ///
    /// Recognized qualifier tags: `any`, `all`, `none`, `match-null`,
    /// `not-null`. The final `:`-segment is the dotted path.
    fn parse(key: &str, raw_patterns: &str) -> Result<Self> {
        let mut tags: Vec<&str> = key.split(':').collect();
        let path = tags.pop().unwrap_or_default().to_string();

        let mut mode = MatchMode::Any;
        let mut nulls_match = true;
        for tag in tags {
            match tag {
                "any" => mode = MatchMode::Any,
                "all" => mode = MatchMode::All,
                "none" => mode = MatchMode::None,
                "match-null" => nulls_match = true,
                "not-null" => nulls_match = false,
                other => {
                    return Err(Error::FilterError(format!(
                        "unknown metadata qualifier '{other}' in key '{key}'"
                    )));
                }
            }
        }

        let patterns = raw_patterns
            .lines()
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(|p| {
                Regex::new(p).map_err(|e| Error::FilterError(format!("bad pattern '{p}': {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            path,
            mode,
            nulls_match,
            patterns,
        })
    }

    /// Collect the values at the dotted path, flattening a list node
    fn values<'a>(&self, metadata: &'a serde_json::Value) -> Vec<&'a str> {
        let mut node = metadata;
        for part in self.path.split('.') {
            match node.get(part) {
                Some(next) if !next.is_null() => node = next,
                _ => return Vec::new(),
            }
        }
        match node {
            serde_json::Value::Array(items) => {
                items.iter().filter_map(|v| v.as_str()).collect()
            }
            serde_json::Value::String(s) => vec![s.as_str()],
            _ => Vec::new(),
        }
    }

    fn matches(&self, metadata: &serde_json::Value) -> bool {
        let values = self.values(metadata);

        let any = if values.is_empty() {
            self.nulls_match
        } else {
            self.patterns
                .iter()
                .any(|p| values.iter().any(|v| p.is_match(v)))
        };

        match self.mode {
            MatchMode::Any => any,
            MatchMode::None => !any,
            MatchMode::All => {
                if values.is_empty() {
                    self.nulls_match
                } else {
                    self.patterns
                        .iter()
                        .all(|p| values.iter().any(|v| p.is_match(v)))
                }
            }
        }
    }
}

/// `regex_project_metadata`: keep only projects whose raw metadata
/// matches every selector in `[regex_project_metadata]`.
pub struct RegexProjectMetadataFilter {
    selectors: Vec<MetadataSelector>,
}

impl RegexProjectMetadataFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let mut selectors = Vec::new();
        if let Some(section) = config.section_keys("regex_project_metadata") {
            for (key, value) in section {
                selectors.push(MetadataSelector::parse(&key, &value)?);
            }
        }
        Ok(Self { selectors })
    }

    /// Evaluate against the raw Warehouse document
    pub fn matches_raw(&self, raw: &serde_json::Value) -> bool {
        self.selectors.iter().all(|s| s.matches(raw))
    }
}

impl ProjectFilter for RegexProjectMetadataFilter {
    fn name(&self) -> &'static str {
        "regex_project_metadata"
    }

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision {
        if self.selectors.is_empty() {
            return FilterDecision::Keep;
        }
        // The typed model only carries the consumed fields; rebuild the
        // info view the selectors walk.
        let raw = serde_json::json!({
            "info": {
                "name": metadata.info.name,
                "version": metadata.info.version,
                "classifiers": metadata.info.classifiers,
                "requires_python": metadata.info.requires_python,
            }
        });
        if self.matches_raw(&raw) {
            FilterDecision::Keep
        } else {
            FilterDecision::DropProject
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

    fn metadata(name: &str, size: u64) -> ProjectMetadata {
        let raw = serde_json::json!({
            "info": {"name": name, "version": "1.0", "classifiers": []},
            "last_serial": 1,
            "releases": {
                "1.0": [{
                    "url": "https://host/packages/aa/bb/cc/f.whl",
                    "filename": "f.whl",
                    "packagetype": "bdist_wheel",
                    "size": size,
                    "digests": {"sha256": "00"}
                }]
            }
        });
        ProjectMetadata::from_value(&raw).unwrap()
    }

    #[test]
    fn test_allowlist_membership() {
        let filter = AllowlistProjectFilter::from_config(&config(
            "[allowlist]\npackages = peerme\n    requests>=2.0\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate(&metadata("Peerme", 1)),
            FilterDecision::Keep
        );
        // Specifier lines still allow the project at this level
        assert_eq!(
            filter.evaluate(&metadata("requests", 1)),
            FilterDecision::Keep
        );
        assert_eq!(
            filter.evaluate(&metadata("numpy", 1)),
            FilterDecision::DropProject
        );
    }

    #[test]
    fn test_blocklist_membership() {
        let filter =
            BlocklistProjectFilter::from_config(&config("[blocklist]\npackages = pyaib\n"))
                .unwrap();
        assert_eq!(
            filter.evaluate(&metadata("pyaib", 1)),
            FilterDecision::DropProject
        );
        assert_eq!(filter.evaluate(&metadata("other", 1)), FilterDecision::Keep);
    }

    #[test]
    fn test_regex_project() {
        let filter = RegexProjectFilter::from_config(&config(
            "[filter_regex]\npackages = ^test-.*\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate(&metadata("test-dummy", 1)),
            FilterDecision::DropProject
        );
        assert_eq!(
            filter.evaluate(&metadata("realpkg", 1)),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_size_cap_with_allowlist_exemption() {
        let filter = SizeProjectFilter::from_config(&config(
            "[size_project_metadata]\nmax_package_size = 1G\n[allowlist]\npackages = numpy\n",
        ))
        .unwrap();
        // 5 GB project over the cap
        assert_eq!(
            filter.evaluate(&metadata("tensorflow", 5_000_000_000)),
            FilterDecision::DropProject
        );
        // 2 GB but allowlisted
        assert_eq!(
            filter.evaluate(&metadata("numpy", 2_000_000_000)),
            FilterDecision::Keep
        );
        // Under the cap
        assert_eq!(
            filter.evaluate(&metadata("small", 500_000_000)),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_metadata_selector_classifiers() {
        let selector = MetadataSelector::parse(
            "all:info.classifiers",
            "Programming Language :: Python :: 3.*",
        )
        .unwrap();
        let doc = serde_json::json!({
            "info": {"classifiers": [
                "Programming Language :: Python :: 3.11",
                "License :: OSI Approved :: MIT License"
            ]}
        });
        assert!(selector.matches(&doc));

        let doc = serde_json::json!({"info": {"classifiers": ["License :: MIT"]}});
        assert!(!selector.matches(&doc));
    }

    #[test]
    fn test_metadata_selector_not_null() {
        let selector = MetadataSelector::parse("not-null:info.requires_python", ".*").unwrap();
        let absent = serde_json::json!({"info": {}});
        assert!(!selector.matches(&absent));
        let present = serde_json::json!({"info": {"requires_python": ">=3.8"}});
        assert!(selector.matches(&present));
    }

    #[test]
    fn test_metadata_selector_none_mode() {
        let selector = MetadataSelector::parse("none:not-null:info.version", "^0\\.").unwrap();
        let zero = serde_json::json!({"info": {"version": "0.1"}});
        assert!(!selector.matches(&zero));
        let one = serde_json::json!({"info": {"version": "1.0"}});
        assert!(selector.matches(&one));
    }

    #[test]
    fn test_bad_regex_fails_at_load() {
        let result =
            RegexProjectFilter::from_config(&config("[filter_regex]\npackages = [unclosed\n"));
        assert!(matches!(result, Err(Error::FilterError(_))));
    }
}
