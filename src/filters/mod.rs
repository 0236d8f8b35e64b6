// src/filters/mod.rs

//! Filter plugin framework
//!
//! Filters narrow what the mirror carries. Three categories run in a fixed
//! order per project: project filters decide whether to mirror the project
//! at all, release filters prune the versions dict, release-file filters
//! drop individual artifacts. Within a category, filters run in registry
//! order. All filters are stateless across projects; configuration is read
//! once at construction, and a bad pattern or unknown plugin name fails
//! the run before any network call.
//!
//! Plugins come from a static registry table keyed by name; the
//! `[plugins] enabled` configuration decides which entries are
//! instantiated.

mod file;
mod project;
mod release;
mod requirements;

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::model::{ProjectMetadata, Release, ReleaseFile};
use tracing::debug;

pub use file::{ExcludePlatformFilter, RegexFileMetadataFilter};
pub use project::{
    AllowlistProjectFilter, BlocklistProjectFilter, RegexProjectFilter,
    RegexProjectMetadataFilter, RequirementsProjectFilter, SizeProjectFilter,
};
pub use release::{
    AllowlistReleaseFilter, BlocklistReleaseFilter, LatestReleaseFilter, PinnedReleaseFilter,
    PrereleaseFilter, RegexReleaseFilter, UploadWindowFilter,
};

/// Outcome of one filter evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Let the item through to the next filter
    Keep,
    /// Drop this release or file
    Drop,
    /// Drop the whole project, short-circuiting downstream filters
    DropProject,
}

/// Decides whether a project is mirrored at all
pub trait ProjectFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, metadata: &ProjectMetadata) -> FilterDecision;
}

/// Prunes the versions dict of a project
pub trait ReleaseFilter: Send + Sync {
    fn name(&self) -> &'static str;

    /// Per-release decision; the default `prune` applies this to each
    /// release in order.
    fn evaluate(&self, project: &str, release: &Release) -> FilterDecision {
        let _ = (project, release);
        FilterDecision::Keep
    }

    /// Whole-dict pruning for filters that need the full version list
    /// (latest-N). `current_version` is the project's `info.version`.
    /// Returns the surviving releases.
    fn prune(
        &self,
        project: &str,
        current_version: Option<&str>,
        releases: Vec<Release>,
    ) -> Vec<Release> {
        let _ = current_version;
        releases
            .into_iter()
            .filter(|r| self.evaluate(project, r) == FilterDecision::Keep)
            .collect()
    }

    /// Whether this filter pins an exact version (range) for `project`.
    ///
    /// A pinned requirement short-circuits every other release filter.
    fn pins(&self, project: &str) -> bool {
        let _ = project;
        false
    }
}

/// Drops individual release files
pub trait FileFilter: Send + Sync {
    fn name(&self) -> &'static str;

    fn evaluate(&self, project: &str, file: &ReleaseFile) -> FilterDecision;
}

/// The ordered filter pipeline for one run
pub struct FilterChain {
    project_filters: Vec<Box<dyn ProjectFilter>>,
    release_filters: Vec<Box<dyn ReleaseFilter>>,
    file_filters: Vec<Box<dyn FileFilter>>,
}

/// Registry of known project filter plugins, in evaluation order
const PROJECT_FILTER_NAMES: &[&str] = &[
    "allowlist_project",
    "blocklist_project",
    "regex_project",
    "size_project_metadata",
    "project_requirements",
    "regex_project_metadata",
];

/// Registry of known release filter plugins, in evaluation order
const RELEASE_FILTER_NAMES: &[&str] = &[
    "project_requirements_pinned",
    "prerelease_release",
    "latest_release",
    "upload_window_release",
    "allowlist_release",
    "blocklist_release",
    "regex_release",
];

/// Registry of known release-file filter plugins, in evaluation order
const FILE_FILTER_NAMES: &[&str] = &[
    "exclude_platform",
    "regex_release_file_metadata",
];

fn build_project_filter(name: &str, config: &MirrorConfig) -> Result<Box<dyn ProjectFilter>> {
    Ok(match name {
        "allowlist_project" => Box::new(AllowlistProjectFilter::from_config(config)?),
        "blocklist_project" => Box::new(BlocklistProjectFilter::from_config(config)?),
        "regex_project" => Box::new(RegexProjectFilter::from_config(config)?),
        "size_project_metadata" => Box::new(SizeProjectFilter::from_config(config)?),
        "project_requirements" => Box::new(RequirementsProjectFilter::from_config(config)?),
        "regex_project_metadata" => Box::new(RegexProjectMetadataFilter::from_config(config)?),
        _ => unreachable!("not in registry: {name}"),
    })
}

fn build_release_filter(name: &str, config: &MirrorConfig) -> Result<Box<dyn ReleaseFilter>> {
    Ok(match name {
        "project_requirements_pinned" => Box::new(PinnedReleaseFilter::from_config(config)?),
        "prerelease_release" => Box::new(PrereleaseFilter::from_config(config)?),
        "latest_release" => Box::new(LatestReleaseFilter::from_config(config)?),
        "upload_window_release" => Box::new(UploadWindowFilter::from_config(config)?),
        "allowlist_release" => Box::new(AllowlistReleaseFilter::from_config(config)?),
        "blocklist_release" => Box::new(BlocklistReleaseFilter::from_config(config)?),
        "regex_release" => Box::new(RegexReleaseFilter::from_config(config)?),
        _ => unreachable!("not in registry: {name}"),
    })
}

fn build_file_filter(name: &str, config: &MirrorConfig) -> Result<Box<dyn FileFilter>> {
    Ok(match name {
        "exclude_platform" => Box::new(ExcludePlatformFilter::from_config(config)?),
        "regex_release_file_metadata" => Box::new(RegexFileMetadataFilter::from_config(config)?),
        _ => unreachable!("not in registry: {name}"),
    })
}

impl FilterChain {
    /// Instantiate every enabled plugin from the static registry.
    ///
    /// `enabled = all` loads the whole table in registry order. An
    /// explicit list loads only the named entries, in configuration order
    /// within each category. A name outside the registry is a
    /// configuration error.
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        use crate::config::EnabledPlugins;

        let names: Vec<&str> = match &config.plugins {
            EnabledPlugins::None => Vec::new(),
            EnabledPlugins::All => PROJECT_FILTER_NAMES
                .iter()
                .chain(RELEASE_FILTER_NAMES)
                .chain(FILE_FILTER_NAMES)
                .copied()
                .collect(),
            EnabledPlugins::Named(named) => named.iter().map(String::as_str).collect(),
        };

        let mut project_filters = Vec::new();
        let mut release_filters = Vec::new();
        let mut file_filters = Vec::new();

        for name in names {
            if PROJECT_FILTER_NAMES.contains(&name) {
                project_filters.push(build_project_filter(name, config)?);
            } else if RELEASE_FILTER_NAMES.contains(&name) {
                release_filters.push(build_release_filter(name, config)?);
            } else if FILE_FILTER_NAMES.contains(&name) {
                file_filters.push(build_file_filter(name, config)?);
            } else {
                return Err(Error::FilterError(format!("unknown filter plugin: {name}")));
            }
        }

        Ok(Self {
            project_filters,
            release_filters,
            file_filters,
        })
    }

    /// Chain with no filters at all; everything is kept
    pub fn empty() -> Self {
        Self {
            project_filters: Vec::new(),
            release_filters: Vec::new(),
            file_filters: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.project_filters.is_empty()
            && self.release_filters.is_empty()
            && self.file_filters.is_empty()
    }

    /// Run the project filters; `DropProject` short-circuits
    pub fn filter_project(&self, metadata: &ProjectMetadata) -> FilterDecision {
        for filter in &self.project_filters {
            match filter.evaluate(metadata) {
                FilterDecision::Keep => continue,
                decision => {
                    debug!(
                        "Project {} dropped by {}",
                        metadata.normalized_name(),
                        filter.name()
                    );
                    return decision;
                }
            }
        }
        FilterDecision::Keep
    }

    /// Run the release filters over the versions dict.
    ///
    /// A pinned requirement for this project short-circuits every other
    /// release filter. An emptied dict is a valid outcome (the project
    /// publishes an empty index), not a project drop.
    pub fn filter_releases(
        &self,
        project: &str,
        current_version: Option<&str>,
        mut releases: Vec<Release>,
    ) -> Vec<Release> {
        if let Some(pinning) = self.release_filters.iter().find(|f| f.pins(project)) {
            debug!(
                "Project {} releases pinned by {}, skipping other release filters",
                project,
                pinning.name()
            );
            return pinning.prune(project, current_version, releases);
        }

        for filter in &self.release_filters {
            let before = releases.len();
            releases = filter.prune(project, current_version, releases);
            if releases.len() != before {
                debug!(
                    "Project {}: {} dropped {} release(s)",
                    project,
                    filter.name(),
                    before - releases.len()
                );
            }
        }
        releases
    }

    /// Run the release-file filters over one artifact
    pub fn filter_file(&self, project: &str, file: &ReleaseFile) -> FilterDecision {
        for filter in &self.file_filters {
            match filter.evaluate(project, file) {
                FilterDecision::Keep => continue,
                decision => {
                    debug!(
                        "File {} dropped by {}",
                        file.filename,
                        filter.name()
                    );
                    return decision;
                }
            }
        }
        FilterDecision::Keep
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

    #[test]
    fn test_no_plugins_section_means_no_filters() {
        let chain = FilterChain::from_config(&config("")).unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn test_unknown_plugin_fails_at_load() {
        let result = FilterChain::from_config(&config("[plugins]\nenabled = frobnicate\n"));
        assert!(matches!(result, Err(Error::FilterError(_))));
    }

    #[test]
    fn test_enabled_all_loads_registry() {
        let chain = FilterChain::from_config(&config(
            "[plugins]\nenabled = all\n[size_project_metadata]\nmax_package_size = 1G\n",
        ))
        .unwrap();
        assert!(!chain.is_empty());
        assert_eq!(chain.project_filters.len(), PROJECT_FILTER_NAMES.len());
        assert_eq!(chain.release_filters.len(), RELEASE_FILTER_NAMES.len());
        assert_eq!(chain.file_filters.len(), FILE_FILTER_NAMES.len());
    }

    #[test]
    fn test_selective_enable_keeps_configuration_order() {
        let chain = FilterChain::from_config(&config(
            "[plugins]\nenabled = blocklist_project\n    allowlist_project\n",
        ))
        .unwrap();
        let names: Vec<&str> = chain.project_filters.iter().map(|f| f.name()).collect();
        assert_eq!(names, vec!["blocklist_project", "allowlist_project"]);
    }
}
