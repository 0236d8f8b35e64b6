// src/filters/file.rs

//! Release-file filter plugins
//!
//! The last filter stage: individual artifacts of a surviving release can
//! still be refused, e.g. Windows installers on a Linux-only mirror.

use super::{FileFilter, FilterDecision};
use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::model::ReleaseFile;
use regex::Regex;
use tracing::info;

/// Filename fragments of Windows wheels and installers (PEP 425 tags)
const WINDOWS_PATTERNS: &[&str] = &[".win32", "-win32", "win_amd64", "win-amd64", "win_arm64"];

/// Filename fragments of Linux wheels (PEP 425/513/571/599 tags)
const LINUX_PATTERNS: &[&str] = &[
    "linux-i686",
    "linux-x86_64",
    "linux_armv7l",
    "linux_armv6l",
    "manylinux1_i686",
    "manylinux1_x86_64",
    "manylinux2010_i686",
    "manylinux2010_x86_64",
    "manylinux2014_x86_64",
    "manylinux2014_i686",
    "manylinux2014_aarch64",
    "manylinux2014_armv7l",
    "manylinux2014_ppc64",
    "manylinux2014_ppc64le",
    "manylinux2014_s390x",
    "manylinux_2_17",
    "manylinux_2_24",
    "manylinux_2_28",
    "musllinux_1_1",
    "musllinux_1_2",
];

/// Expand a `pyX.Y` tag into the filename fragments that identify it
fn python_version_patterns(tag: &str) -> Vec<String> {
    // "py3.10" matches both the generic py tag and the CPython ABI tag
    let bare = tag.replace('.', "");
    vec![
        format!("-{tag}"),
        format!("-{bare}"),
        format!("-cp{}", bare.trim_start_matches("py")),
        format!(".{tag}"),
    ]
}

/// `exclude_platform`: drop artifacts for the platforms and Python
/// versions named in `[blocklist] platforms`.
///
/// Source distributions are never dropped by this filter.
pub struct ExcludePlatformFilter {
    patterns: Vec<String>,
    packagetypes: Vec<String>,
}

impl ExcludePlatformFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let mut patterns: Vec<String> = Vec::new();
        let mut packagetypes: Vec<String> = Vec::new();

        for tag in config.section_list("blocklist", "platforms") {
            let tag = tag.to_lowercase();
            match tag.as_str() {
                "windows" | "win" => {
                    patterns.extend(WINDOWS_PATTERNS.iter().map(|s| s.to_string()));
                    packagetypes.extend(["bdist_msi".into(), "bdist_wininst".into()]);
                }
                "macos" | "macosx" => {
                    patterns.extend(["macosx_".into(), "macosx-".into()]);
                    packagetypes.push("bdist_dmg".into());
                }
                "freebsd" => {
                    patterns.extend([".freebsd".into(), "-freebsd".into()]);
                }
                "linux" => {
                    patterns.extend(LINUX_PATTERNS.iter().map(|s| s.to_string()));
                    packagetypes.push("bdist_rpm".into());
                }
                t if t.starts_with("py") => {
                    patterns.extend(python_version_patterns(t));
                }
                // A raw PEP 425 fragment passes through as-is
                t if WINDOWS_PATTERNS.contains(&t) || LINUX_PATTERNS.contains(&t) => {
                    patterns.push(t.to_string());
                }
                other => {
                    return Err(Error::FilterError(format!(
                        "unknown platform tag '{other}' in [blocklist] platforms"
                    )));
                }
            }
        }

        if !patterns.is_empty() || !packagetypes.is_empty() {
            info!(
                "Initialized exclude_platform with {} pattern(s)",
                patterns.len()
            );
        }
        Ok(Self {
            patterns,
            packagetypes,
        })
    }
}

impl FileFilter for ExcludePlatformFilter {
    fn name(&self) -> &'static str {
        "exclude_platform"
    }

    fn evaluate(&self, _project: &str, file: &ReleaseFile) -> FilterDecision {
        // sdists are the canonical artifact; never filter them out
        if file.packagetype == "sdist" {
            return FilterDecision::Keep;
        }
        if self.packagetypes.iter().any(|t| *t == file.packagetype) {
            return FilterDecision::Drop;
        }
        if self.patterns.iter().any(|p| file.filename.contains(p)) {
            return FilterDecision::Drop;
        }
        FilterDecision::Keep
    }
}

/// `regex_release_file_metadata`: drop artifacts matching any
/// `[regex_release_file_metadata] filename` pattern.
pub struct RegexFileMetadataFilter {
    filename_patterns: Vec<Regex>,
    packagetype_patterns: Vec<Regex>,
}

impl RegexFileMetadataFilter {
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let compile = |key: &str| -> Result<Vec<Regex>> {
            config
                .section_lines("regex_release_file_metadata", key)
                .iter()
                .map(|p| {
                    Regex::new(p)
                        .map_err(|e| Error::FilterError(format!("bad pattern '{p}': {e}")))
                })
                .collect()
        };
        Ok(Self {
            filename_patterns: compile("filename")?,
            packagetype_patterns: compile("packagetype")?,
        })
    }
}

impl FileFilter for RegexFileMetadataFilter {
    fn name(&self) -> &'static str {
        "regex_release_file_metadata"
    }

    fn evaluate(&self, _project: &str, file: &ReleaseFile) -> FilterDecision {
        if self
            .filename_patterns
            .iter()
            .any(|p| p.is_match(&file.filename))
        {
            return FilterDecision::Drop;
        }
        if self
            .packagetype_patterns
            .iter()
            .any(|p| p.is_match(&file.packagetype))
        {
            return FilterDecision::Drop;
        }
        FilterDecision::Keep
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Digests;

    fn config(body: &str) -> MirrorConfig {
        MirrorConfig::from_str(&format!(
            "[mirror]\ndirectory = /srv\nmaster = https://pypi.org\n{body}"
        ))
        .unwrap()
    }

    fn file(filename: &str, packagetype: &str) -> ReleaseFile {
        ReleaseFile {
            url: "https://host/packages/aa/bb/cc/x".to_string(),
            filename: filename.to_string(),
            packagetype: packagetype.to_string(),
            requires_python: None,
            size: 1,
            digests: Digests {
                sha256: "00".to_string(),
                md5: None,
            },
            upload_time_iso_8601: None,
            yanked: false,
            yanked_reason: None,
        }
    }

    #[test]
    fn test_exclude_windows() {
        let filter =
            ExcludePlatformFilter::from_config(&config("[blocklist]\nplatforms = windows\n"))
                .unwrap();
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0-cp311-cp311-win_amd64.whl", "bdist_wheel")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0.msi", "bdist_msi")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate(
                "pkg",
                &file("pkg-1.0-cp311-cp311-manylinux_2_17_x86_64.whl", "bdist_wheel")
            ),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_sdist_never_dropped() {
        let filter = ExcludePlatformFilter::from_config(&config(
            "[blocklist]\nplatforms = windows linux macos freebsd\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0.tar.gz", "sdist")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_exclude_python_version() {
        let filter =
            ExcludePlatformFilter::from_config(&config("[blocklist]\nplatforms = py2.7\n"))
                .unwrap();
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0-py2.7.egg", "bdist_egg")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0-py3-none-any.whl", "bdist_wheel")),
            FilterDecision::Keep
        );
    }

    #[test]
    fn test_unknown_platform_fails_at_load() {
        let result =
            ExcludePlatformFilter::from_config(&config("[blocklist]\nplatforms = solaris\n"));
        assert!(matches!(result, Err(Error::FilterError(_))));
    }

    #[test]
    fn test_regex_file_filter() {
        let filter = RegexFileMetadataFilter::from_config(&config(
            "[regex_release_file_metadata]\nfilename = .*\\.egg$\n",
        ))
        .unwrap();
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0.egg", "bdist_egg")),
            FilterDecision::Drop
        );
        assert_eq!(
            filter.evaluate("pkg", &file("pkg-1.0.whl", "bdist_wheel")),
            FilterDecision::Keep
        );
    }
}
