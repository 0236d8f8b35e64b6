// src/filters/requirements.rs

//! Requirement-line parsing shared by the allowlist and requirements-file
//! filters
//!
//! Understands the subset of requirement syntax that matters for
//! mirroring: a project name, optional extras (ignored), an optional
//! PEP 440 specifier set, optional environment markers and inline
//! comments (both ignored).

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::model::normalize;
use crate::version::SpecifierSet;
use std::path::PathBuf;
use tracing::debug;

/// A parsed requirement: normalized name plus version constraints
#[derive(Debug, Clone)]
pub struct Requirement {
    pub name: String,
    pub specifiers: SpecifierSet,
}

/// Parse one requirement line; returns None for blanks and comments
pub fn parse_line(line: &str) -> Result<Option<Requirement>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') || line.starts_with('-') {
        return Ok(None);
    }

    // Strip inline comments and environment markers
    let line = line.split('#').next().unwrap_or("").trim();
    let line = line.split(';').next().unwrap_or("").trim();
    if line.is_empty() {
        return Ok(None);
    }

    // The name ends at the first specifier operator, extra bracket or space
    let name_end = line
        .find(['=', '<', '>', '!', '~', '[', ' '])
        .unwrap_or(line.len());
    let name = normalize(line[..name_end].trim());
    if name.is_empty() {
        return Err(Error::FilterError(format!(
            "invalid requirement line: {line}"
        )));
    }

    // Skip the extras bracket if present
    let mut rest = &line[name_end..];
    if let Some(close) = rest.strip_prefix('[').and(rest.find(']')) {
        rest = &rest[close + 1..];
    }

    let specifiers = SpecifierSet::parse(rest.trim())
        .map_err(|e| Error::FilterError(format!("invalid specifier in '{line}': {e}")))?;

    Ok(Some(Requirement { name, specifiers }))
}

/// Resolve the requirements file list from `[allowlist]`.
///
/// `requirements` names files relative to `requirements_path`; entries
/// containing a glob expand against that directory in sorted order.
fn requirement_files(config: &MirrorConfig) -> Result<Vec<PathBuf>> {
    let base = config
        .section_get("allowlist", "requirements_path")
        .map(PathBuf::from)
        .unwrap_or_default();

    let mut files = Vec::new();
    for entry in config.section_lines("allowlist", "requirements") {
        if entry.contains('*') {
            let pattern = base.join(&entry);
            let matches = glob::glob(&pattern.to_string_lossy())
                .map_err(|e| Error::FilterError(format!("bad requirements glob {entry}: {e}")))?;
            let mut found: Vec<PathBuf> = matches.filter_map(|m| m.ok()).collect();
            found.sort();
            files.extend(found);
        } else {
            files.push(base.join(entry));
        }
    }
    Ok(files)
}

/// Read and parse every configured requirements file
pub fn from_requirement_files(config: &MirrorConfig) -> Result<Vec<Requirement>> {
    let mut requirements = Vec::new();
    for path in requirement_files(config)? {
        debug!("Reading requirements from {}", path.display());
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::FilterError(format!("cannot read requirements {}: {e}", path.display()))
        })?;
        for line in content.lines() {
            if let Some(requirement) = parse_line(line)? {
                requirements.push(requirement);
            }
        }
    }
    Ok(requirements)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::Version;

    #[test]
    fn test_parse_bare_name() {
        let req = parse_line("Django").unwrap().unwrap();
        assert_eq!(req.name, "django");
        assert!(req.specifiers.is_empty());
    }

    #[test]
    fn test_parse_with_specifier() {
        let req = parse_line("requests>=2.0,<3.0").unwrap().unwrap();
        assert_eq!(req.name, "requests");
        assert!(req.specifiers.matches(&Version::parse("2.5").unwrap()));
        assert!(!req.specifiers.matches(&Version::parse("3.0").unwrap()));
    }

    #[test]
    fn test_parse_with_extras_and_markers() {
        let req = parse_line("uvicorn[standard]==0.30.1 ; python_version >= '3.8'")
            .unwrap()
            .unwrap();
        assert_eq!(req.name, "uvicorn");
        assert!(req.specifiers.is_pinned());
    }

    #[test]
    fn test_skips_comments_and_flags() {
        assert!(parse_line("# a comment").unwrap().is_none());
        assert!(parse_line("").unwrap().is_none());
        assert!(parse_line("-r other.txt").unwrap().is_none());
        let req = parse_line("peerme  # inline comment").unwrap().unwrap();
        assert_eq!(req.name, "peerme");
    }
}
