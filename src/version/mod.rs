// src/version/mod.rs

//! PEP 440 version handling
//!
//! Parsing, ordering and specifier matching for Python package versions.
//! Covers the grammar upstream actually publishes: `[N!]N(.N)*` with
//! optional pre (`a`/`b`/`rc`), post (`.postN`) and dev (`.devN`) segments
//! and an optional local identifier (`+tag`). Ordering follows PEP 440:
//! dev < pre < final < post within the same release tuple.

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// Pre-release cycle tag with its number
///
/// Variant order gives the PEP 440 ordering: alpha < beta < rc.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PreRelease {
    Alpha(u64),
    Beta(u64),
    Rc(u64),
}

/// A parsed PEP 440 version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Version {
    pub epoch: u64,
    /// Release tuple, e.g. `[1, 24, 0]` for "1.24.0"
    pub release: Vec<u64>,
    pub pre: Option<PreRelease>,
    pub post: Option<u64>,
    pub dev: Option<u64>,
    pub local: Option<String>,
}

impl Version {
    /// Parse a PEP 440 version string
    ///
    /// Accepts the normalized and most common non-normalized spellings:
    /// a leading `v`, `alpha`/`beta`/`c`/`preview` pre tags, `rev`/`r` post
    /// tags, and `-N` as a post segment.
    pub fn parse(s: &str) -> Result<Self> {
        let input = s.trim().to_lowercase();
        let input = input.strip_prefix('v').unwrap_or(&input);

        if input.is_empty() {
            return Err(Error::ParseError("empty version string".to_string()));
        }

        // Split off the local identifier first
        let (main, local) = match input.split_once('+') {
            Some((m, l)) if !l.is_empty() => (m, Some(l.to_string())),
            Some((m, _)) => (m, None),
            None => (input, None),
        };

        // Epoch
        let (epoch, rest) = match main.split_once('!') {
            Some((e, r)) => {
                let epoch = e
                    .parse::<u64>()
                    .map_err(|_| Error::ParseError(format!("invalid epoch in '{s}'")))?;
                (epoch, r)
            }
            None => (0, main),
        };

        let mut parser = SegmentParser::new(rest);
        let release = parser.parse_release(s)?;
        let pre = parser.parse_pre(s)?;
        let post = parser.parse_post(s)?;
        let dev = parser.parse_dev(s)?;

        if !parser.at_end() {
            return Err(Error::ParseError(format!(
                "trailing garbage in version '{s}'"
            )));
        }

        Ok(Self {
            epoch,
            release,
            pre,
            post,
            dev,
            local,
        })
    }

    /// Whether this is a pre-release (has a pre or dev segment)
    pub fn is_prerelease(&self) -> bool {
        self.pre.is_some() || self.dev.is_some()
    }

    /// Release tuple component at `idx`, zero when absent
    ///
    /// Treats "1.0" and "1.0.0" as the same release.
    fn release_at(&self, idx: usize) -> u64 {
        self.release.get(idx).copied().unwrap_or(0)
    }

    fn cmp_release(&self, other: &Self) -> Ordering {
        let len = self.release.len().max(other.release.len());
        for i in 0..len {
            match self.release_at(i).cmp(&other.release_at(i)) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        Ordering::Equal
    }

    /// Ordering key for the pre segment.
    ///
    /// A version with no pre segment but a dev segment (and no post) sorts
    /// before every pre-release of the same release tuple.
    fn pre_key(&self) -> PreKey {
        match self.pre {
            Some(pre) => PreKey::Pre(pre),
            None if self.post.is_none() && self.dev.is_some() => PreKey::Dev,
            None => PreKey::Final,
        }
    }

    /// Dev sorts before the non-dev variant of the same version
    fn dev_key(&self) -> (u8, u64) {
        match self.dev {
            Some(n) => (0, n),
            None => (1, 0),
        }
    }
}

#[derive(PartialEq, Eq, PartialOrd, Ord)]
enum PreKey {
    Dev,
    Pre(PreRelease),
    Final,
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| self.cmp_release(other))
            .then_with(|| self.pre_key().cmp(&other.pre_key()))
            .then_with(|| self.post.cmp(&other.post))
            .then_with(|| self.dev_key().cmp(&other.dev_key()))
            .then_with(|| self.local.cmp(&other.local))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch != 0 {
            write!(f, "{}!", self.epoch)?;
        }
        let release: Vec<String> = self.release.iter().map(|n| n.to_string()).collect();
        write!(f, "{}", release.join("."))?;
        match self.pre {
            Some(PreRelease::Alpha(n)) => write!(f, "a{n}")?,
            Some(PreRelease::Beta(n)) => write!(f, "b{n}")?,
            Some(PreRelease::Rc(n)) => write!(f, "rc{n}")?,
            None => {}
        }
        if let Some(n) = self.post {
            write!(f, ".post{n}")?;
        }
        if let Some(n) = self.dev {
            write!(f, ".dev{n}")?;
        }
        if let Some(local) = &self.local {
            write!(f, "+{local}")?;
        }
        Ok(())
    }
}

/// Cursor over the post-epoch part of a version string
struct SegmentParser<'a> {
    rest: &'a str,
}

impl<'a> SegmentParser<'a> {
    fn new(rest: &'a str) -> Self {
        Self { rest }
    }

    fn at_end(&self) -> bool {
        self.rest.is_empty()
    }

    fn take_number(&mut self) -> Option<u64> {
        let digits: usize = self
            .rest
            .bytes()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if digits == 0 {
            return None;
        }
        let (num, rest) = self.rest.split_at(digits);
        self.rest = rest;
        num.parse().ok()
    }

    fn take_separator(&mut self) {
        if let Some(rest) = self
            .rest
            .strip_prefix('.')
            .or_else(|| self.rest.strip_prefix('-'))
            .or_else(|| self.rest.strip_prefix('_'))
        {
            self.rest = rest;
        }
    }

    fn take_tag(&mut self, tags: &[&str]) -> Option<&'static str> {
        // Longest tag first so "rc" doesn't shadow "r", "post" not "p"
        for tag in tags {
            if let Some(rest) = self.rest.strip_prefix(tag) {
                self.rest = rest;
                // Tags are compared against a static list, re-borrow
                let canonical: &'static str = match *tag {
                    "alpha" | "a" => "a",
                    "beta" | "b" => "b",
                    "rc" | "c" | "pre" | "preview" => "rc",
                    "post" | "rev" | "r" => "post",
                    "dev" => "dev",
                    _ => unreachable!(),
                };
                return Some(canonical);
            }
        }
        None
    }

    fn parse_release(&mut self, original: &str) -> Result<Vec<u64>> {
        let mut release = Vec::new();
        loop {
            match self.take_number() {
                Some(n) => release.push(n),
                None => {
                    return Err(Error::ParseError(format!(
                        "invalid release segment in version '{original}'"
                    )));
                }
            }
            if let Some(rest) = self.rest.strip_prefix('.') {
                // Only consume the dot when digits follow; ".dev0" belongs
                // to the dev segment.
                if rest.bytes().next().is_some_and(|b| b.is_ascii_digit()) {
                    self.rest = rest;
                    continue;
                }
            }
            return Ok(release);
        }
    }

    fn parse_pre(&mut self, _original: &str) -> Result<Option<PreRelease>> {
        let before = self.rest;
        self.take_separator();
        let tag = self.take_tag(&["alpha", "beta", "preview", "pre", "rc", "a", "b", "c"]);
        match tag {
            None => {
                self.rest = before;
                Ok(None)
            }
            Some(kind) => {
                self.take_separator();
                let n = self.take_number().unwrap_or(0);
                Ok(Some(match kind {
                    "a" => PreRelease::Alpha(n),
                    "b" => PreRelease::Beta(n),
                    _ => PreRelease::Rc(n),
                }))
            }
        }
    }

    fn parse_post(&mut self, _original: &str) -> Result<Option<u64>> {
        let before = self.rest;
        // Bare "-N" is an implicit post release
        if let Some(rest) = self.rest.strip_prefix('-') {
            let mut sub = SegmentParser::new(rest);
            if let Some(n) = sub.take_number() {
                self.rest = sub.rest;
                return Ok(Some(n));
            }
        }
        self.take_separator();
        match self.take_tag(&["post", "rev", "r"]) {
            None => {
                self.rest = before;
                Ok(None)
            }
            Some(_) => {
                self.take_separator();
                Ok(Some(self.take_number().unwrap_or(0)))
            }
        }
    }

    fn parse_dev(&mut self, _original: &str) -> Result<Option<u64>> {
        let before = self.rest;
        self.take_separator();
        match self.take_tag(&["dev"]) {
            None => {
                self.rest = before;
                Ok(None)
            }
            Some(_) => {
                self.take_separator();
                Ok(Some(self.take_number().unwrap_or(0)))
            }
        }
    }
}

/// A single PEP 440 specifier clause, e.g. `>=1.2` or `==1.4.*`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Specifier {
    Equal(Version),
    /// `==X.Y.*` prefix match
    EqualWildcard(Vec<u64>),
    NotEqual(Version),
    NotEqualWildcard(Vec<u64>),
    GreaterOrEqual(Version),
    LessOrEqual(Version),
    Greater(Version),
    Less(Version),
    /// `~=X.Y.Z`: >= X.Y.Z and == X.Y.*
    Compatible(Version),
    /// `===literal` string comparison
    Arbitrary(String),
}

impl Specifier {
    /// Parse one specifier clause
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();

        if let Some(rest) = s.strip_prefix("===") {
            return Ok(Specifier::Arbitrary(rest.trim().to_string()));
        }

        let wildcard = |rest: &str| -> Result<Vec<u64>> {
            let prefix = rest.trim().trim_end_matches(".*");
            prefix
                .split('.')
                .map(|p| {
                    p.parse::<u64>()
                        .map_err(|_| Error::ParseError(format!("invalid wildcard specifier '{s}'")))
                })
                .collect()
        };

        if let Some(rest) = s.strip_prefix("==") {
            let rest = rest.trim();
            if rest.ends_with(".*") {
                return Ok(Specifier::EqualWildcard(wildcard(rest)?));
            }
            return Ok(Specifier::Equal(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("!=") {
            let rest = rest.trim();
            if rest.ends_with(".*") {
                return Ok(Specifier::NotEqualWildcard(wildcard(rest)?));
            }
            return Ok(Specifier::NotEqual(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("~=") {
            let version = Version::parse(rest)?;
            if version.release.len() < 2 {
                return Err(Error::ParseError(format!(
                    "compatible specifier needs at least two release segments: '{s}'"
                )));
            }
            return Ok(Specifier::Compatible(version));
        }
        if let Some(rest) = s.strip_prefix(">=") {
            return Ok(Specifier::GreaterOrEqual(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix("<=") {
            return Ok(Specifier::LessOrEqual(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('>') {
            return Ok(Specifier::Greater(Version::parse(rest)?));
        }
        if let Some(rest) = s.strip_prefix('<') {
            return Ok(Specifier::Less(Version::parse(rest)?));
        }

        // A bare version means exact match
        Ok(Specifier::Equal(Version::parse(s)?))
    }

    /// Check whether `version` satisfies this clause
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            Specifier::Equal(v) => version == v,
            Specifier::EqualWildcard(prefix) => Self::prefix_matches(prefix, version),
            Specifier::NotEqual(v) => version != v,
            Specifier::NotEqualWildcard(prefix) => !Self::prefix_matches(prefix, version),
            Specifier::GreaterOrEqual(v) => version >= v,
            Specifier::LessOrEqual(v) => version <= v,
            Specifier::Greater(v) => version > v,
            Specifier::Less(v) => version < v,
            Specifier::Compatible(v) => {
                let prefix: Vec<u64> = v.release[..v.release.len() - 1].to_vec();
                version >= v && Self::prefix_matches(&prefix, version)
            }
            Specifier::Arbitrary(s) => version.to_string() == *s,
        }
    }

    fn prefix_matches(prefix: &[u64], version: &Version) -> bool {
        prefix
            .iter()
            .enumerate()
            .all(|(i, n)| version.release_at(i) == *n)
    }
}

/// A comma-separated set of specifier clauses; all must match
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SpecifierSet {
    clauses: Vec<Specifier>,
}

impl SpecifierSet {
    /// Parse a specifier set such as `>=1.0,<2.0,!=1.5`
    ///
    /// An empty string parses to the set that matches everything.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Ok(Self::default());
        }
        let clauses = s
            .split(',')
            .map(|c| Specifier::parse(c))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { clauses })
    }

    pub fn matches(&self, version: &Version) -> bool {
        self.clauses.iter().all(|c| c.matches(version))
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Whether this set pins a single exact version (or wildcard prefix)
    ///
    /// Used by the release filters: a pinned requirement short-circuits
    /// every other release filter.
    pub fn is_pinned(&self) -> bool {
        self.clauses.iter().any(|c| {
            matches!(
                c,
                Specifier::Equal(_) | Specifier::EqualWildcard(_) | Specifier::Arbitrary(_)
            )
        })
    }
}
