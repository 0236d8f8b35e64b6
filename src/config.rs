// src/config.rs

//! Configuration file parsing
//!
//! The operator-facing format is INI with a `[mirror]` section, a
//! `[plugins]` section naming the enabled filters, and one section per
//! filter carrying its settings. Values are validated into a typed
//! `MirrorConfig` before any network call; a missing required key or an
//! invalid value fails the run immediately.

use crate::error::{Error, Result};
use crate::hash::DigestName;
use configparser::ini::Ini;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which index document formats get generated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SimpleFormat {
    #[default]
    All,
    Html,
    Json,
}

impl SimpleFormat {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "ALL" => Ok(Self::All),
            "HTML" => Ok(Self::Html),
            "JSON" => Ok(Self::Json),
            _ => Err(Error::ConfigError(format!(
                "{s} is not a valid simple-format (expected HTML, JSON or ALL)"
            ))),
        }
    }

    pub fn html_enabled(&self) -> bool {
        matches!(self, Self::All | Self::Html)
    }

    pub fn json_enabled(&self) -> bool {
        matches!(self, Self::All | Self::Json)
    }
}

/// How the pipeline decides whether a local file is current
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CompareMethod {
    /// Recompute the local digest and compare to metadata
    #[default]
    Hash,
    /// Compare declared size and require mtime >= upload time
    Stat,
}

impl CompareMethod {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "stat" => Ok(Self::Stat),
            _ => Err(Error::ConfigError(format!(
                "{s} is not a valid compare-method (expected hash or stat)"
            ))),
        }
    }
}

/// Storage driver selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageDriver {
    #[default]
    Filesystem,
    S3,
    Swift,
}

impl StorageDriver {
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "filesystem" => Ok(Self::Filesystem),
            "s3" => Ok(Self::S3),
            "swift" => Ok(Self::Swift),
            _ => Err(Error::ConfigError(format!(
                "{s} is not a valid storage-backend (expected filesystem, s3 or swift)"
            ))),
        }
    }
}

/// Which filter plugins the operator enabled
#[derive(Debug, Clone, Default)]
pub enum EnabledPlugins {
    /// `enabled = all`
    All,
    /// An explicit plugin name list
    Named(Vec<String>),
    /// No `[plugins]` section at all
    #[default]
    None,
}

impl EnabledPlugins {
    pub fn is_enabled(&self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::Named(names) => names.iter().any(|n| n == name),
            Self::None => false,
        }
    }
}

/// Validated mirror configuration
#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub directory: PathBuf,
    pub master: String,
    pub download_mirror: Option<String>,
    pub download_mirror_no_fallback: bool,
    pub proxy: Option<String>,
    pub workers: usize,
    pub verifiers: usize,
    pub timeout: Duration,
    pub global_timeout: Duration,
    pub stop_on_error: bool,
    pub hash_index: bool,
    pub json_save: bool,
    pub release_files: bool,
    pub simple_format: SimpleFormat,
    pub root_uri: Option<String>,
    pub compare_method: CompareMethod,
    pub digest_name: DigestName,
    pub keep_index_versions: usize,
    pub diff_file: Option<PathBuf>,
    pub diff_append_epoch: bool,
    pub cleanup: bool,
    pub storage_backend: StorageDriver,
    pub log_config: Option<PathBuf>,
    pub plugins: EnabledPlugins,
    /// Raw filter sections, keyed by lowercased section name
    sections: HashMap<String, HashMap<String, Option<String>>>,
}

/// Default root URI used when release files are not mirrored locally
pub const DEFAULT_ROOT_URI: &str = "https://files.pythonhosted.org/";

impl MirrorConfig {
    /// Load and validate a configuration file
    pub fn load(path: &Path) -> Result<Self> {
        let mut ini = Ini::new();
        ini.set_multiline(true);
        ini.load(path)
            .map_err(|e| Error::ConfigError(format!("cannot read {}: {e}", path.display())))?;
        Self::from_ini(ini)
    }

    /// Parse configuration from a string (tests, embedded defaults)
    pub fn from_str(content: &str) -> Result<Self> {
        let mut ini = Ini::new();
        ini.set_multiline(true);
        ini.read(content.to_string())
            .map_err(|e| Error::ConfigError(format!("cannot parse configuration: {e}")))?;
        Self::from_ini(ini)
    }

    fn from_ini(ini: Ini) -> Result<Self> {
        let get = |key: &str| ini.get("mirror", key);

        let directory = get("directory")
            .map(PathBuf::from)
            .ok_or_else(|| Error::ConfigError("[mirror] directory is required".to_string()))?;

        let master = get("master")
            .ok_or_else(|| Error::ConfigError("[mirror] master is required".to_string()))?;
        if !master.starts_with("https:") {
            return Err(Error::ConfigError(format!(
                "[mirror] master must be an https:// URL, got {master}"
            )));
        }
        let master = master.trim_end_matches('/').to_string();

        let workers = get_int(&ini, "workers", 3)?;
        if !(1..=10).contains(&workers) {
            return Err(Error::ConfigError(format!(
                "[mirror] workers must be between 1 and 10, got {workers}"
            )));
        }
        let verifiers = get_int(&ini, "verifiers", 3)?;
        if !(1..=10).contains(&verifiers) {
            return Err(Error::ConfigError(format!(
                "[mirror] verifiers must be between 1 and 10, got {verifiers}"
            )));
        }

        let release_files = get_bool(&ini, "release-files", true)?;
        let root_uri = match get("root_uri").filter(|u| !u.is_empty()) {
            Some(uri) => Some(uri),
            None if !release_files => Some(DEFAULT_ROOT_URI.to_string()),
            None => None,
        };

        let digest_name = match get("digest_name") {
            Some(name) => name
                .parse::<DigestName>()
                .map_err(Error::ConfigError)?,
            None => DigestName::Sha256,
        };

        let plugins = match ini.get("plugins", "enabled") {
            None => EnabledPlugins::None,
            Some(raw) => {
                let names: Vec<String> = split_list(&raw);
                if names.iter().any(|n| n == "all") {
                    EnabledPlugins::All
                } else {
                    EnabledPlugins::Named(names)
                }
            }
        };

        Ok(Self {
            directory,
            master,
            download_mirror: get("download-mirror").filter(|u| !u.is_empty()),
            download_mirror_no_fallback: get_bool(&ini, "download-mirror-no-fallback", false)?,
            proxy: get("proxy").filter(|u| !u.is_empty()),
            workers: workers as usize,
            verifiers: verifiers as usize,
            timeout: Duration::from_secs_f64(get_float(&ini, "timeout", 10.0)?),
            global_timeout: Duration::from_secs_f64(get_float(&ini, "global-timeout", 18_000.0)?),
            stop_on_error: get_bool(&ini, "stop-on-error", false)?,
            hash_index: get_bool(&ini, "hash-index", false)?,
            json_save: get_bool(&ini, "json", false)?,
            release_files,
            simple_format: match get("simple-format") {
                Some(f) => SimpleFormat::parse(&f)?,
                None => SimpleFormat::All,
            },
            root_uri,
            compare_method: match get("compare-method") {
                Some(m) => CompareMethod::parse(&m)?,
                None => CompareMethod::Hash,
            },
            digest_name,
            keep_index_versions: get_int(&ini, "keep_index_versions", 0)?.max(0) as usize,
            diff_file: get("diff-file").filter(|p| !p.is_empty()).map(PathBuf::from),
            diff_append_epoch: get_bool(&ini, "diff-append-epoch", false)?,
            cleanup: get_bool(&ini, "cleanup", false)?,
            storage_backend: match get("storage-backend") {
                Some(b) => StorageDriver::parse(&b)?,
                None => StorageDriver::Filesystem,
            },
            log_config: get("log-config").filter(|p| !p.is_empty()).map(PathBuf::from),
            plugins,
            sections: ini.get_map().unwrap_or_default(),
        })
    }

    /// Web root under the mirror directory
    pub fn webdir(&self) -> PathBuf {
        self.directory.join("web")
    }

    /// Raw key lookup in a filter section
    pub fn section_get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_lowercase())?
            .get(&key.to_lowercase())?
            .as_deref()
    }

    /// List-valued key in a filter section (newline/comma/space separated).
    ///
    /// For bare-name lists only; values that may legitimately contain
    /// commas or spaces (requirement specifiers, regex patterns) go
    /// through `section_lines` instead.
    pub fn section_list(&self, section: &str, key: &str) -> Vec<String> {
        self.section_get(section, key)
            .map(split_list)
            .unwrap_or_default()
    }

    /// List-valued key split on newlines only, comments and blanks
    /// dropped
    pub fn section_lines(&self, section: &str, key: &str) -> Vec<String> {
        self.section_get(section, key)
            .map(|raw| {
                raw.lines()
                    .map(str::trim)
                    .filter(|l| !l.is_empty() && !l.starts_with('#'))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// All key/value pairs of a filter section, sorted by key
    pub fn section_keys(&self, section: &str) -> Option<Vec<(String, String)>> {
        let section = self.sections.get(&section.to_lowercase())?;
        let mut pairs: Vec<(String, String)> = section
            .iter()
            .filter_map(|(k, v)| v.clone().map(|v| (k.clone(), v)))
            .collect();
        pairs.sort();
        Some(pairs)
    }
}

fn get_bool(ini: &Ini, key: &str, default: bool) -> Result<bool> {
    ini.getboolcoerce("mirror", key)
        .map_err(|e| Error::ConfigError(format!("[mirror] {key}: {e}")))
        .map(|v| v.unwrap_or(default))
}

fn get_int(ini: &Ini, key: &str, default: i64) -> Result<i64> {
    ini.getint("mirror", key)
        .map_err(|e| Error::ConfigError(format!("[mirror] {key}: {e}")))
        .map(|v| v.unwrap_or(default))
}

fn get_float(ini: &Ini, key: &str, default: f64) -> Result<f64> {
    ini.getfloat("mirror", key)
        .map_err(|e| Error::ConfigError(format!("[mirror] {key}: {e}")))
        .map(|v| v.unwrap_or(default))
}

/// Split a list value on newlines, commas and whitespace
pub fn split_list(raw: &str) -> Vec<String> {
    raw.split(['\n', ',', ' ', '\t'])
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.starts_with('#'))
        .map(str::to_string)
        .collect()
}

/// Parse a human size string such as `1G`, `512M`, `100KB` or plain bytes.
///
/// Suffixes are decimal (1K = 1000) to match the operator documentation
/// of the size-cap filter.
pub fn parse_size(raw: &str) -> Result<u64> {
    let s = raw.trim().to_uppercase();
    let s = s.strip_suffix('B').unwrap_or(&s);
    let (number, multiplier) = match s.chars().last() {
        Some('K') => (&s[..s.len() - 1], 1_000u64),
        Some('M') => (&s[..s.len() - 1], 1_000_000),
        Some('G') => (&s[..s.len() - 1], 1_000_000_000),
        Some('T') => (&s[..s.len() - 1], 1_000_000_000_000),
        _ => (s, 1),
    };
    let value: f64 = number
        .trim()
        .parse()
        .map_err(|_| Error::ConfigError(format!("invalid size value: {raw}")))?;
    if value < 0.0 {
        return Err(Error::ConfigError(format!("invalid size value: {raw}")));
    }
    Ok((value * multiplier as f64) as u64)
}
