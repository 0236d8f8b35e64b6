// src/upstream/client.rs

//! HTTP client for the upstream package index
//!
//! Wraps reqwest with the retry policy of the mirror: transient failures
//! (connect reset, 5xx, timeout, partial read) back off exponentially with
//! jitter for up to three attempts, 404/410 are terminal for the resource.
//! One connection pool is shared across every call of a sync run.

use crate::config::MirrorConfig;
use crate::error::{Error, Result};
use crate::hash::{DigestName, Hasher};
use crate::storage::StreamingWrite;
use crate::upstream::xmlrpc::{self, Value};
use futures::StreamExt;
use reqwest::StatusCode;
use std::collections::BTreeMap;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Maximum retry attempts for transient failures
const MAX_RETRIES: u32 = 3;

/// Base retry delay; doubles per attempt, plus jitter
const RETRY_DELAY_MS: u64 = 1000;

/// Accept header for the versioned simple API
const SIMPLE_JSON_ACCEPT: &str = "application/vnd.pypi.simple.v1+json";

/// Serial header set by the index and its CDN
const SERIAL_HEADER: &str = "X-PYPI-LAST-SERIAL";

/// Client over the upstream index
pub struct UpstreamClient {
    client: reqwest::Client,
    url: String,
    download_mirror: Option<String>,
    no_fallback: bool,
    max_retries: u32,
}

impl UpstreamClient {
    /// Build the client from mirror configuration.
    ///
    /// The per-request timeout and the proxy apply to every call made
    /// through this instance. With no explicit proxy configured, reqwest
    /// picks up HTTPS_PROXY / HTTP_PROXY / ALL_PROXY from the environment.
    pub fn from_config(config: &MirrorConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(config.workers)
            .user_agent(concat!("wheelhouse/", env!("CARGO_PKG_VERSION")));

        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| Error::ConfigError(format!("invalid proxy {proxy}: {e}")))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::ConfigError(format!("cannot create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: config.master.clone(),
            download_mirror: config
                .download_mirror
                .as_ref()
                .map(|u| u.trim_end_matches('/').to_string()),
            no_fallback: config.download_mirror_no_fallback,
            max_retries: MAX_RETRIES,
        })
    }

    /// XML-RPC endpoint for changelog calls
    fn rpc_url(&self) -> String {
        format!("{}/pypi/", self.url)
    }

    /// Backoff delay before the next attempt
    async fn backoff(attempt: u32) {
        let jitter = (rand::random::<f32>() * RETRY_DELAY_MS as f32) as u64;
        let delay = RETRY_DELAY_MS * 2u64.saturating_pow(attempt - 1) + jitter;
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    /// Classify a reqwest error as retryable or fatal
    fn transport_error(context: &str, e: reqwest::Error) -> Error {
        // Everything reqwest reports at transport level (connect, timeout,
        // body read) is transient; HTTP status handling happens separately.
        Error::DownloadError(format!("{context}: {e}"))
    }

    /// Map an unexpected HTTP status
    fn status_error(context: &str, status: StatusCode) -> Error {
        match status {
            StatusCode::NOT_FOUND | StatusCode::GONE => {
                Error::UpstreamNotFound(context.to_string())
            }
            s if s.is_server_error() => {
                Error::DownloadError(format!("{context}: HTTP {s}"))
            }
            s => Error::DownloadError(format!("{context}: unexpected HTTP {s}")),
        }
    }

    /// Issue an XML-RPC call with retry
    async fn rpc(&self, method: &str, params: &[Value]) -> Result<Value> {
        let body = xmlrpc::request(method, params);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = self
                .client
                .post(self.rpc_url())
                .header("Content-Type", "text/xml")
                .body(body.clone())
                .send()
                .await;

            let err = match result {
                Ok(response) if response.status().is_success() => {
                    match response.text().await {
                        Ok(text) => return xmlrpc::parse_response(&text),
                        Err(e) => Self::transport_error(method, e),
                    }
                }
                Ok(response) => Self::status_error(method, response.status()),
                Err(e) => Self::transport_error(method, e),
            };

            if err.is_retryable() && attempt < self.max_retries {
                warn!("{} attempt {} failed: {}, retrying", method, attempt, err);
                Self::backoff(attempt).await;
            } else {
                return Err(err);
            }
        }
    }

    /// Current upstream serial
    pub async fn current_serial(&self) -> Result<u64> {
        let value = self.rpc("changelog_last_serial", &[]).await?;
        value
            .as_int()
            .map(|n| n as u64)
            .ok_or_else(|| Error::ParseError("changelog_last_serial: not an integer".to_string()))
    }

    /// Projects changed since `serial`, with the serial to advance to.
    ///
    /// With `serial == 0` this is the complete project list. The current
    /// serial is fetched before the listing, so a concurrent upstream
    /// mutation re-queues the project next run instead of being skipped.
    pub async fn changelog_since(&self, serial: u64) -> Result<(u64, BTreeMap<String, u64>)> {
        let current = self.current_serial().await?;

        let mut packages: BTreeMap<String, u64> = BTreeMap::new();
        if serial == 0 {
            info!("Syncing all packages (full run)");
            let value = self.rpc("list_packages_with_serial", &[]).await?;
            let members = value.as_struct().ok_or_else(|| {
                Error::ParseError("list_packages_with_serial: not a struct".to_string())
            })?;
            for (name, member) in members {
                let pkg_serial = member.as_int().unwrap_or(0) as u64;
                packages.insert(name.clone(), pkg_serial);
            }
        } else {
            info!("Syncing based on changelog since serial {}", serial);
            let value = self
                .rpc("changelog_since_serial", &[Value::Int(serial as i64)])
                .await?;
            let rows = value.as_array().ok_or_else(|| {
                Error::ParseError("changelog_since_serial: not an array".to_string())
            })?;
            for row in rows {
                // Rows are (project, version, timestamp, action, serial);
                // only project and serial matter here. Tolerate plain
                // (project, serial) pairs from alternate transports.
                let Some(fields) = row.as_array() else {
                    continue;
                };
                let Some(name) = fields.first().and_then(Value::as_str) else {
                    continue;
                };
                let row_serial = fields
                    .iter()
                    .rev()
                    .find_map(Value::as_int)
                    .unwrap_or(0) as u64;
                let entry = packages.entry(name.to_string()).or_insert(0);
                if row_serial > *entry {
                    *entry = row_serial;
                }
            }
        }

        let target = packages.values().copied().max().unwrap_or(0).max(current);
        Ok((target, packages))
    }

    /// Fetch `/pypi/<project>/json`, enforcing the expected serial.
    ///
    /// The serial header lets us spot stale CDN entries before they
    /// poison the mirror. Returns the raw document; decoding into the
    /// typed model happens in the pipeline.
    pub async fn fetch_project_metadata(
        &self,
        project: &str,
        required_serial: Option<u64>,
    ) -> Result<serde_json::Value> {
        let url = format!("{}/pypi/{}/json", self.url, project);
        debug!("Fetching metadata for {} (serial {:?})", project, required_serial);

        let mut attempt = 0;
        loop {
            attempt += 1;
            let outcome = self.fetch_metadata_once(project, &url, required_serial).await;
            match outcome {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    warn!(
                        "Metadata fetch for {} attempt {} failed: {}, retrying",
                        project, attempt, e
                    );
                    Self::backoff(attempt).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn fetch_metadata_once(
        &self,
        project: &str,
        url: &str,
        required_serial: Option<u64>,
    ) -> Result<serde_json::Value> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::transport_error(project, e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(project, response.status()));
        }

        // Stale-cache detection: a CDN entry older than the changelog
        // promised must not enter the mirror.
        if let Some(expected) = required_serial {
            let got = response
                .headers()
                .get(SERIAL_HEADER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(0);
            if got < expected {
                return Err(Error::StaleMetadata {
                    package: project.to_string(),
                    expected,
                    got,
                });
            }
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(project, e))?;
        serde_json::from_slice(&bytes)
            .map_err(|e| Error::ParseError(format!("metadata for {project}: {e}")))
    }

    /// Enforce the simple v1 content type.
    ///
    /// The v1 API has no HTML fallback: an index answering with HTML (or
    /// anything else non-JSON) fails the project.
    fn check_simple_content_type(project: &str, content_type: &str) -> Result<()> {
        if content_type.starts_with(SIMPLE_JSON_ACCEPT) || content_type.contains("json") {
            Ok(())
        } else {
            Err(Error::ParseError(format!(
                "simple endpoint for {project} returned {content_type}, expected JSON"
            )))
        }
    }

    /// Fetch `/simple/<project>/` in the versioned JSON format.
    ///
    /// A non-JSON response is fatal for the project: there is no HTML
    /// fallback in the v1 API.
    pub async fn fetch_simple_json(&self, project: &str) -> Result<Vec<u8>> {
        let url = format!("{}/simple/{}/", self.url, project);
        let response = self
            .client
            .get(&url)
            .header("Accept", SIMPLE_JSON_ACCEPT)
            .send()
            .await
            .map_err(|e| Self::transport_error(project, e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(project, response.status()));
        }

        let content_type = response
            .headers()
            .get("Content-Type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        Self::check_simple_content_type(project, &content_type)?;

        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::transport_error(project, e))?;
        Ok(bytes.to_vec())
    }

    /// Rewrite an artifact URL onto the download mirror, keeping the path
    fn mirror_url(&self, url: &str) -> Option<String> {
        let base = self.download_mirror.as_ref()?;
        let parsed = Url::parse(url).ok()?;
        Some(format!("{}{}", base, parsed.path()))
    }

    /// Stream an artifact into `writer`, hashing progressively.
    ///
    /// The optional download mirror is tried first; unless `no-fallback`
    /// is set, the authoritative URL takes over on any mirror failure.
    /// The declared sha256 and size are enforced before the caller may
    /// commit the write, so a mismatch never reaches the canonical path.
    pub async fn stream_artifact(
        &self,
        url: &str,
        expected_sha256: &str,
        expected_size: u64,
        writer: &mut Box<dyn StreamingWrite>,
    ) -> Result<u64> {
        if let Some(mirror_url) = self.mirror_url(url) {
            match self
                .stream_artifact_from(&mirror_url, expected_sha256, expected_size, writer)
                .await
            {
                Ok(n) => return Ok(n),
                Err(e) if self.no_fallback => return Err(e),
                Err(e) => {
                    warn!(
                        "Download mirror failed for {} ({}), falling back to {}",
                        mirror_url, e, url
                    );
                }
            }
        }
        self.stream_artifact_from(url, expected_sha256, expected_size, writer)
            .await
    }

    async fn stream_artifact_from(
        &self,
        url: &str,
        expected_sha256: &str,
        expected_size: u64,
        writer: &mut Box<dyn StreamingWrite>,
    ) -> Result<u64> {
        debug!("Downloading {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Self::transport_error(url, e))?;

        if !response.status().is_success() {
            return Err(Self::status_error(url, response.status()));
        }

        let mut hasher = Hasher::new(DigestName::Sha256);
        let mut written: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Self::transport_error(url, e))?;
            hasher.update(&chunk);
            writer.write_chunk(&chunk).await?;
            written += chunk.len() as u64;
        }

        Self::check_artifact_integrity(url, expected_sha256, expected_size, written, hasher.finalize())?;
        Ok(written)
    }

    /// Enforce the declared size and sha256 after streaming completes.
    ///
    /// A declared size of 0 means upstream did not state one, so only
    /// the digest decides; a genuinely empty file passes both checks
    /// when its declared sha256 is the digest of zero bytes.
    fn check_artifact_integrity(
        url: &str,
        expected_sha256: &str,
        expected_size: u64,
        written: u64,
        actual_sha256: String,
    ) -> Result<()> {
        if expected_size > 0 && written != expected_size {
            return Err(Error::DownloadError(format!(
                "{url}: expected {expected_size} bytes, got {written}"
            )));
        }
        if actual_sha256 != expected_sha256.to_lowercase() {
            return Err(Error::ChecksumMismatch {
                expected: expected_sha256.to_string(),
                actual: actual_sha256,
            });
        }
        Ok(())
    }
}
