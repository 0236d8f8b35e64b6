// tests/common/mod.rs

//! Shared test utilities for integration tests.

use std::path::Path;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use wheelhouse::config::MirrorConfig;
use wheelhouse::filters::FilterChain;
use wheelhouse::package::SyncContext;
use wheelhouse::simple::SimpleApi;
use wheelhouse::storage::{FilesystemBackend, StorageBackend};
use wheelhouse::upstream::UpstreamClient;

/// Literal sha256 of the peerme wheel used across fixtures
pub const PEERME_SHA256: &str =
    "bc9430dae93f8bc53728773545cbb646a6b5327f98de31bdd6e1a2b2c6e805a9";

/// The wheel's canonical path below `web/`
pub const PEERME_PATH: &str = "packages/8f/1a/1aa000db9c5a799b676227e845d2b64fe725328e05e3d3b30036f50eb316/peerme-1.0.0-py36-none-any.whl";

/// Mirror configuration over a temp directory
pub fn test_config(dir: &Path, extra: &str) -> MirrorConfig {
    MirrorConfig::from_str(&format!(
        "[mirror]\ndirectory = {}\nmaster = https://pypi.org\n{extra}",
        dir.display()
    ))
    .unwrap()
}

/// A full sync context bound to a temp mirror directory.
///
/// The upstream client is constructed but never contacted by these
/// tests; everything operates against the local tree.
pub fn build_context(dir: &Path, extra: &str) -> Arc<SyncContext> {
    let config = test_config(dir, extra);
    let storage: Arc<dyn StorageBackend> = Arc::new(FilesystemBackend::new());
    let client = UpstreamClient::from_config(&config).unwrap();
    let filters = FilterChain::from_config(&config).unwrap();
    let simple = SimpleApi::from_config(storage.clone(), &config);
    Arc::new(SyncContext {
        config,
        storage,
        client,
        filters,
        simple,
        cancel: CancellationToken::new(),
    })
}

/// Warehouse metadata document for the peerme fixture project
pub fn peerme_metadata() -> serde_json::Value {
    serde_json::json!({
        "info": {
            "name": "peerme",
            "version": "1.0.0",
            "classifiers": ["Programming Language :: Python :: 3.6"],
            "requires_python": ">=3.6"
        },
        "last_serial": 4242,
        "releases": {
            "1.0.0": [{
                "url": format!("https://files.pythonhosted.org/{PEERME_PATH}"),
                "filename": "peerme-1.0.0-py36-none-any.whl",
                "packagetype": "bdist_wheel",
                "requires_python": ">=3.6",
                "size": 11,
                "digests": {"sha256": PEERME_SHA256},
                "upload_time_iso_8601": "2018-05-17T03:21:26.612000Z",
                "yanked": false
            }],
            "0.9.0": [{
                "url": "https://files.pythonhosted.org/packages/ab/cd/ef00112233445566778899aabbccddeeff00112233445566778899aabbcc/peerme-0.9.0.tar.gz",
                "filename": "peerme-0.9.0.tar.gz",
                "packagetype": "sdist",
                "size": 7,
                "digests": {"sha256": "ab00000000000000000000000000000000000000000000000000000000000000"},
                "upload_time_iso_8601": "2018-01-02T00:00:00.000000Z",
                "yanked": false
            }]
        }
    })
}
