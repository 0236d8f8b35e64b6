// src/lib.rs

//! wheelhouse - PyPI mirror replicator
//!
//! One-way, idempotent replication of a Python package index onto local
//! storage, so a downstream fleet can resolve and install packages
//! without contacting the upstream index.
//!
//! # Architecture
//!
//! - Serial cursor: the upstream changelog serial is the single source of
//!   progress; `status` only advances after a fully successful run
//! - Content-addressed artifacts: release files live under their sha256
//!   path and are published by atomic rename, never mutated in place
//! - Filter registry: allow/deny lists, size caps, regex, PEP 440
//!   specifiers, latest-N and platform exclusion narrow the mirror
//! - Bounded worker pool: per-project pipelines with at-most-one writer
//!   per project and resumable crash recovery through the todo file

pub mod config;
mod error;
pub mod filters;
pub mod hash;
pub mod mirror;
pub mod model;
pub mod package;
pub mod pool;
pub mod progress;
pub mod simple;
pub mod storage;
pub mod upstream;
pub mod verify;
pub mod version;

pub use config::MirrorConfig;
pub use error::{Error, Result};
pub use hash::DigestName;
pub use mirror::{Mirror, RunSummary, CURRENT_GENERATION};
pub use model::{normalize, Digests, ProjectMetadata, Release, ReleaseFile};
pub use package::{PackageSync, SyncContext, SyncOutcome};
pub use pool::{DrainReport, WorkerPool};
pub use simple::SimpleApi;
pub use storage::{FilesystemBackend, MirrorLock, StorageBackend};
pub use upstream::UpstreamClient;
pub use verify::{verify_mirror, VerifyOptions, VerifyReport};
pub use version::{Specifier, SpecifierSet, Version};
