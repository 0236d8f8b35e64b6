// src/hash.rs

//! Digest computation for release file integrity
//!
//! The mirror deals in exactly two digests: SHA-256, which upstream declares
//! for every release file and which derives the content-addressed storage
//! path, and MD5, which older tooling may request as the anchor fragment in
//! index pages. `DigestName` selects which one an index document advertises;
//! verification of downloaded bytes is always SHA-256.

use md5::Md5;
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Digest selection for index generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DigestName {
    /// SHA-256, required on every upstream release file
    #[default]
    Sha256,
    /// MD5, optional upstream, kept for legacy installers
    Md5,
}

impl DigestName {
    /// Hex string length of this digest
    #[inline]
    pub const fn hex_len(&self) -> usize {
        match self {
            Self::Sha256 => 64,
            Self::Md5 => 32,
        }
    }

    /// Name as it appears in config and in URL anchor fragments
    #[inline]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Sha256 => "sha256",
            Self::Md5 => "md5",
        }
    }
}

impl fmt::Display for DigestName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for DigestName {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sha256" | "sha-256" => Ok(Self::Sha256),
            "md5" => Ok(Self::Md5),
            _ => Err(format!("unknown digest name: {s}")),
        }
    }
}

/// Incremental hasher over the selected digest
///
/// Used for progressive hashing while streaming downloads, so a file is
/// never read twice to learn its digest.
pub struct Hasher {
    state: HasherState,
}

enum HasherState {
    Sha256(Sha256),
    Md5(Md5),
}

impl Hasher {
    pub fn new(digest: DigestName) -> Self {
        let state = match digest {
            DigestName::Sha256 => HasherState::Sha256(Sha256::new()),
            DigestName::Md5 => HasherState::Md5(Md5::new()),
        };
        Self { state }
    }

    pub fn update(&mut self, data: &[u8]) {
        match &mut self.state {
            HasherState::Sha256(h) => h.update(data),
            HasherState::Md5(h) => h.update(data),
        }
    }

    /// Finalize and return the lowercase hex digest
    pub fn finalize(self) -> String {
        match self.state {
            HasherState::Sha256(h) => format!("{:x}", h.finalize()),
            HasherState::Md5(h) => format!("{:x}", h.finalize()),
        }
    }
}

/// Compute the digest of a byte slice
pub fn hash_bytes(digest: DigestName, data: &[u8]) -> String {
    let mut hasher = Hasher::new(digest);
    hasher.update(data);
    hasher.finalize()
}

/// Compute the digest of data from a reader, streaming in 64 KiB chunks
pub fn hash_reader<R: Read>(digest: DigestName, reader: &mut R) -> io::Result<String> {
    let mut hasher = Hasher::new(digest);
    let mut buffer = [0u8; 64 * 1024];

    loop {
        let n = reader.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hasher.finalize())
}

/// Compute SHA-256 of a byte slice (convenience)
#[inline]
pub fn sha256(data: &[u8]) -> String {
    hash_bytes(DigestName::Sha256, data)
}

/// Checksum mismatch details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyError {
    pub expected: String,
    pub actual: String,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "expected {}, got {}", self.expected, self.actual)
    }
}

impl std::error::Error for VerifyError {}

/// Verify bytes match an expected SHA-256 digest
pub fn verify_sha256(data: &[u8], expected: &str) -> std::result::Result<(), VerifyError> {
    let actual = sha256(data);
    if actual == expected.to_lowercase() {
        Ok(())
    } else {
        Err(VerifyError {
            expected: expected.to_string(),
            actual,
        })
    }
}
