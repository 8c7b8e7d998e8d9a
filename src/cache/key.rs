//! Content-fingerprint cache keys

use crate::error::{StashError, StashResult};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::io::{self, Read};
use std::str::FromStr;

/// Longest key accepted, keeps every key usable as a file name
const MAX_KEY_LEN: usize = 128;

/// Lowercase hex fingerprint identifying one cache entry
///
/// Keys are used verbatim as file names by the directory engine and as
/// primary keys by the database engines, so only `[0-9a-f]` is accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CacheKey(String);

impl CacheKey {
    /// Validate and wrap a hash string produced by the caller
    pub fn new(hash: impl Into<String>) -> StashResult<Self> {
        let hash = hash.into();
        let invalid = |reason: &str| StashError::InvalidKey {
            key: hash.clone(),
            reason: reason.to_string(),
        };

        if hash.is_empty() {
            return Err(invalid("key is empty"));
        }
        if hash.len() > MAX_KEY_LEN {
            return Err(invalid("key is longer than 128 characters"));
        }
        if !hash.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f')) {
            return Err(invalid("key must be lowercase hexadecimal"));
        }

        Ok(Self(hash))
    }

    /// SHA256 of the given content
    pub fn digest(content: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self(hex::encode(hasher.finalize()))
    }

    /// SHA256 of everything `reader` yields
    pub fn digest_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// The hash string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for CacheKey {
    type Err = StashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for CacheKey {
    type Error = StashError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<CacheKey> for String {
    fn from(key: CacheKey) -> Self {
        key.0
    }
}
