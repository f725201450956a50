//! Content-addressed commit identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{Result, ZeropointError};

/// Identifier of an immutable snapshot-advancing write.
///
/// Always the full lowercase hex SHA-256 of the commit object. Callers are
/// handed [`CommitId::short`] and may pass any unambiguous prefix back.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommitId(String);

impl CommitId {
    /// Length of the short form handed to callers.
    pub const SHORT_LEN: usize = 10;

    /// Shortest prefix accepted when resolving a commit.
    pub const MIN_PREFIX_LEN: usize = 7;

    /// Hash `bytes` into a commit id.
    pub fn of(bytes: &[u8]) -> Self {
        CommitId(content_hash(bytes))
    }

    /// Parse a full hex id.
    pub fn parse(hex: &str) -> Result<Self> {
        let hex = hex.trim();
        if hex.len() != 64 || !is_lower_hex(hex) {
            return Err(ZeropointError::storage(format!("malformed commit id: {hex:?}")));
        }
        Ok(CommitId(hex.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The short identifier returned to callers as an "intent id".
    pub fn short(&self) -> &str {
        &self.0[..Self::SHORT_LEN]
    }

    /// Check whether `prefix` names this commit.
    pub fn matches(&self, prefix: &str) -> bool {
        let prefix = prefix.trim().to_ascii_lowercase();
        prefix.len() >= Self::MIN_PREFIX_LEN && self.0.starts_with(&prefix)
    }
}

impl fmt::Display for CommitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

fn is_lower_hex(s: &str) -> bool {
    s.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
}
