//! Content fingerprints for grounding contexts.

use sha2::{Digest, Sha256};

use crate::error::{FilechatError, Result};

/// SHA-256 digest of the exact UTF-8 bytes of a document context.
///
/// Any change to document text, file order, or instructions yields a new
/// fingerprint, so a stale prompt cache is never looked up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint([u8; 32]);

impl Fingerprint {
    pub fn of(context: &str) -> Self {
        Self::of_bytes(context.as_bytes())
    }

    pub fn of_bytes(bytes: &[u8]) -> Self {
        let digest = Sha256::digest(bytes);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Self(out)
    }

    /// Parse a 64-character lowercase or uppercase hex string.
    pub fn from_hex(raw: &str) -> Result<Self> {
        let bytes = hex::decode(raw)
            .map_err(|e| FilechatError::CacheFormat(format!("invalid fingerprint hex: {e}")))?;
        let arr: [u8; 32] = bytes.try_into().map_err(|b: Vec<u8>| {
            FilechatError::CacheFormat(format!("fingerprint must be 32 bytes, got {}", b.len()))
        })?;
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// First 8 hex characters, for log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}
