//! Path-safe names for user-supplied identifiers.
//!
//! Model identifiers look like `org/name-4bit`. They become nested cache
//! directories, so every component is cleaned before it touches the
//! filesystem: characters outside `[A-Za-z0-9._-]` become `_`, and empty,
//! `.` and `..` components are dropped so a hostile ID cannot escape the
//! cache root. When cleaning changed anything, the last component gets an
//! `@<sha256 prefix>` suffix of the raw ID so distinct IDs never share a
//! directory.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

/// Hex characters of the raw-ID digest appended to altered names.
const ID_HASH_LEN: usize = 16;

/// Replace characters that are unsafe in a single path component.
pub fn sanitize_component(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Turn a model identifier into a relative directory path.
///
/// Clean IDs map to themselves; anything else is suffixed with a digest of
/// the raw ID, so the mapping is injective.
pub fn model_dir(model_id: &str) -> PathBuf {
    let mut parts: Vec<String> = model_id
        .split(['/', '\\'])
        .map(str::trim)
        .filter(|part| !part.is_empty() && *part != "." && *part != "..")
        .map(sanitize_component)
        .collect();
    if parts.is_empty() {
        parts.push("default".to_string());
    }

    if parts.join("/") != model_id {
        let digest = hex::encode(Sha256::digest(model_id.as_bytes()));
        if let Some(last) = parts.last_mut() {
            last.push('@');
            last.push_str(&digest[..ID_HASH_LEN]);
        }
    }
    parts.iter().collect()
}
