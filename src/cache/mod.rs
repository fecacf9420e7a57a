//! Content-addressed prompt-cache persistence.

pub mod container;
pub mod fingerprint;
pub mod prompt_cache;

pub use fingerprint::Fingerprint;
pub use prompt_cache::{CacheKey, CachedPrompt, PromptCacheStore};
