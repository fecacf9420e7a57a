//! # filechat
//!
//! Chat with a fixed set of local documents without re-processing them on
//! every run. The grounding prompt is processed once into a KV cache, stored
//! on disk under a SHA-256 fingerprint of the exact prompt bytes, and reused
//! by later runs with the same documents.
//!
//! ## Modules
//!
//! - [`kv`]: tensors, group quantization, per-layer cache records and the
//!   precision transform
//! - [`cache`]: fingerprints, the on-disk container and [`PromptCacheStore`]
//! - [`session`]: conversation history and the serialized [`ChatSession`]
//! - [`providers`]: the [`ModelAdapter`] seam and the built-in offline model
//! - [`documents`] and [`prompt`]: turning files into the grounding context
//! - [`config`]: settings file and environment overrides

pub mod cache;
pub mod config;
pub mod documents;
pub mod error;
pub mod kv;
pub mod prompt;
pub mod providers;
pub mod session;
pub mod utils;

pub use cache::{Fingerprint, PromptCacheStore};
pub use config::Config;
pub use error::{FilechatError, Result};
pub use kv::{CacheEntry, CachePrecision, LayerCache};
pub use providers::{LexicalModel, ModelAdapter, StreamEvent};
pub use session::{
    AnswerStream, ChatSession, ConversationHistory, ModelSession, PrefillResult, SessionPhase,
    Turn,
};
