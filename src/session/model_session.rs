//! A chat session bound to a model's prompt-cache store.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::PromptCacheStore;
use crate::error::Result;
use crate::kv::CachePrecision;
use crate::providers::ModelAdapter;

use super::chat::{AnswerStream, ChatSession};
use super::history::ConversationHistory;

/// How the grounding context was primed.
#[derive(Debug, Clone, PartialEq)]
pub struct PrefillResult {
    /// `true` when a persisted cache was loaded instead of warming the model.
    pub used_cache: bool,
    /// Cache file location, reported on both branches.
    pub cache_path: PathBuf,
    pub elapsed: Duration,
}

impl PrefillResult {
    pub fn elapsed_secs(&self) -> f64 {
        self.elapsed.as_secs_f64()
    }

    /// One-line report, e.g. `Reused cached prompt in 0.12 seconds at /path`.
    pub fn summary(&self) -> String {
        let action = if self.used_cache {
            "Reused cached prompt"
        } else {
            "Cached new prompt"
        };
        format!(
            "{action} in {:.2} seconds at {}",
            self.elapsed_secs(),
            self.cache_path.display()
        )
    }
}

/// The object the binary drives: prime once, then ask repeatedly.
#[derive(Clone)]
pub struct ModelSession {
    session: ChatSession,
    store: PromptCacheStore,
    precision: CachePrecision,
}

impl ModelSession {
    pub fn new(
        model: Arc<dyn ModelAdapter>,
        store: PromptCacheStore,
        precision: CachePrecision,
    ) -> Self {
        Self {
            session: ChatSession::new(model),
            store,
            precision,
        }
    }

    /// Same as [`ModelSession::new`] but starting from `history`.
    pub fn with_history(
        model: Arc<dyn ModelAdapter>,
        store: PromptCacheStore,
        precision: CachePrecision,
        history: ConversationHistory,
    ) -> Self {
        Self {
            session: ChatSession::with_history(model, history),
            store,
            precision,
        }
    }

    /// Load the cache for `context` or warm the model and persist it.
    ///
    /// A warm failure leaves the session idle. A persist failure is returned
    /// but the warmed cache stays live, so questions still work.
    pub async fn prefill_and_persist(&self, context: &str) -> Result<PrefillResult> {
        self.session
            .prefill(context, self.store.clone(), self.precision)
            .await
    }

    pub fn ask(&self, question: impl Into<String>) -> AnswerStream {
        self.session.ask(question)
    }

    pub fn session(&self) -> &ChatSession {
        &self.session
    }

    pub fn store(&self) -> &PromptCacheStore {
        &self.store
    }

    pub fn precision(&self) -> CachePrecision {
        self.precision
    }
}
