//! Model adapters.
//!
//! A [`ModelAdapter`] is the only capability the chat session needs from a
//! language model: process a grounding context once into a KV cache, and
//! stream an answer for a conversation while extending that cache.

pub mod lexical;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::kv::CacheEntry;
use crate::session::Turn;

pub use lexical::LexicalModel;

/// Events emitted by an adapter while generating.
#[derive(Debug)]
pub enum StreamEvent {
    /// A text fragment, forwarded to the consumer as soon as it arrives.
    Delta(String),
    /// Generation finished; carries the cache extended with the new turn.
    Done { cache: CacheEntry },
    /// Generation failed mid-stream.
    Error(String),
}

/// Black-box model capability used by [`crate::session::ChatSession`].
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ModelAdapter: Send + Sync {
    /// Human-readable adapter name, for logs.
    fn name(&self) -> &str;

    /// Run one full pass over `context` with a fresh cache, discarding any
    /// generated text, and return the resulting cache.
    async fn warm(&self, context: &str) -> Result<CacheEntry>;

    /// Start generating a reply to `messages` on top of `cache`.
    ///
    /// An empty `cache` means nothing has been processed yet and the adapter
    /// allocates its own. The returned receiver yields zero or more
    /// [`StreamEvent::Delta`]s followed by exactly one `Done` or `Error`.
    /// Adapters stop work once `cancel` fires or the receiver is dropped.
    async fn generate(
        &self,
        messages: Vec<Turn>,
        cache: CacheEntry,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}
