//! Serialized chat session.
//!
//! A [`ChatSession`] is a cheap handle to a task that exclusively owns the
//! conversation history and the live KV cache. Requests travel over an
//! unbounded FIFO queue and are handled one at a time, so call N+1 always
//! sees the committed effects of call N.
//!
//! An answer is produced in two phases: fragments are forwarded to the
//! [`AnswerStream`] as the adapter yields them, and only after the adapter
//! reports `Done` are history and cache replaced. Any failure, including the
//! consumer dropping the stream, leaves both untouched.
//!
//! The lifecycle phase is published on a `watch` channel, so it can be read
//! while a request is in flight.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Instant;

use futures::Stream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{Fingerprint, PromptCacheStore};
use crate::error::{FilechatError, Result};
use crate::kv::{CacheEntry, CachePrecision};
use crate::providers::{ModelAdapter, StreamEvent};

use super::history::ConversationHistory;
use super::model_session::PrefillResult;
use super::Turn;

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    /// Nothing processed yet.
    Idle,
    /// Context processed by the model but not yet persisted.
    Warmed,
    /// Context primed; questions can be asked.
    Ready,
    /// An answer is being generated.
    Generating,
}

impl std::fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SessionPhase::Idle => "idle",
            SessionPhase::Warmed => "warmed",
            SessionPhase::Ready => "ready",
            SessionPhase::Generating => "generating",
        };
        f.write_str(name)
    }
}

enum Command {
    Ask {
        question: String,
        reply: mpsc::UnboundedSender<Result<String>>,
    },
    Prefill {
        context: String,
        store: PromptCacheStore,
        precision: CachePrecision,
        reply: oneshot::Sender<Result<PrefillResult>>,
    },
    History {
        reply: oneshot::Sender<ConversationHistory>,
    },
    Cache {
        reply: oneshot::Sender<CacheEntry>,
    },
}

/// Fragments of one answer, in the order the model produced them.
///
/// Ends after the last fragment on success, or with a single `Err` item on
/// failure. Dropping it early cancels generation and discards the exchange.
#[must_use = "dropping the stream cancels the answer"]
pub struct AnswerStream {
    rx: mpsc::UnboundedReceiver<Result<String>>,
}

impl AnswerStream {
    /// Next fragment, or `None` once the answer is complete.
    pub async fn next_fragment(&mut self) -> Option<Result<String>> {
        self.rx.recv().await
    }

    /// Drain the stream into the full answer text.
    pub async fn collect_text(mut self) -> Result<String> {
        let mut answer = String::new();
        while let Some(fragment) = self.rx.recv().await {
            answer.push_str(&fragment?);
        }
        Ok(answer)
    }
}

impl Stream for AnswerStream {
    type Item = Result<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Handle to a running session actor. Clones share the same session.
#[derive(Clone)]
pub struct ChatSession {
    tx: mpsc::UnboundedSender<Command>,
    phase: watch::Receiver<SessionPhase>,
}

impl ChatSession {
    /// Start a session with an empty history. Must be called inside a tokio
    /// runtime.
    pub fn new(model: Arc<dyn ModelAdapter>) -> Self {
        Self::with_history(model, ConversationHistory::new())
    }

    /// Start a session seeded with `history` (e.g. a system instruction).
    pub fn with_history(model: Arc<dyn ModelAdapter>, history: ConversationHistory) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let (phase_tx, phase) = watch::channel(SessionPhase::Idle);
        let actor = SessionActor {
            model,
            history,
            cache: CacheEntry::default(),
            phase: phase_tx,
        };
        tokio::spawn(actor.run(rx));
        Self { tx, phase }
    }

    /// Queue `question` and return its answer stream.
    ///
    /// Questions are answered strictly in the order `ask` was called.
    pub fn ask(&self, question: impl Into<String>) -> AnswerStream {
        let (reply, rx) = mpsc::unbounded_channel();
        let command = Command::Ask {
            question: question.into(),
            reply,
        };
        if let Err(mpsc::error::SendError(Command::Ask { reply, .. })) = self.tx.send(command) {
            let _ = reply.send(Err(FilechatError::SessionClosed));
        }
        AnswerStream { rx }
    }

    /// Prime the session with `context`, reusing a persisted cache from
    /// `store` when one exists for this exact context and precision.
    pub async fn prefill(
        &self,
        context: impl Into<String>,
        store: PromptCacheStore,
        precision: CachePrecision,
    ) -> Result<PrefillResult> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Prefill {
            context: context.into(),
            store,
            precision,
            reply,
        })?;
        rx.await.map_err(|_| FilechatError::SessionClosed)?
    }

    /// Committed history as of every request queued before this one.
    pub async fn history(&self) -> Result<ConversationHistory> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::History { reply })?;
        rx.await.map_err(|_| FilechatError::SessionClosed)
    }

    /// Current phase, including `Generating` while an answer is in flight.
    pub fn phase(&self) -> SessionPhase {
        *self.phase.borrow()
    }

    /// Receiver that observes every phase change.
    pub fn subscribe_phase(&self) -> watch::Receiver<SessionPhase> {
        self.phase.clone()
    }

    /// Copy of the live cache.
    pub async fn cache_snapshot(&self) -> Result<CacheEntry> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Cache { reply })?;
        rx.await.map_err(|_| FilechatError::SessionClosed)
    }

    // -- private helpers --

    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| FilechatError::SessionClosed)
    }
}

struct SessionActor {
    model: Arc<dyn ModelAdapter>,
    history: ConversationHistory,
    cache: CacheEntry,
    phase: watch::Sender<SessionPhase>,
}

impl SessionActor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            match command {
                Command::Ask { question, reply } => self.handle_ask(question, reply).await,
                Command::Prefill {
                    context,
                    store,
                    precision,
                    reply,
                } => {
                    let result = self.handle_prefill(&context, &store, precision).await;
                    let _ = reply.send(result);
                }
                Command::History { reply } => {
                    let _ = reply.send(self.history.clone());
                }
                Command::Cache { reply } => {
                    let _ = reply.send(self.cache.clone());
                }
            }
        }
        debug!(turns = self.history.len(), "Chat session stopped");
    }

    fn set_phase(&self, phase: SessionPhase) {
        self.phase.send_replace(phase);
    }

    async fn handle_prefill(
        &mut self,
        context: &str,
        store: &PromptCacheStore,
        precision: CachePrecision,
    ) -> Result<PrefillResult> {
        let started = Instant::now();
        let fingerprint = Fingerprint::of(context);
        let cache_path = store.cache_path(&fingerprint, precision);

        if let Some(entry) = store.load(&fingerprint, precision).await {
            self.cache = entry;
            self.set_phase(SessionPhase::Ready);
            info!(
                fingerprint = %fingerprint.short(),
                positions = self.cache.offset(),
                "Prefill reused cached prompt"
            );
            return Ok(PrefillResult {
                used_cache: true,
                cache_path,
                elapsed: started.elapsed(),
            });
        }

        let warmed = self.model.warm(context).await?;
        self.cache = warmed;
        self.set_phase(SessionPhase::Warmed);
        debug!(
            fingerprint = %fingerprint.short(),
            positions = self.cache.offset(),
            "Context warmed"
        );

        let cache_path = store.persist(&self.cache, &fingerprint, precision).await?;
        self.set_phase(SessionPhase::Ready);
        info!(fingerprint = %fingerprint.short(), path = %cache_path.display(), "Prefill cached new prompt");

        Ok(PrefillResult {
            used_cache: false,
            cache_path,
            elapsed: started.elapsed(),
        })
    }

    async fn handle_ask(&mut self, question: String, out: mpsc::UnboundedSender<Result<String>>) {
        if out.is_closed() {
            debug!("Answer stream dropped before generation started");
            return;
        }

        let messages = self.history.messages_with(&question);
        let cancel = CancellationToken::new();
        let resume_phase = *self.phase.borrow();
        self.set_phase(SessionPhase::Generating);

        match self.stream_answer(messages, &cancel, &out).await {
            Ok((answer, cache)) => {
                self.history.record_exchange(&question, &answer);
                self.cache = cache;
                self.set_phase(SessionPhase::Ready);
                debug!(
                    turns = self.history.len(),
                    positions = self.cache.offset(),
                    "Answer committed"
                );
            }
            Err(e) => {
                cancel.cancel();
                self.set_phase(resume_phase);
                warn!(error = %e, "Answer rolled back");
                let _ = out.send(Err(e));
            }
        }
        // Dropping `out` here ends the consumer's stream after the commit.
    }

    async fn stream_answer(
        &self,
        messages: Vec<Turn>,
        cancel: &CancellationToken,
        out: &mpsc::UnboundedSender<Result<String>>,
    ) -> Result<(String, CacheEntry)> {
        let generation = self
            .model
            .generate(messages, self.cache.clone(), cancel.clone());
        let mut events = tokio::select! {
            biased;
            _ = out.closed() => return Err(FilechatError::Cancelled),
            events = generation => events?,
        };

        let mut answer = String::new();
        loop {
            let event = tokio::select! {
                biased;
                _ = out.closed() => return Err(FilechatError::Cancelled),
                event = events.recv() => event,
            };
            match event {
                Some(StreamEvent::Delta(fragment)) => {
                    answer.push_str(&fragment);
                    if out.send(Ok(fragment)).is_err() {
                        return Err(FilechatError::Cancelled);
                    }
                }
                Some(StreamEvent::Done { cache }) => return Ok((answer, cache)),
                Some(StreamEvent::Error(message)) => return Err(FilechatError::Model(message)),
                None => {
                    return Err(FilechatError::Model(
                        "generation ended without completing".into(),
                    ))
                }
            }
        }
    }
}
