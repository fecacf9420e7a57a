//! Offline extractive model.
//!
//! `LexicalModel` needs no ML runtime: it answers with the corpus sentences
//! that share the most terms with the question and streams them word by
//! word. Its KV cache is real in shape, one row per whitespace token per
//! layer, filled with hashed token features, so warm-up, persistence and
//! precision conversion behave exactly as with a neural backend.

use std::collections::HashSet;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::kv::{CacheEntry, LayerCache, Tensor};
use crate::session::Turn;

use super::{ModelAdapter, StreamEvent};

const DEFAULT_LAYERS: usize = 4;
const DEFAULT_WIDTH: usize = 64;
const DEFAULT_MAX_SENTENCES: usize = 2;
const STREAM_BUFFER: usize = 32;

const FALLBACK_ANSWER: &str = "I don't know based on the provided documents.";

const STOPWORDS: &[&str] = &[
    "the", "and", "are", "for", "from", "has", "have", "how", "into", "its", "not", "that",
    "their", "there", "this", "was", "were", "what", "when", "where", "which", "who", "why", "with",
    "does", "did", "you", "about",
];

/// Deterministic retrieval-based stand-in for a language model.
#[derive(Debug, Clone)]
pub struct LexicalModel {
    sentences: Vec<String>,
    num_layers: usize,
    width: usize,
    chunk_window: Option<usize>,
    max_sentences: usize,
}

impl LexicalModel {
    /// Index `documents` (the raw document text, without instructions).
    pub fn new(documents: &str) -> Self {
        Self {
            sentences: split_sentences(documents),
            num_layers: DEFAULT_LAYERS,
            width: DEFAULT_WIDTH,
            chunk_window: None,
            max_sentences: DEFAULT_MAX_SENTENCES,
        }
    }

    /// Override cache geometry. Both values are clamped to at least 1.
    pub fn with_geometry(mut self, num_layers: usize, width: usize) -> Self {
        self.num_layers = num_layers.max(1);
        self.width = width.max(1);
        self
    }

    /// Keep layer 0 as a ring of the most recent `window` positions.
    pub fn with_chunk_window(mut self, window: Option<usize>) -> Self {
        self.chunk_window = window.filter(|w| *w > 0);
        self
    }

    pub fn with_max_sentences(mut self, max: usize) -> Self {
        self.max_sentences = max.max(1);
        self
    }

    pub fn sentence_count(&self) -> usize {
        self.sentences.len()
    }

    fn new_cache(&self) -> CacheEntry {
        let layers = (0..self.num_layers)
            .map(|layer| match (layer, self.chunk_window) {
                (0, Some(window)) => LayerCache::chunked(self.width, window),
                _ => LayerCache::dense(self.width),
            })
            .collect();
        CacheEntry::new(layers)
    }

    /// Append one row per token of `text` to every layer.
    fn process(&self, cache: &mut CacheEntry, text: &str) -> Result<()> {
        let tokens: Vec<&str> = text.split_whitespace().collect();
        if tokens.is_empty() {
            return Ok(());
        }
        for (layer_idx, layer) in cache.layers_mut().iter_mut().enumerate() {
            let width = match layer {
                LayerCache::Dense { keys, .. } | LayerCache::Chunked { keys, .. } => keys.cols(),
                LayerCache::Quantized { keys, .. } => keys.cols(),
            };
            let keys = token_features(&tokens, layer_idx as u64, width, 0x6b);
            let values = token_features(&tokens, layer_idx as u64, width, 0x76);
            layer.append(&keys, &values)?;
        }
        Ok(())
    }

    /// Pick the best-matching sentences, in document order.
    fn answer(&self, question: &str) -> String {
        let query = terms(question);
        if query.is_empty() {
            return FALLBACK_ANSWER.to_string();
        }

        let mut scored: Vec<(usize, usize)> = self
            .sentences
            .iter()
            .enumerate()
            .filter_map(|(idx, sentence)| {
                let score = terms(sentence).intersection(&query).count();
                (score > 0).then_some((idx, score))
            })
            .collect();
        if scored.is_empty() {
            return FALLBACK_ANSWER.to_string();
        }

        scored.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        scored.truncate(self.max_sentences);
        scored.sort_by_key(|(idx, _)| *idx);
        scored
            .iter()
            .map(|(idx, _)| self.sentences[*idx].as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl ModelAdapter for LexicalModel {
    fn name(&self) -> &str {
        "lexical"
    }

    async fn warm(&self, context: &str) -> Result<CacheEntry> {
        let mut cache = self.new_cache();
        self.process(&mut cache, context)?;
        debug!(positions = cache.offset(), "Lexical model warmed");
        Ok(cache)
    }

    async fn generate(
        &self,
        messages: Vec<Turn>,
        cache: CacheEntry,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let model = self.clone();

        tokio::spawn(async move {
            let mut cache = if cache.is_empty() {
                model.new_cache()
            } else {
                cache
            };
            let question = match messages.last() {
                Some(Turn::User(text)) => text.clone(),
                _ => String::new(),
            };
            if let Err(e) = model.process(&mut cache, &question) {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }

            let answer = model.answer(&question);
            for fragment in answer.split_inclusive(' ') {
                if cancel.is_cancelled() {
                    debug!("Lexical generation cancelled");
                    return;
                }
                if tx.send(StreamEvent::Delta(fragment.to_string())).await.is_err() {
                    return;
                }
                tokio::task::yield_now().await;
            }

            if let Err(e) = model.process(&mut cache, &answer) {
                let _ = tx.send(StreamEvent::Error(e.to_string())).await;
                return;
            }
            let _ = tx.send(StreamEvent::Done { cache }).await;
        });

        Ok(rx)
    }
}

fn split_sentences(text: &str) -> Vec<String> {
    text.lines()
        .filter(|line| !line.trim_start().starts_with("[File:"))
        .flat_map(|line| line.split(['.', '!', '?']))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| format!("{s}."))
        .collect()
}

fn terms(text: &str) -> HashSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() > 2 || (!w.is_empty() && w.chars().all(|c| c.is_ascii_digit())))
        .map(str::to_lowercase)
        .filter(|w| !STOPWORDS.contains(&w.as_str()))
        .collect()
}

/// FNV-1a, stable across runs and platforms.
fn fnv1a(bytes: &[u8], seed: u64) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64 ^ seed;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

fn token_features(tokens: &[&str], layer: u64, width: usize, salt: u64) -> Tensor {
    let mut values = Vec::with_capacity(tokens.len() * width);
    for token in tokens {
        let base = fnv1a(token.as_bytes(), layer.wrapping_mul(31) ^ salt);
        for j in 0..width {
            let bits = base.rotate_left((j % 64) as u32) ^ (j as u64).wrapping_mul(0x9e37_79b9);
            values.push((bits & 0xffff) as f32 / 32_767.5 - 1.0);
        }
    }
    // Length always matches `tokens.len() * width`.
    Tensor::from_f32(tokens.len(), width, &values).unwrap_or_else(|_| Tensor::empty(width))
}
