//! Per-layer attention cache records and the whole-model [`CacheEntry`].

use crate::error::Result;

use super::tensor::{QuantizedTensor, Tensor};

/// Representation tag of a single layer, without its data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LayerKind {
    Dense,
    Chunked { chunk_size: usize },
    Quantized { group_size: usize, bits: u8 },
}

impl std::fmt::Display for LayerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dense => f.write_str("dense"),
            Self::Chunked { chunk_size } => write!(f, "chunked({chunk_size})"),
            Self::Quantized { group_size, bits } => write!(f, "quantized({bits}bit/g{group_size})"),
        }
    }
}

/// Saved keys and values for one attention layer.
///
/// `start_position` is the absolute position of the first stored row, so
/// `offset()` keeps counting positions a ring has already evicted.
#[derive(Debug, Clone, PartialEq)]
pub enum LayerCache {
    /// Full precision, grows without bound.
    Dense {
        keys: Tensor,
        values: Tensor,
        start_position: usize,
    },
    /// Full precision, keeps only the most recent `chunk_size` positions.
    Chunked {
        keys: Tensor,
        values: Tensor,
        chunk_size: usize,
        start_position: usize,
    },
    /// Group-quantized keys and values.
    Quantized {
        keys: QuantizedTensor,
        values: QuantizedTensor,
        start_position: usize,
    },
}

impl LayerCache {
    /// An empty dense layer of the given width.
    pub fn dense(width: usize) -> Self {
        Self::Dense {
            keys: Tensor::empty(width),
            values: Tensor::empty(width),
            start_position: 0,
        }
    }

    /// An empty ring layer holding at most `chunk_size` positions.
    pub fn chunked(width: usize, chunk_size: usize) -> Self {
        Self::Chunked {
            keys: Tensor::empty(width),
            values: Tensor::empty(width),
            chunk_size: chunk_size.max(1),
            start_position: 0,
        }
    }

    pub fn kind(&self) -> LayerKind {
        match self {
            Self::Dense { .. } => LayerKind::Dense,
            Self::Chunked { chunk_size, .. } => LayerKind::Chunked {
                chunk_size: *chunk_size,
            },
            Self::Quantized { keys, .. } => LayerKind::Quantized {
                group_size: keys.group_size(),
                bits: keys.bits(),
            },
        }
    }

    /// Number of positions currently stored.
    pub fn stored_len(&self) -> usize {
        match self {
            Self::Dense { keys, .. } | Self::Chunked { keys, .. } => keys.rows(),
            Self::Quantized { keys, .. } => keys.rows(),
        }
    }

    /// Total number of positions this layer has processed.
    pub fn offset(&self) -> usize {
        match self {
            Self::Dense { start_position, .. }
            | Self::Chunked { start_position, .. }
            | Self::Quantized { start_position, .. } => start_position + self.stored_len(),
        }
    }

    /// Append new key/value rows, evicting from the front of a ring when full.
    pub fn append(&mut self, new_keys: &Tensor, new_values: &Tensor) -> Result<()> {
        match self {
            Self::Dense { keys, values, .. } => {
                keys.append(new_keys)?;
                values.append(new_values)?;
            }
            Self::Chunked {
                keys,
                values,
                chunk_size,
                start_position,
            } => {
                keys.append(new_keys)?;
                values.append(new_values)?;
                let overflow = keys.rows().saturating_sub(*chunk_size);
                keys.drop_front(overflow);
                values.drop_front(overflow);
                *start_position += overflow;
            }
            Self::Quantized { keys, values, .. } => {
                let (group_size, bits) = (keys.group_size(), keys.bits());
                keys.append(&new_keys.quantize(group_size, bits))?;
                values.append(&new_values.quantize(group_size, bits))?;
            }
        }
        Ok(())
    }

    /// Quantize a full-precision layer. A quantized layer is expanded first.
    pub fn to_quantized(&self, group_size: usize, bits: u8) -> Self {
        match self {
            Self::Dense {
                keys,
                values,
                start_position,
            }
            | Self::Chunked {
                keys,
                values,
                start_position,
                ..
            } => Self::Quantized {
                keys: keys.quantize(group_size, bits),
                values: values.quantize(group_size, bits),
                start_position: *start_position,
            },
            Self::Quantized { .. } => self.to_dense().to_quantized(group_size, bits),
        }
    }

    /// Expand a quantized layer to a dense one; full-precision layers are cloned.
    pub fn to_dense(&self) -> Self {
        match self {
            Self::Quantized {
                keys,
                values,
                start_position,
            } => Self::Dense {
                keys: keys.dequantize(),
                values: values.dequantize(),
                start_position: *start_position,
            },
            Self::Dense { .. } | Self::Chunked { .. } => self.clone(),
        }
    }

    pub fn memory_bytes(&self) -> usize {
        match self {
            Self::Dense { keys, values, .. } | Self::Chunked { keys, values, .. } => {
                keys.memory_bytes() + values.memory_bytes()
            }
            Self::Quantized { keys, values, .. } => keys.memory_bytes() + values.memory_bytes(),
        }
    }
}

/// The attention state of every layer of a model.
///
/// An empty entry means no context has been processed yet.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CacheEntry {
    layers: Vec<LayerCache>,
}

impl CacheEntry {
    pub fn new(layers: Vec<LayerCache>) -> Self {
        Self { layers }
    }

    pub fn layers(&self) -> &[LayerCache] {
        &self.layers
    }

    pub fn layers_mut(&mut self) -> &mut [LayerCache] {
        &mut self.layers
    }

    pub fn into_layers(self) -> Vec<LayerCache> {
        self.layers
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn num_layers(&self) -> usize {
        self.layers.len()
    }

    /// Positions processed, as reported by the first layer.
    pub fn offset(&self) -> usize {
        self.layers.first().map(LayerCache::offset).unwrap_or(0)
    }

    pub fn memory_bytes(&self) -> usize {
        self.layers.iter().map(LayerCache::memory_bytes).sum()
    }
}
