//! Target precision for persisted prompt caches and the per-layer
//! conversion applied before a cache is written.
//!
//! | current               | `ReducedBit`              | `HalfPrecision`    |
//! |-----------------------|---------------------------|--------------------|
//! | Dense / Chunked       | quantize (g64, 8 bit)     | unchanged          |
//! | Quantized, 8 bit      | unchanged                 | dequantize → Dense |
//! | Quantized, other bits | dequantize → quantize (8) | dequantize → Dense |

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{FilechatError, Result};

use super::layer::{CacheEntry, LayerCache, LayerKind};

/// Group size used for every reduced-bit conversion.
pub const QUANT_GROUP_SIZE: usize = 64;

/// Bit width used for every reduced-bit conversion.
pub const QUANT_BITS: u8 = 8;

/// Precision a prompt cache is persisted at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CachePrecision {
    /// 8-bit group-quantized keys and values.
    #[default]
    #[serde(rename = "8bit")]
    ReducedBit,
    /// bfloat16 keys and values.
    #[serde(rename = "bf16")]
    HalfPrecision,
}

impl CachePrecision {
    /// Fixed tag used in cache file names.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::ReducedBit => "8bit",
            Self::HalfPrecision => "bf16",
        }
    }

    /// Whether `kind` is already in the form this precision persists.
    pub fn accepts(&self, kind: LayerKind) -> bool {
        match (self, kind) {
            (Self::ReducedBit, LayerKind::Quantized { bits, group_size }) => {
                bits == QUANT_BITS && group_size > 0
            }
            (Self::ReducedBit, _) => false,
            (Self::HalfPrecision, LayerKind::Quantized { .. }) => false,
            (Self::HalfPrecision, LayerKind::Dense | LayerKind::Chunked { .. }) => true,
        }
    }

    /// Convert one layer to this precision.
    pub fn convert_layer(&self, layer: &LayerCache) -> LayerCache {
        match (self, layer) {
            (Self::ReducedBit, LayerCache::Dense { .. } | LayerCache::Chunked { .. }) => {
                layer.to_quantized(QUANT_GROUP_SIZE, QUANT_BITS)
            }
            (Self::ReducedBit, LayerCache::Quantized { keys, values, .. }) => {
                if keys.bits() == QUANT_BITS && values.bits() == QUANT_BITS {
                    layer.clone()
                } else {
                    layer.to_dense().to_quantized(QUANT_GROUP_SIZE, QUANT_BITS)
                }
            }
            (Self::HalfPrecision, LayerCache::Quantized { .. }) => layer.to_dense(),
            (Self::HalfPrecision, LayerCache::Dense { .. } | LayerCache::Chunked { .. }) => {
                layer.clone()
            }
        }
    }

    /// Convert every layer of `entry` independently.
    pub fn convert(&self, entry: &CacheEntry) -> CacheEntry {
        CacheEntry::new(
            entry
                .layers()
                .iter()
                .map(|layer| self.convert_layer(layer))
                .collect(),
        )
    }

    /// Whether every layer of `entry` is already in this precision's form.
    pub fn conforms(&self, entry: &CacheEntry) -> bool {
        entry.layers().iter().all(|layer| self.accepts(layer.kind()))
    }
}

impl std::fmt::Display for CachePrecision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.tag())
    }
}

impl FromStr for CachePrecision {
    type Err = FilechatError;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "8" | "8bit" | "int8" => Ok(Self::ReducedBit),
            "bf16" | "bfloat16" | "16" => Ok(Self::HalfPrecision),
            _ => Err(FilechatError::Config(format!(
                "Invalid cache precision '{raw}'. Use 8bit or bf16."
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::tensor::Tensor;

    fn filled(kind: &str) -> LayerCache {
        let values: Vec<f32> = (0..3 * 96).map(|i| ((i * 7) % 31) as f32 * 0.1).collect();
        let t = Tensor::from_f32(3, 96, &values).unwrap();
        let mut layer = match kind {
            "chunked" => LayerCache::chunked(96, 16),
            _ => LayerCache::dense(96),
        };
        layer.append(&t, &t).unwrap();
        match kind {
            "q4" => layer.to_quantized(32, 4),
            "q8" => layer.to_quantized(64, 8),
            _ => layer,
        }
    }

    #[test]
    fn test_tags() {
        assert_eq!(CachePrecision::ReducedBit.tag(), "8bit");
        assert_eq!(CachePrecision::HalfPrecision.tag(), "bf16");
        assert_eq!(CachePrecision::default(), CachePrecision::ReducedBit);
    }

    #[test]
    fn test_parse_aliases() {
        for raw in ["", "8", "8bit", " INT8 "] {
            assert_eq!(raw.parse::<CachePrecision>().unwrap(), CachePrecision::ReducedBit);
        }
        for raw in ["bf16", "BFloat16", "16"] {
            assert_eq!(
                raw.parse::<CachePrecision>().unwrap(),
                CachePrecision::HalfPrecision
            );
        }
        assert!(matches!(
            "fp32".parse::<CachePrecision>(),
            Err(FilechatError::Config(_))
        ));
    }

    #[test]
    fn test_reduced_bit_table() {
        let p = CachePrecision::ReducedBit;
        let expected = LayerKind::Quantized {
            group_size: 64,
            bits: 8,
        };
        assert_eq!(p.convert_layer(&filled("dense")).kind(), expected);
        assert_eq!(p.convert_layer(&filled("chunked")).kind(), expected);
        assert_eq!(p.convert_layer(&filled("q4")).kind(), expected);
        let q8 = filled("q8");
        assert_eq!(p.convert_layer(&q8), q8, "8-bit layers pass through unchanged");
    }

    #[test]
    fn test_reduced_bit_requantizes_mixed_layer() {
        let values: Vec<f32> = (0..2 * 64).map(|i| i as f32 * 0.02).collect();
        let t = Tensor::from_f32(2, 64, &values).unwrap();
        let mixed = LayerCache::Quantized {
            keys: t.quantize(64, 8),
            values: t.quantize(64, 4),
            start_position: 0,
        };
        match CachePrecision::ReducedBit.convert_layer(&mixed) {
            LayerCache::Quantized { keys, values, .. } => {
                assert_eq!(keys.bits(), QUANT_BITS);
                assert_eq!(values.bits(), QUANT_BITS);
            }
            other => panic!("expected quantized layer, got {}", other.kind()),
        }
    }

    #[test]
    fn test_half_precision_table() {
        let p = CachePrecision::HalfPrecision;
        let dense = filled("dense");
        let chunked = filled("chunked");
        assert_eq!(p.convert_layer(&dense), dense);
        assert_eq!(p.convert_layer(&chunked), chunked);
        assert_eq!(p.convert_layer(&filled("q8")).kind(), LayerKind::Dense);
        assert_eq!(p.convert_layer(&filled("q4")).kind(), LayerKind::Dense);
    }

    #[test]
    fn test_convert_is_idempotent() {
        let entry = CacheEntry::new(vec![
            filled("dense"),
            filled("chunked"),
            filled("q4"),
            filled("q8"),
        ]);
        for p in [CachePrecision::ReducedBit, CachePrecision::HalfPrecision] {
            let once = p.convert(&entry);
            assert!(p.conforms(&once));
            assert_eq!(p.convert(&once), once);
        }
        assert!(!CachePrecision::ReducedBit.conforms(&entry));
    }

    #[test]
    fn test_serde_uses_tags() {
        let json = serde_json::to_string(&CachePrecision::HalfPrecision).unwrap();
        assert_eq!(json, "\"bf16\"");
        let p: CachePrecision = serde_json::from_str("\"8bit\"").unwrap();
        assert_eq!(p, CachePrecision::ReducedBit);
    }
}
