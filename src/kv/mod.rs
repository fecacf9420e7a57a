//! In-memory KV cache: tensors, per-layer records, and precision conversion.

pub mod layer;
pub mod precision;
pub mod tensor;

pub use layer::{CacheEntry, LayerCache, LayerKind};
pub use precision::{CachePrecision, QUANT_BITS, QUANT_GROUP_SIZE};
pub use tensor::{QuantizedTensor, Tensor};
