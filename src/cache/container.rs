//! On-disk container for prompt caches.
//!
//! Files are safetensors. Per layer `i` the `__metadata__` table records
//! `layer.i.kind` (`dense`, `chunked`, `quantized`) and
//! `layer.i.start_position`; rings add `layer.i.chunk_size`.
//! Full-precision layers store `layer.i.keys` / `layer.i.values` as BF16.
//! Quantized layers store `.codes` (U8), `.scales` and `.biases` (BF16) for
//! each of keys and values, with `group_size` and `bits` in the metadata.

use std::collections::HashMap;

use half::bf16;
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensorError, SafeTensors};

use crate::error::{FilechatError, Result};
use crate::kv::{CacheEntry, LayerCache, QuantizedTensor, Tensor};

const FORMAT_NAME: &str = "filechat.kv";
const FORMAT_VERSION: &str = "1";

/// Serialize a cache entry exactly as given; no precision conversion.
pub fn encode(entry: &CacheEntry) -> Result<Vec<u8>> {
    let mut writer = Writer::default();
    writer.meta("format", FORMAT_NAME);
    writer.meta("version", FORMAT_VERSION);
    writer.meta("layers", entry.num_layers());

    for (i, layer) in entry.layers().iter().enumerate() {
        let prefix = format!("layer.{i}");
        match layer {
            LayerCache::Dense {
                keys,
                values,
                start_position,
            } => {
                writer.meta(&format!("{prefix}.kind"), "dense");
                writer.meta(&format!("{prefix}.start_position"), start_position);
                writer.dense(&format!("{prefix}.keys"), keys);
                writer.dense(&format!("{prefix}.values"), values);
            }
            LayerCache::Chunked {
                keys,
                values,
                chunk_size,
                start_position,
            } => {
                writer.meta(&format!("{prefix}.kind"), "chunked");
                writer.meta(&format!("{prefix}.start_position"), start_position);
                writer.meta(&format!("{prefix}.chunk_size"), chunk_size);
                writer.dense(&format!("{prefix}.keys"), keys);
                writer.dense(&format!("{prefix}.values"), values);
            }
            LayerCache::Quantized {
                keys,
                values,
                start_position,
            } => {
                writer.meta(&format!("{prefix}.kind"), "quantized");
                writer.meta(&format!("{prefix}.start_position"), start_position);
                writer.quantized(&format!("{prefix}.keys"), keys);
                writer.quantized(&format!("{prefix}.values"), values);
            }
        }
    }

    writer.finish()
}

/// Parse a container produced by [`encode`].
///
/// Every structural problem (short file, bad header, out-of-range offsets,
/// unknown layer kind, inconsistent shapes) is a [`FilechatError::CacheFormat`].
pub fn decode(bytes: &[u8]) -> Result<CacheEntry> {
    let reader = Reader::parse(bytes)?;

    match reader.metadata.get("format").map(String::as_str) {
        Some(FORMAT_NAME) => {}
        other => {
            return Err(format_err(format!(
                "unexpected container format {other:?}"
            )))
        }
    }
    if reader.metadata.get("version").map(String::as_str) != Some(FORMAT_VERSION) {
        return Err(format_err("unsupported container version"));
    }

    let num_layers: usize = reader.meta_parse("layers")?;
    let mut layers = Vec::with_capacity(num_layers.min(4096));
    for i in 0..num_layers {
        let prefix = format!("layer.{i}");
        let start_position: usize = reader.meta_parse(&format!("{prefix}.start_position"))?;
        let kind = reader.meta_str(&format!("{prefix}.kind"))?;
        let layer = match kind {
            "dense" => {
                let (keys, values) = reader.dense_pair(&prefix)?;
                LayerCache::Dense {
                    keys,
                    values,
                    start_position,
                }
            }
            "chunked" => {
                let chunk_size: usize = reader.meta_parse(&format!("{prefix}.chunk_size"))?;
                if chunk_size == 0 {
                    return Err(format_err(format!("{prefix} has zero chunk size")));
                }
                let (keys, values) = reader.dense_pair(&prefix)?;
                LayerCache::Chunked {
                    keys,
                    values,
                    chunk_size,
                    start_position,
                }
            }
            "quantized" => {
                let keys = reader.quantized(&format!("{prefix}.keys"))?;
                let values = reader.quantized(&format!("{prefix}.values"))?;
                if (keys.rows(), keys.cols(), keys.group_size(), keys.bits())
                    != (values.rows(), values.cols(), values.group_size(), values.bits())
                {
                    return Err(format_err(format!(
                        "{prefix} keys and values have different quantized layouts"
                    )));
                }
                LayerCache::Quantized {
                    keys,
                    values,
                    start_position,
                }
            }
            other => return Err(format_err(format!("{prefix} has unknown kind '{other}'"))),
        };
        layers.push(layer);
    }

    Ok(CacheEntry::new(layers))
}

fn format_err(msg: impl Into<String>) -> FilechatError {
    FilechatError::CacheFormat(msg.into())
}

fn container_err(e: SafeTensorError) -> FilechatError {
    format_err(format!("invalid safetensors container: {e}"))
}

fn bf16_bytes(values: &[bf16]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

// -- writer ----------------------------------------------------------------

#[derive(Default)]
struct Writer {
    tensors: Vec<(String, Dtype, Vec<usize>, Vec<u8>)>,
    metadata: HashMap<String, String>,
}

impl Writer {
    fn meta(&mut self, key: &str, value: impl ToString) {
        self.metadata.insert(key.to_string(), value.to_string());
    }

    fn push(&mut self, name: String, dtype: Dtype, shape: Vec<usize>, bytes: Vec<u8>) {
        self.tensors.push((name, dtype, shape, bytes));
    }

    fn dense(&mut self, name: &str, tensor: &Tensor) {
        self.push(
            name.to_string(),
            Dtype::BF16,
            vec![tensor.rows(), tensor.cols()],
            bf16_bytes(tensor.data()),
        );
    }

    fn quantized(&mut self, name: &str, tensor: &QuantizedTensor) {
        let groups = tensor.scales().len() / tensor.rows().max(1);
        self.meta(&format!("{name}.group_size"), tensor.group_size());
        self.meta(&format!("{name}.bits"), tensor.bits());
        self.push(
            format!("{name}.codes"),
            Dtype::U8,
            vec![tensor.rows(), tensor.cols()],
            tensor.codes().to_vec(),
        );
        self.push(
            format!("{name}.scales"),
            Dtype::BF16,
            vec![tensor.rows(), groups],
            bf16_bytes(tensor.scales()),
        );
        self.push(
            format!("{name}.biases"),
            Dtype::BF16,
            vec![tensor.rows(), groups],
            bf16_bytes(tensor.biases()),
        );
    }

    fn finish(self) -> Result<Vec<u8>> {
        let views = self
            .tensors
            .iter()
            .map(|(name, dtype, shape, bytes)| {
                TensorView::new(*dtype, shape.clone(), bytes).map(|view| (name.as_str(), view))
            })
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(container_err)?;
        let named = views.iter().map(|(name, view)| (*name, view));
        safetensors::serialize(named, &Some(self.metadata)).map_err(container_err)
    }
}

// -- reader ----------------------------------------------------------------

struct Reader<'a> {
    tensors: SafeTensors<'a>,
    metadata: HashMap<String, String>,
}

impl<'a> Reader<'a> {
    fn parse(bytes: &'a [u8]) -> Result<Self> {
        let (_, header) = SafeTensors::read_metadata(bytes).map_err(container_err)?;
        let metadata = header
            .metadata()
            .clone()
            .ok_or_else(|| format_err("missing metadata"))?;
        let tensors = SafeTensors::deserialize(bytes).map_err(container_err)?;
        Ok(Self { tensors, metadata })
    }

    fn meta_str(&self, key: &str) -> Result<&str> {
        self.metadata
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| format_err(format!("missing metadata '{key}'")))
    }

    fn meta_parse<T: std::str::FromStr>(&self, key: &str) -> Result<T> {
        self.meta_str(key)?
            .parse()
            .map_err(|_| format_err(format!("metadata '{key}' is not a valid number")))
    }

    /// Locate a 2-D tensor of the given dtype.
    fn raw(&self, name: &str, dtype: Dtype) -> Result<([usize; 2], TensorView<'a>)> {
        let view = self
            .tensors
            .tensor(name)
            .map_err(|_| format_err(format!("missing tensor '{name}'")))?;
        if view.dtype() != dtype {
            return Err(format_err(format!(
                "tensor '{name}' has dtype {:?}",
                view.dtype()
            )));
        }
        let &[rows, cols] = view.shape() else {
            return Err(format_err(format!("tensor '{name}' is not 2-D")));
        };
        Ok(([rows, cols], view))
    }

    fn bf16(&self, name: &str) -> Result<([usize; 2], Vec<bf16>)> {
        let (shape, view) = self.raw(name, Dtype::BF16)?;
        let values = view
            .data()
            .chunks_exact(2)
            .map(|b| bf16::from_le_bytes([b[0], b[1]]))
            .collect();
        Ok((shape, values))
    }

    fn dense(&self, name: &str) -> Result<Tensor> {
        let ([rows, cols], values) = self.bf16(name)?;
        Tensor::new(rows, cols, values)
    }

    fn dense_pair(&self, prefix: &str) -> Result<(Tensor, Tensor)> {
        let keys = self.dense(&format!("{prefix}.keys"))?;
        let values = self.dense(&format!("{prefix}.values"))?;
        if (keys.rows(), keys.cols()) != (values.rows(), values.cols()) {
            return Err(format_err(format!(
                "{prefix} keys and values have different shapes"
            )));
        }
        Ok((keys, values))
    }

    fn quantized(&self, name: &str) -> Result<QuantizedTensor> {
        let group_size: usize = self.meta_parse(&format!("{name}.group_size"))?;
        let bits: u8 = self.meta_parse(&format!("{name}.bits"))?;
        let ([rows, cols], codes) = self.raw(&format!("{name}.codes"), Dtype::U8)?;
        let (_, scales) = self.bf16(&format!("{name}.scales"))?;
        let (_, biases) = self.bf16(&format!("{name}.biases"))?;
        QuantizedTensor::from_parts(
            rows,
            cols,
            group_size,
            bits,
            codes.data().to_vec(),
            scales,
            biases,
        )
    }
}
