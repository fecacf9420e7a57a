//! Row-major 2-D tensors for KV cache storage.
//!
//! A [`Tensor`] holds one row per cached position, stored as `bf16`.
//! A [`QuantizedTensor`] holds the same shape compressed with affine
//! group quantization: each row is split into groups of `group_size`
//! values that share one `(scale, bias)` pair, and every value is stored
//! as an unsigned integer code of `bits` width.

use half::bf16;

use crate::error::{FilechatError, Result};

/// Dense `[rows, cols]` tensor of bfloat16 values.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: Vec<bf16>,
}

impl Tensor {
    /// Build a tensor from raw values. `data.len()` must equal `rows * cols`.
    pub fn new(rows: usize, cols: usize, data: Vec<bf16>) -> Result<Self> {
        if rows.checked_mul(cols) != Some(data.len()) {
            return Err(FilechatError::CacheFormat(format!(
                "tensor data length {} does not match shape [{rows}, {cols}]",
                data.len()
            )));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build a tensor from `f32` values, rounding each to bf16.
    pub fn from_f32(rows: usize, cols: usize, values: &[f32]) -> Result<Self> {
        Self::new(rows, cols, values.iter().copied().map(bf16::from_f32).collect())
    }

    /// A tensor with zero rows and the given width.
    pub fn empty(cols: usize) -> Self {
        Self {
            rows: 0,
            cols,
            data: Vec::new(),
        }
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn data(&self) -> &[bf16] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0
    }

    /// Borrow row `index`.
    pub fn row(&self, index: usize) -> Option<&[bf16]> {
        if index >= self.rows {
            return None;
        }
        let start = index * self.cols;
        Some(&self.data[start..start + self.cols])
    }

    /// Append all rows of `other`. Widths must agree unless `self` has no rows.
    pub fn append(&mut self, other: &Tensor) -> Result<()> {
        if self.rows == 0 && self.cols != other.cols {
            self.cols = other.cols;
        }
        if other.cols != self.cols {
            return Err(FilechatError::Model(format!(
                "cannot append tensor of width {} to width {}",
                other.cols, self.cols
            )));
        }
        self.data.extend_from_slice(&other.data);
        self.rows += other.rows;
        Ok(())
    }

    /// Drop the first `count` rows, returning how many were removed.
    pub fn drop_front(&mut self, count: usize) -> usize {
        let count = count.min(self.rows);
        self.data.drain(..count * self.cols);
        self.rows -= count;
        count
    }

    /// Size of the stored values in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.data.len() * std::mem::size_of::<bf16>()
    }

    /// Affine-quantize every row in groups of `group_size` values.
    ///
    /// `group_size` is clamped to at least 1 and `bits` to `1..=8`; the last
    /// group of a row may be shorter than `group_size`.
    pub fn quantize(&self, group_size: usize, bits: u8) -> QuantizedTensor {
        let group_size = group_size.max(1);
        let bits = bits.clamp(1, 8);
        let levels = f32::from(u8::MAX >> (8 - bits));
        let groups_per_row = self.cols.div_ceil(group_size);

        let mut codes = Vec::with_capacity(self.data.len());
        let mut scales = Vec::with_capacity(self.rows * groups_per_row);
        let mut biases = Vec::with_capacity(self.rows * groups_per_row);

        for row in self.data.chunks(self.cols.max(1)).take(self.rows) {
            for group in row.chunks(group_size) {
                let (min, max) = group.iter().fold((f32::MAX, f32::MIN), |(lo, hi), v| {
                    let v = v.to_f32();
                    (lo.min(v), hi.max(v))
                });
                let scale = bf16::from_f32((max - min) / levels);
                let bias = bf16::from_f32(min);
                let (s, b) = (scale.to_f32(), bias.to_f32());
                for value in group {
                    let code = if s > 0.0 {
                        ((value.to_f32() - b) / s).round().clamp(0.0, levels)
                    } else {
                        0.0
                    };
                    codes.push(code as u8);
                }
                scales.push(scale);
                biases.push(bias);
            }
        }

        QuantizedTensor {
            rows: self.rows,
            cols: self.cols,
            group_size,
            bits,
            codes,
            scales,
            biases,
        }
    }
}

/// Group-quantized `[rows, cols]` tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    rows: usize,
    cols: usize,
    group_size: usize,
    bits: u8,
    codes: Vec<u8>,
    scales: Vec<bf16>,
    biases: Vec<bf16>,
}

impl QuantizedTensor {
    /// Reassemble a quantized tensor from its parts, validating every length.
    pub fn from_parts(
        rows: usize,
        cols: usize,
        group_size: usize,
        bits: u8,
        codes: Vec<u8>,
        scales: Vec<bf16>,
        biases: Vec<bf16>,
    ) -> Result<Self> {
        if group_size == 0 || !(1..=8).contains(&bits) {
            return Err(FilechatError::CacheFormat(format!(
                "invalid quantization parameters: group_size={group_size}, bits={bits}"
            )));
        }
        let groups = rows * cols.div_ceil(group_size);
        if codes.len() != rows * cols || scales.len() != groups || biases.len() != groups {
            return Err(FilechatError::CacheFormat(format!(
                "quantized tensor [{rows}, {cols}] has {} codes, {} scales, {} biases",
                codes.len(),
                scales.len(),
                biases.len()
            )));
        }
        let max_code = u8::MAX >> (8 - bits);
        if codes.iter().any(|&c| c > max_code) {
            return Err(FilechatError::CacheFormat(format!(
                "quantized code exceeds {bits}-bit range"
            )));
        }
        Ok(Self {
            rows,
            cols,
            group_size,
            bits,
            codes,
            scales,
            biases,
        })
    }

    /// An empty quantized tensor with the given width and parameters.
    pub fn empty(cols: usize, group_size: usize, bits: u8) -> Self {
        Tensor::empty(cols).quantize(group_size, bits)
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    pub fn group_size(&self) -> usize {
        self.group_size
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn codes(&self) -> &[u8] {
        &self.codes
    }

    pub fn scales(&self) -> &[bf16] {
        &self.scales
    }

    pub fn biases(&self) -> &[bf16] {
        &self.biases
    }

    fn groups_per_row(&self) -> usize {
        self.cols.div_ceil(self.group_size)
    }

    /// Expand back to a dense tensor: `value = code * scale + bias`.
    pub fn dequantize(&self) -> Tensor {
        let groups_per_row = self.groups_per_row();
        let mut data = Vec::with_capacity(self.codes.len());
        for (r, row) in self.codes.chunks(self.cols.max(1)).take(self.rows).enumerate() {
            for (g, group) in row.chunks(self.group_size).enumerate() {
                let idx = r * groups_per_row + g;
                let scale = self.scales[idx].to_f32();
                let bias = self.biases[idx].to_f32();
                data.extend(
                    group
                        .iter()
                        .map(|&code| bf16::from_f32(f32::from(code) * scale + bias)),
                );
            }
        }
        Tensor {
            rows: self.rows,
            cols: self.cols,
            data,
        }
    }

    /// Append the rows of `other`, which must share width and parameters.
    pub fn append(&mut self, other: &QuantizedTensor) -> Result<()> {
        if self.rows == 0 && self.cols != other.cols {
            self.cols = other.cols;
        }
        if other.cols != self.cols
            || other.group_size != self.group_size
            || other.bits != self.bits
        {
            return Err(FilechatError::Model(
                "cannot append quantized tensors with different layouts".into(),
            ));
        }
        self.codes.extend_from_slice(&other.codes);
        self.scales.extend_from_slice(&other.scales);
        self.biases.extend_from_slice(&other.biases);
        self.rows += other.rows;
        Ok(())
    }

    /// Size of codes plus per-group parameters in bytes.
    pub fn memory_bytes(&self) -> usize {
        self.codes.len() + (self.scales.len() + self.biases.len()) * std::mem::size_of::<bf16>()
    }
}
