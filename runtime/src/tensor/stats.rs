//! Column statistics, z-score normalization, and ranking distance.
//!
//! Statistics run per column so feature-major datasets normalize feature
//! by feature. Standard deviation is the population form (divide by the
//! row count) with the square root from the software math kernel.

use super::{DType, Storage, Tensor};
use crate::math;

use alloc::vec;

/// Per-column mean and standard deviation, kept for later
/// normalization of unseen data.
#[derive(Debug, Clone)]
pub struct ColumnStats {
    pub mean: Tensor,
    pub stddev: Tensor,
}

impl ColumnStats {
    /// `(mean, stddev)` serialized through the fixed-width text codec, so
    /// a normalizer can be stored next to the layer parameters.
    pub fn encode(&self) -> (alloc::string::String, alloc::string::String) {
        (
            crate::textio::encode_matrix(&self.mean),
            crate::textio::encode_matrix(&self.stddev),
        )
    }

    /// Rebuild a normalizer from its serialized vectors.
    pub fn decode(mean: &str, stddev: &str, dtype: DType, cols: usize) -> crate::error::SynapseResult<Self> {
        let mut m = Tensor::zeros(dtype, 1, cols);
        let mut s = Tensor::zeros(dtype, 1, cols);
        crate::textio::decode_matrix(mean, &mut m)?;
        crate::textio::decode_matrix(stddev, &mut s)?;
        Ok(Self { mean: m, stddev: s })
    }
}

impl Tensor {
    /// Per-column means as a 1 x cols tensor. Float tensors only.
    pub fn mean_cols(&self) -> Tensor {
        assert!(self.dtype() != DType::I32, "column mean of integer tensor");
        let (rows, cols) = (self.rows(), self.cols());
        let mut sums = vec![0.0f64; cols];
        for r in 0..rows {
            for c in 0..cols {
                sums[c] += self.get(r, c).to_f64();
            }
        }
        let data = match self.dtype() {
            DType::F32 => Storage::F32(sums.iter().map(|&s| (s / rows as f64) as f32).collect()),
            DType::F64 => Storage::F64(sums.iter().map(|&s| s / rows as f64).collect()),
            DType::I32 => unreachable!(),
        };
        Tensor::from_storage(1, cols, data)
    }

    /// Per-column sums as a 1 x cols tensor. Float tensors only.
    pub fn sum_cols(&self) -> Tensor {
        assert!(self.dtype() != DType::I32, "column sum of integer tensor");
        let (rows, cols) = (self.rows(), self.cols());
        let mut sums = vec![0.0f64; cols];
        for r in 0..rows {
            for c in 0..cols {
                sums[c] += self.get(r, c).to_f64();
            }
        }
        let data = match self.dtype() {
            DType::F32 => Storage::F32(sums.iter().map(|&s| s as f32).collect()),
            DType::F64 => Storage::F64(sums),
            DType::I32 => unreachable!(),
        };
        Tensor::from_storage(1, cols, data)
    }

    /// Per-column population standard deviation around `means`.
    pub fn stddev_cols(&self, means: &Tensor) -> Tensor {
        assert!(self.dtype() != DType::I32, "column stddev of integer tensor");
        assert_eq!(means.cols(), self.cols(), "means column count mismatch");
        let (rows, cols) = (self.rows(), self.cols());
        let mut sums = vec![0.0f64; cols];
        for r in 0..rows {
            for c in 0..cols {
                let d = self.get(r, c).to_f64() - means.get(0, c).to_f64();
                sums[c] += d * d;
            }
        }
        let data = match self.dtype() {
            DType::F32 => Storage::F32(
                sums.iter()
                    .map(|&s| math::fast_sqrt_f32((s / rows as f64) as f32))
                    .collect(),
            ),
            DType::F64 => Storage::F64(
                sums.iter()
                    .map(|&s| math::fast_sqrt_f64(s / rows as f64))
                    .collect(),
            ),
            DType::I32 => unreachable!(),
        };
        Tensor::from_storage(1, cols, data)
    }

    /// Z-score normalize each column, returning the normalized tensor and
    /// the statistics needed to reproduce the transform.
    pub fn normalize(&self) -> (Tensor, ColumnStats) {
        let mean = self.mean_cols();
        let stddev = self.stddev_cols(&mean);
        let stats = ColumnStats { mean, stddev };
        (self.normalize_with(&stats), stats)
    }

    /// Apply previously captured column statistics. Columns with zero
    /// spread normalize to zero.
    pub fn normalize_with(&self, stats: &ColumnStats) -> Tensor {
        let (rows, cols) = (self.rows(), self.cols());
        let mut out = Tensor::zeros(self.dtype(), rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let m = stats.mean.get(0, c).to_f64();
                let sd = stats.stddev.get(0, c).to_f64();
                let z = if sd == 0.0 {
                    0.0
                } else {
                    (self.get(r, c).to_f64() - m) / sd
                };
                out.set(r, c, value_of(self.dtype(), z));
            }
        }
        out
    }

    /// Invert [`normalize_with`](Self::normalize_with).
    pub fn denormalize_with(&self, stats: &ColumnStats) -> Tensor {
        let (rows, cols) = (self.rows(), self.cols());
        let mut out = Tensor::zeros(self.dtype(), rows, cols);
        for r in 0..rows {
            for c in 0..cols {
                let m = stats.mean.get(0, c).to_f64();
                let sd = stats.stddev.get(0, c).to_f64();
                let x = self.get(r, c).to_f64() * sd + m;
                out.set(r, c, value_of(self.dtype(), x));
            }
        }
        out
    }

    /// Similarity of two single-row rankings in [0, 1]: 1 minus the summed
    /// positional displacement of each value of `self` within `other`,
    /// scaled by `n(n+1)/2`. Values absent from `other` count as
    /// displacement zero. f32 rows only.
    pub fn ranking_distance(&self, other: &Tensor) -> f32 {
        assert_eq!(self.rows(), 1, "ranking distance needs single-row tensors");
        assert_eq!(other.rows(), 1, "ranking distance needs single-row tensors");
        assert_eq!(self.cols(), other.cols(), "ranking length mismatch");
        let n = self.cols();
        let mut displaced = 0.0f32;
        for c in 0..n {
            let v = self.get(0, c);
            if let Some((_, k)) = other.find(v) {
                displaced += if k > c { (k - c) as f32 } else { (c - k) as f32 };
            }
        }
        1.0 - displaced / ((n * (n + 1)) as f32 / 2.0)
    }
}

fn value_of(dtype: DType, x: f64) -> super::Value {
    match dtype {
        DType::F32 => super::Value::F32(x as f32),
        DType::F64 => super::Value::F64(x),
        DType::I32 => super::Value::I32(x as i32),
    }
}
