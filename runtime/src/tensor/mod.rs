//! # Dtype-Polymorphic Tensors
//!
//! Dense row-major 2-D tensors over `i32`, `f32`, or `f64` payloads.
//! Operations allocate fresh tensors unless named `_in_place`; operands
//! must agree in dtype and shape, and violations are fatal assertions
//! rather than recoverable errors.

use alloc::vec;
use alloc::vec::Vec;

use crate::math::{self, Rng};

mod stats;

pub use stats::ColumnStats;

// ============================================================================
// DType and Value
// ============================================================================

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DType {
    I32,
    F32,
    F64,
}

/// A single scalar tagged with its dtype
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Value {
    I32(i32),
    F32(f32),
    F64(f64),
}

impl Value {
    #[inline(always)]
    pub fn dtype(&self) -> DType {
        match self {
            Self::I32(_) => DType::I32,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    /// Zero of the given dtype
    pub fn zero(dtype: DType) -> Self {
        match dtype {
            DType::I32 => Self::I32(0),
            DType::F32 => Self::F32(0.0),
            DType::F64 => Self::F64(0.0),
        }
    }

    /// Strict accessor; panics when the value is not `I32`.
    #[inline]
    pub fn as_i32(self) -> i32 {
        match self {
            Self::I32(v) => v,
            _ => panic!("value is not i32"),
        }
    }

    /// Strict accessor; panics when the value is not `F32`.
    #[inline]
    pub fn as_f32(self) -> f32 {
        match self {
            Self::F32(v) => v,
            _ => panic!("value is not f32"),
        }
    }

    /// Strict accessor; panics when the value is not `F64`.
    #[inline]
    pub fn as_f64(self) -> f64 {
        match self {
            Self::F64(v) => v,
            _ => panic!("value is not f64"),
        }
    }

    /// Lossy conversion to f32, any dtype.
    #[inline]
    pub fn to_f32(self) -> f32 {
        match self {
            Self::I32(v) => v as f32,
            Self::F32(v) => v,
            Self::F64(v) => v as f32,
        }
    }

    /// Lossy conversion to f64, any dtype.
    #[inline]
    pub fn to_f64(self) -> f64 {
        match self {
            Self::I32(v) => v as f64,
            Self::F32(v) => v as f64,
            Self::F64(v) => v,
        }
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Backing buffer of a tensor, row-major
#[derive(Debug, Clone, PartialEq)]
pub enum Storage {
    I32(Vec<i32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl Storage {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::I32 => Self::I32(vec![0; len]),
            DType::F32 => Self::F32(vec![0.0; len]),
            DType::F64 => Self::F64(vec![0.0; len]),
        }
    }

    #[inline(always)]
    pub fn dtype(&self) -> DType {
        match self {
            Self::I32(_) => DType::I32,
            Self::F32(_) => DType::F32,
            Self::F64(_) => DType::F64,
        }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        match self {
            Self::I32(v) => v.len(),
            Self::F32(v) => v.len(),
            Self::F64(v) => v.len(),
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// ============================================================================
// Tensor
// ============================================================================

/// Dense 2-D tensor
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor {
    rows: usize,
    cols: usize,
    data: Storage,
}

/// Elementwise binary op producing a fresh tensor
macro_rules! elementwise {
    ($name:ident, $op:tt) => {
        pub fn $name(&self, other: &Tensor) -> Tensor {
            self.assert_same_layout(other);
            let data = match (&self.data, &other.data) {
                (Storage::I32(a), Storage::I32(b)) => {
                    Storage::I32(a.iter().zip(b).map(|(x, y)| x $op y).collect())
                }
                (Storage::F32(a), Storage::F32(b)) => {
                    Storage::F32(a.iter().zip(b).map(|(x, y)| x $op y).collect())
                }
                (Storage::F64(a), Storage::F64(b)) => {
                    Storage::F64(a.iter().zip(b).map(|(x, y)| x $op y).collect())
                }
                _ => unreachable!(),
            };
            Tensor { rows: self.rows, cols: self.cols, data }
        }
    };
}

/// Elementwise binary op updating `self`
macro_rules! elementwise_in_place {
    ($name:ident, $op:tt) => {
        pub fn $name(&mut self, other: &Tensor) {
            self.assert_same_layout(other);
            match (&mut self.data, &other.data) {
                (Storage::I32(a), Storage::I32(b)) => {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x $op y;
                    }
                }
                (Storage::F32(a), Storage::F32(b)) => {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x $op y;
                    }
                }
                (Storage::F64(a), Storage::F64(b)) => {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x $op y;
                    }
                }
                _ => unreachable!(),
            }
        }
    };
}

impl Tensor {
    // =========================================================================
    // Construction
    // =========================================================================

    pub fn zeros(dtype: DType, rows: usize, cols: usize) -> Self {
        assert!(rows > 0 && cols > 0, "empty tensor shape");
        Self {
            rows,
            cols,
            data: Storage::zeros(dtype, rows * cols),
        }
    }

    pub fn from_storage(rows: usize, cols: usize, data: Storage) -> Self {
        assert_eq!(data.len(), rows * cols, "storage length does not match shape");
        Self { rows, cols, data }
    }

    pub fn from_i32(rows: usize, cols: usize, values: &[i32]) -> Self {
        Self::from_storage(rows, cols, Storage::I32(values.to_vec()))
    }

    pub fn from_f32(rows: usize, cols: usize, values: &[f32]) -> Self {
        Self::from_storage(rows, cols, Storage::F32(values.to_vec()))
    }

    pub fn from_f64(rows: usize, cols: usize, values: &[f64]) -> Self {
        Self::from_storage(rows, cols, Storage::F64(values.to_vec()))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    #[inline(always)]
    pub fn rows(&self) -> usize {
        self.rows
    }

    #[inline(always)]
    pub fn cols(&self) -> usize {
        self.cols
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.rows * self.cols
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline(always)]
    pub fn dtype(&self) -> DType {
        self.data.dtype()
    }

    #[inline(always)]
    pub fn storage(&self) -> &Storage {
        &self.data
    }

    #[inline(always)]
    pub fn storage_mut(&mut self) -> &mut Storage {
        &mut self.data
    }

    #[inline(always)]
    fn index(&self, row: usize, col: usize) -> usize {
        assert!(row < self.rows && col < self.cols, "tensor index out of bounds");
        row * self.cols + col
    }

    pub fn get(&self, row: usize, col: usize) -> Value {
        let i = self.index(row, col);
        match &self.data {
            Storage::I32(v) => Value::I32(v[i]),
            Storage::F32(v) => Value::F32(v[i]),
            Storage::F64(v) => Value::F64(v[i]),
        }
    }

    pub fn set(&mut self, row: usize, col: usize, value: Value) {
        let i = self.index(row, col);
        match (&mut self.data, value) {
            (Storage::I32(v), Value::I32(x)) => v[i] = x,
            (Storage::F32(v), Value::F32(x)) => v[i] = x,
            (Storage::F64(v), Value::F64(x)) => v[i] = x,
            _ => panic!("dtype mismatch in tensor set"),
        }
    }

    /// Borrow the f32 payload; panics on other dtypes.
    #[inline]
    pub fn f32_data(&self) -> &[f32] {
        match &self.data {
            Storage::F32(v) => v,
            _ => panic!("tensor is not f32"),
        }
    }

    #[inline]
    pub fn f32_data_mut(&mut self) -> &mut [f32] {
        match &mut self.data {
            Storage::F32(v) => v,
            _ => panic!("tensor is not f32"),
        }
    }

    /// Borrow the f64 payload; panics on other dtypes.
    #[inline]
    pub fn f64_data(&self) -> &[f64] {
        match &self.data {
            Storage::F64(v) => v,
            _ => panic!("tensor is not f64"),
        }
    }

    #[inline]
    pub fn f64_data_mut(&mut self) -> &mut [f64] {
        match &mut self.data {
            Storage::F64(v) => v,
            _ => panic!("tensor is not f64"),
        }
    }

    /// Borrow the i32 payload; panics on other dtypes.
    #[inline]
    pub fn i32_data(&self) -> &[i32] {
        match &self.data {
            Storage::I32(v) => v,
            _ => panic!("tensor is not i32"),
        }
    }

    #[inline]
    pub fn i32_data_mut(&mut self) -> &mut [i32] {
        match &mut self.data {
            Storage::I32(v) => v,
            _ => panic!("tensor is not i32"),
        }
    }

    fn assert_same_layout(&self, other: &Tensor) {
        assert_eq!(self.dtype(), other.dtype(), "tensor dtype mismatch");
        assert_eq!(
            (self.rows, self.cols),
            (other.rows, other.cols),
            "tensor shape mismatch"
        );
    }

    // =========================================================================
    // Elementwise arithmetic
    // =========================================================================

    elementwise!(add, +);
    elementwise!(sub, -);
    elementwise!(mul_elem, *);
    elementwise!(div_elem, /);

    elementwise_in_place!(add_in_place, +=);
    elementwise_in_place!(sub_in_place, -=);
    elementwise_in_place!(mul_elem_in_place, *=);

    /// Multiply every element by a scalar of the same dtype.
    pub fn scale(&self, factor: Value) -> Tensor {
        let mut out = self.clone();
        out.scale_in_place(factor);
        out
    }

    pub fn scale_in_place(&mut self, factor: Value) {
        match (&mut self.data, factor) {
            (Storage::I32(v), Value::I32(f)) => {
                for x in v.iter_mut() {
                    *x *= f;
                }
            }
            (Storage::F32(v), Value::F32(f)) => {
                for x in v.iter_mut() {
                    *x *= f;
                }
            }
            (Storage::F64(v), Value::F64(f)) => {
                for x in v.iter_mut() {
                    *x *= f;
                }
            }
            _ => panic!("dtype mismatch in tensor scale"),
        }
    }

    /// Divide every element by a scalar of the same dtype.
    pub fn scale_div(&self, divisor: Value) -> Tensor {
        let mut out = self.clone();
        out.scale_div_in_place(divisor);
        out
    }

    pub fn scale_div_in_place(&mut self, divisor: Value) {
        match (&mut self.data, divisor) {
            (Storage::I32(v), Value::I32(d)) => {
                for x in v.iter_mut() {
                    *x /= d;
                }
            }
            (Storage::F32(v), Value::F32(d)) => {
                for x in v.iter_mut() {
                    *x /= d;
                }
            }
            (Storage::F64(v), Value::F64(d)) => {
                for x in v.iter_mut() {
                    *x /= d;
                }
            }
            _ => panic!("dtype mismatch in tensor scale_div"),
        }
    }

    /// Add a scalar of the same dtype to every element.
    pub fn offset(&self, delta: Value) -> Tensor {
        let mut out = self.clone();
        out.offset_in_place(delta);
        out
    }

    pub fn offset_in_place(&mut self, delta: Value) {
        match (&mut self.data, delta) {
            (Storage::I32(v), Value::I32(d)) => {
                for x in v.iter_mut() {
                    *x += d;
                }
            }
            (Storage::F32(v), Value::F32(d)) => {
                for x in v.iter_mut() {
                    *x += d;
                }
            }
            (Storage::F64(v), Value::F64(d)) => {
                for x in v.iter_mut() {
                    *x += d;
                }
            }
            _ => panic!("dtype mismatch in tensor offset"),
        }
    }

    pub fn fill(&mut self, value: Value) {
        match (&mut self.data, value) {
            (Storage::I32(v), Value::I32(x)) => v.iter_mut().for_each(|e| *e = x),
            (Storage::F32(v), Value::F32(x)) => v.iter_mut().for_each(|e| *e = x),
            (Storage::F64(v), Value::F64(x)) => v.iter_mut().for_each(|e| *e = x),
            _ => panic!("dtype mismatch in tensor fill"),
        }
    }

    /// Copy `other`'s payload into `self`; layouts must match.
    pub fn copy_from(&mut self, other: &Tensor) {
        self.assert_same_layout(other);
        self.data = other.data.clone();
    }

    // =========================================================================
    // Linear algebra
    // =========================================================================

    /// Matrix product `self * other`.
    pub fn matmul(&self, other: &Tensor) -> Tensor {
        assert_eq!(self.dtype(), other.dtype(), "tensor dtype mismatch");
        assert_eq!(self.cols, other.rows, "inner dimensions do not agree");
        let (m, k, n) = (self.rows, self.cols, other.cols);
        let data = match (&self.data, &other.data) {
            (Storage::I32(a), Storage::I32(b)) => Storage::I32(matmul_kernel(a, b, m, k, n)),
            (Storage::F32(a), Storage::F32(b)) => Storage::F32(matmul_kernel(a, b, m, k, n)),
            (Storage::F64(a), Storage::F64(b)) => Storage::F64(matmul_kernel(a, b, m, k, n)),
            _ => unreachable!(),
        };
        Tensor { rows: m, cols: n, data }
    }

    pub fn transpose(&self) -> Tensor {
        let (m, n) = (self.rows, self.cols);
        let data = match &self.data {
            Storage::I32(v) => Storage::I32(transpose_kernel(v, m, n)),
            Storage::F32(v) => Storage::F32(transpose_kernel(v, m, n)),
            Storage::F64(v) => Storage::F64(transpose_kernel(v, m, n)),
        };
        Tensor { rows: n, cols: m, data }
    }

    /// Tile `self` `row_reps` times down and `col_reps` times across.
    /// Float tensors only.
    pub fn repmat(&self, row_reps: usize, col_reps: usize) -> Tensor {
        assert!(self.dtype() != DType::I32, "repmat of integer tensor");
        assert!(row_reps > 0 && col_reps > 0, "zero repetition count");
        let (m, n) = (self.rows, self.cols);
        let (rm, rn) = (m * row_reps, n * col_reps);
        let mut out = Tensor::zeros(self.dtype(), rm, rn);
        for r in 0..rm {
            for c in 0..rn {
                out.set(r, c, self.get(r % m, c % n));
            }
        }
        out
    }

    /// Copy of row `r` as a 1 x cols tensor.
    pub fn row(&self, r: usize) -> Tensor {
        assert!(r < self.rows, "row index out of bounds");
        let mut out = Tensor::zeros(self.dtype(), 1, self.cols);
        for c in 0..self.cols {
            out.set(0, c, self.get(r, c));
        }
        out
    }

    /// Copy of column `c` as a rows x 1 tensor.
    pub fn column(&self, c: usize) -> Tensor {
        assert!(c < self.cols, "column index out of bounds");
        let mut out = Tensor::zeros(self.dtype(), self.rows, 1);
        for r in 0..self.rows {
            out.set(r, 0, self.get(r, c));
        }
        out
    }

    /// Copy of the first `n` rows.
    pub fn slice_rows(&self, n: usize) -> Tensor {
        assert!(n > 0 && n <= self.rows, "row slice out of bounds");
        let mut out = Tensor::zeros(self.dtype(), n, self.cols);
        for r in 0..n {
            for c in 0..self.cols {
                out.set(r, c, self.get(r, c));
            }
        }
        out
    }

    /// Overwrite row `r` of an f32 tensor from a slice.
    pub fn write_row_f32(&mut self, r: usize, values: &[f32]) {
        assert!(r < self.rows, "row index out of bounds");
        assert_eq!(values.len(), self.cols, "row length mismatch");
        let cols = self.cols;
        self.f32_data_mut()[r * cols..(r + 1) * cols].copy_from_slice(values);
    }

    // =========================================================================
    // Reductions and search
    // =========================================================================

    pub fn sum(&self) -> Value {
        match &self.data {
            Storage::I32(v) => Value::I32(v.iter().sum()),
            Storage::F32(v) => {
                Value::F32(v.iter().map(|&x| x as f64).sum::<f64>() as f32)
            }
            Storage::F64(v) => Value::F64(v.iter().sum()),
        }
    }

    pub fn max(&self) -> Value {
        assert!(!self.is_empty());
        match &self.data {
            Storage::I32(v) => Value::I32(v.iter().copied().fold(v[0], i32::max)),
            Storage::F32(v) => {
                Value::F32(v.iter().copied().fold(v[0], |a, b| if b > a { b } else { a }))
            }
            Storage::F64(v) => {
                Value::F64(v.iter().copied().fold(v[0], |a, b| if b > a { b } else { a }))
            }
        }
    }

    pub fn min(&self) -> Value {
        assert!(!self.is_empty());
        match &self.data {
            Storage::I32(v) => Value::I32(v.iter().copied().fold(v[0], i32::min)),
            Storage::F32(v) => {
                Value::F32(v.iter().copied().fold(v[0], |a, b| if b < a { b } else { a }))
            }
            Storage::F64(v) => {
                Value::F64(v.iter().copied().fold(v[0], |a, b| if b < a { b } else { a }))
            }
        }
    }

    /// Mean over all elements, accumulated in f64 and truncated to the
    /// tensor's dtype.
    pub fn mean(&self) -> Value {
        assert!(!self.is_empty());
        let n = self.len() as f64;
        match &self.data {
            Storage::I32(v) => {
                Value::I32((v.iter().map(|&x| x as f64).sum::<f64>() / n) as i32)
            }
            Storage::F32(v) => {
                Value::F32((v.iter().map(|&x| x as f64).sum::<f64>() / n) as f32)
            }
            Storage::F64(v) => Value::F64(v.iter().sum::<f64>() / n),
        }
    }

    /// Column index of the flattened maximum, first occurrence on ties.
    ///
    /// For a single-row tensor this is the flattened index of the maximum.
    pub fn argmax(&self) -> usize {
        assert!(!self.is_empty());
        let mut best = 0usize;
        match &self.data {
            Storage::I32(v) => {
                for (i, &x) in v.iter().enumerate() {
                    if x > v[best] {
                        best = i;
                    }
                }
            }
            Storage::F32(v) => {
                for (i, &x) in v.iter().enumerate() {
                    if x > v[best] {
                        best = i;
                    }
                }
            }
            Storage::F64(v) => {
                for (i, &x) in v.iter().enumerate() {
                    if x > v[best] {
                        best = i;
                    }
                }
            }
        }
        best % self.cols
    }

    /// First position holding exactly `value`, row-major order.
    pub fn find(&self, value: Value) -> Option<(usize, usize)> {
        assert_eq!(self.dtype(), value.dtype(), "dtype mismatch in tensor find");
        for r in 0..self.rows {
            for c in 0..self.cols {
                if self.get(r, c) == value {
                    return Some((r, c));
                }
            }
        }
        None
    }

    /// Sort the values of an f32 tensor and map each sorted value back to
    /// the column of its first occurrence.
    ///
    /// Duplicate values collapse onto the same source column; the result
    /// stores column indices as f32, one per element, in sorted order.
    pub fn argsort(&self, compare: fn(f32, f32) -> core::cmp::Ordering) -> Tensor {
        let data = self.f32_data();
        let mut sorted: Vec<f32> = data.to_vec();
        sorted.sort_unstable_by(|a, b| compare(*a, *b));
        let indices: Vec<f32> = sorted
            .iter()
            .map(|&v| {
                let flat = data
                    .iter()
                    .position(|&x| x == v)
                    .unwrap_or(0);
                (flat % self.cols) as f32
            })
            .collect();
        Tensor::from_storage(self.rows, self.cols, Storage::F32(indices))
    }

    // =========================================================================
    // Conversions
    // =========================================================================

    pub fn to_f32(&self) -> Tensor {
        let data = match &self.data {
            Storage::I32(v) => v.iter().map(|&x| x as f32).collect(),
            Storage::F32(v) => v.clone(),
            Storage::F64(v) => v.iter().map(|&x| x as f32).collect(),
        };
        Tensor::from_storage(self.rows, self.cols, Storage::F32(data))
    }

    pub fn to_f64(&self) -> Tensor {
        let data = match &self.data {
            Storage::I32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::F32(v) => v.iter().map(|&x| x as f64).collect(),
            Storage::F64(v) => v.clone(),
        };
        Tensor::from_storage(self.rows, self.cols, Storage::F64(data))
    }

    // =========================================================================
    // Random initialization
    // =========================================================================

    /// Fan-in scaled uniform init: values in `(-range, range)` with
    /// `range = 1/sqrt(rows)`, quantized by `modula`. Float tensors only.
    pub fn set_random(&mut self, rng: &mut Rng, modula: i32) {
        assert!(modula > 0, "non-positive modula");
        let range = math::fast_sqrt_f32(1.0 / self.rows as f32);
        match &mut self.data {
            Storage::F32(v) => {
                for x in v.iter_mut() {
                    let q = (rng.next_i31() % modula) as f32 / modula as f32;
                    *x = q * 2.0 * range - range;
                }
            }
            Storage::F64(v) => {
                for x in v.iter_mut() {
                    let q = (rng.next_i31() % modula) as f64 / modula as f64;
                    *x = q * 2.0 * range as f64 - range as f64;
                }
            }
            Storage::I32(_) => panic!("set_random of integer tensor"),
        }
    }

    /// Uniform dataset fill in `[0, scale)`. f32 tensors only.
    pub fn uniform_fill(&mut self, rng: &mut Rng, scale: f32) {
        for x in self.f32_data_mut().iter_mut() {
            *x = rng.next_f32() * scale;
        }
    }
}

// ============================================================================
// Kernels
// ============================================================================

fn matmul_kernel<T>(a: &[T], b: &[T], m: usize, k: usize, n: usize) -> Vec<T>
where
    T: Copy + Default + core::ops::Mul<Output = T> + core::ops::Add<Output = T>,
{
    let mut out = vec![T::default(); m * n];
    for i in 0..m {
        for j in 0..n {
            let mut acc = T::default();
            for p in 0..k {
                acc = acc + a[i * k + p] * b[p * n + j];
            }
            out[i * n + j] = acc;
        }
    }
    out
}

fn transpose_kernel<T: Copy + Default>(v: &[T], m: usize, n: usize) -> Vec<T> {
    let mut out = vec![T::default(); m * n];
    for i in 0..m {
        for j in 0..n {
            out[j * m + i] = v[i * n + j];
        }
    }
    out
}

// ============================================================================
// Tests
// ============================================================================
