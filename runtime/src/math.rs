//! # Software Math Kernel
//!
//! Float math with no host math library. Everything here is built from
//! arithmetic and bit manipulation: bit-trick inverse square roots,
//! integer powers by squaring, a hybrid exponential (integer power times
//! a Taylor series on the fractional part), and an AGM-based natural
//! logarithm. Precision targets are training-grade, not libm-grade.

use crate::tensor::{Storage, Tensor};

use alloc::vec::Vec;

// ============================================================================
// Constants
// ============================================================================

/// Euler's number
pub const E: f64 = 2.71828182845904523536;

/// Pi
pub const PI: f64 = 3.14159265358979323846;

/// ln(2)
pub const LN_2: f64 = 0.69314718055994530942;

/// Taylor terms for the f32 exponential
const EXP_TERMS_F32: u32 = 10;

/// Taylor terms for the f64 exponential
const EXP_TERMS_F64: u32 = 20;

/// Scaling exponent for the AGM logarithm
const AGM_SCALE_M: i32 = 100;

const AGM_TOL_F32: f64 = 1.0e-7;
const AGM_TOL_F64: f64 = 1.0e-9;
const AGM_MAX_ITERS: u32 = 1_000_000;

#[inline(always)]
fn fabs(x: f64) -> f64 {
    if x < 0.0 {
        -x
    } else {
        x
    }
}

// ============================================================================
// Square Root
// ============================================================================

/// Square root via the bit-trick inverse square root, three Newton
/// iterations, f32 precision.
pub fn fast_sqrt_f32(x: f32) -> f32 {
    if x == 0.0 {
        return 0.0;
    }
    let half = 0.5 * x;
    let mut bits = x.to_bits();
    bits = 0x5f3759df - (bits >> 1);
    let mut y = f32::from_bits(bits);
    for _ in 0..3 {
        y = y * (1.5 - half * y * y);
    }
    // y approximates 1/sqrt(x)
    x * y
}

/// Square root via the bit-trick inverse square root, five Newton
/// iterations, f64 precision.
pub fn fast_sqrt_f64(x: f64) -> f64 {
    if x == 0.0 {
        return 0.0;
    }
    let half = 0.5 * x;
    let mut bits = x.to_bits();
    bits = 0x5fe6eb50c7b537a9 - (bits >> 1);
    let mut y = f64::from_bits(bits);
    for _ in 0..5 {
        y = y * (1.5 - half * y * y);
    }
    x * y
}

// ============================================================================
// Powers and Exponentials
// ============================================================================

/// `base^exp` for integer exponents by repeated squaring, f64 accumulator.
pub fn power_f64(base: f64, exp: i32) -> f64 {
    if exp < 0 {
        return 1.0 / power_f64(base, -exp);
    }
    let mut result = 1.0f64;
    let mut b = base;
    let mut e = exp as u32;
    while e > 0 {
        if e & 1 == 1 {
            result *= b;
        }
        b *= b;
        e >>= 1;
    }
    result
}

/// `base^exp` for integer exponents. Accumulates in f64 and truncates once.
pub fn power_f32(base: f32, exp: i32) -> f32 {
    power_f64(base as f64, exp) as f32
}

/// Taylor series for e^x around zero, `terms` terms, f64 accumulator.
fn exp_taylor(x: f64, terms: u32) -> f64 {
    let mut result = 1.0f64;
    let mut term = 1.0f64;
    for i in 1..terms {
        term *= x / i as f64;
        result += term;
    }
    result
}

/// e^x as `e^trunc(x) * taylor(frac(x))`.
///
/// The integer part goes through [`power_f64`], keeping the Taylor series
/// on a fractional argument where few terms suffice.
pub fn exp_hybrid_f64(x: f64) -> f64 {
    let int_part = x as i32;
    let frac = x - int_part as f64;
    power_f64(E, int_part) * exp_taylor(frac, EXP_TERMS_F64)
}

/// e^x, f32 precision (10 Taylor terms on the fractional part).
pub fn exp_hybrid_f32(x: f32) -> f32 {
    let int_part = x as i32;
    let frac = (x - int_part as f32) as f64;
    (power_f64(E, int_part) * exp_taylor(frac, EXP_TERMS_F32)) as f32
}

// ============================================================================
// Logarithms
// ============================================================================

/// Arithmetic-geometric mean, f32 tolerance, geometric step through
/// [`fast_sqrt_f32`].
fn agm_f32(a0: f64, g0: f64) -> f64 {
    let mut a = a0;
    let mut g = g0;
    let mut iters = 0u32;
    while fabs(a - g) > AGM_TOL_F32 && iters < AGM_MAX_ITERS {
        let next_a = 0.5 * (a + g);
        let next_g = fast_sqrt_f32((a * g) as f32) as f64;
        a = next_a;
        g = next_g;
        iters += 1;
    }
    a
}

/// Arithmetic-geometric mean, f64 tolerance.
fn agm_f64(a0: f64, g0: f64) -> f64 {
    let mut a = a0;
    let mut g = g0;
    let mut iters = 0u32;
    while fabs(a - g) > AGM_TOL_F64 && iters < AGM_MAX_ITERS {
        let next_a = 0.5 * (a + g);
        let next_g = fast_sqrt_f64(a * g);
        a = next_a;
        g = next_g;
        iters += 1;
    }
    a
}

/// Natural logarithm by the AGM identity
/// `ln(x) = pi / (2 * AGM(1, 2^(2-m)/x)) - m * ln(2)` with m = 100.
///
/// Requires `x > 0`.
pub fn ln_f32(x: f32) -> f32 {
    assert!(x > 0.0, "ln of non-positive value");
    let small = power_f64(2.0, 2 - AGM_SCALE_M) / x as f64;
    let agm = agm_f32(1.0, small);
    ((PI / (2.0 * agm)) - AGM_SCALE_M as f64 * LN_2) as f32
}

/// Natural logarithm, f64 precision. Requires `x > 0`.
pub fn ln_f64(x: f64) -> f64 {
    assert!(x > 0.0, "ln of non-positive value");
    let small = power_f64(2.0, 2 - AGM_SCALE_M) / x;
    let agm = agm_f64(1.0, small);
    (PI / (2.0 * agm)) - AGM_SCALE_M as f64 * LN_2
}

/// log of `x` in an arbitrary base, as a ratio of natural logs.
pub fn logarithm_f32(x: f32, base: f32) -> f32 {
    ln_f32(x) / ln_f32(base)
}

/// log of `x` in an arbitrary base, f64 precision.
pub fn logarithm_f64(x: f64, base: f64) -> f64 {
    ln_f64(x) / ln_f64(base)
}

// ============================================================================
// Activations and Reductions
// ============================================================================

/// Standard logistic `1 / (1 + e^-x)`.
pub fn logistic_f32(x: f32) -> f32 {
    1.0 / (1.0 + exp_hybrid_f32(-x))
}

/// Standard logistic, f64 precision.
pub fn logistic_f64(x: f64) -> f64 {
    1.0 / (1.0 + exp_hybrid_f64(-x))
}

/// Softmax of one row, written into `out`. No max subtraction: inputs are
/// expected to be in training range, and the exponent sum accumulates in
/// f64 before normalization.
pub fn softmax_row_f32(row: &[f32], out: &mut [f32]) {
    assert_eq!(row.len(), out.len());
    let mut sum = 0.0f64;
    for (o, &v) in out.iter_mut().zip(row.iter()) {
        let e = exp_hybrid_f32(v);
        *o = e;
        sum += e as f64;
    }
    for o in out.iter_mut() {
        *o = (*o as f64 / sum) as f32;
    }
}

/// Softmax of one f64 row, written into `out`.
pub fn softmax_row_f64(row: &[f64], out: &mut [f64]) {
    assert_eq!(row.len(), out.len());
    let mut sum = 0.0f64;
    for (o, &v) in out.iter_mut().zip(row.iter()) {
        let e = exp_hybrid_f64(v);
        *o = e;
        sum += e;
    }
    for o in out.iter_mut() {
        *o /= sum;
    }
}

/// Row-wise softmax of a float tensor.
pub fn softmax(t: &Tensor) -> Tensor {
    let (rows, cols) = (t.rows(), t.cols());
    match t.storage() {
        Storage::F32(data) => {
            let mut out = alloc::vec![0.0f32; rows * cols];
            for r in 0..rows {
                let span = r * cols..(r + 1) * cols;
                softmax_row_f32(&data[span.clone()], &mut out[span]);
            }
            Tensor::from_storage(rows, cols, Storage::F32(out))
        }
        Storage::F64(data) => {
            let mut out = alloc::vec![0.0f64; rows * cols];
            for r in 0..rows {
                let span = r * cols..(r + 1) * cols;
                softmax_row_f64(&data[span.clone()], &mut out[span]);
            }
            Tensor::from_storage(rows, cols, Storage::F64(out))
        }
        Storage::I32(_) => panic!("softmax of integer tensor"),
    }
}

/// `ln(sum(e^x_i))` with max subtraction for stability.
pub fn log_sum_exp_f32(row: &[f32]) -> f32 {
    assert!(!row.is_empty(), "logsumexp of empty row");
    let mut max = row[0];
    for &v in &row[1..] {
        if v > max {
            max = v;
        }
    }
    let mut sum = 0.0f64;
    for &v in row {
        sum += exp_hybrid_f32(v - max) as f64;
    }
    max + ln_f32(sum as f32)
}

/// `ln(sum(e^x_i))` with max subtraction, f64 precision.
pub fn log_sum_exp_f64(row: &[f64]) -> f64 {
    assert!(!row.is_empty(), "logsumexp of empty row");
    let mut max = row[0];
    for &v in &row[1..] {
        if v > max {
            max = v;
        }
    }
    let mut sum = 0.0f64;
    for &v in row {
        sum += exp_hybrid_f64(v - max);
    }
    max + ln_f64(sum)
}

// ============================================================================
// Random Numbers
// ============================================================================

/// Linear congruential generator with an xorshift output mix.
#[derive(Debug, Clone)]
pub struct Rng {
    state: u64,
}

impl Rng {
    pub const fn new(seed: u64) -> Self {
        Self { state: seed }
    }

    pub fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(0x5851f42d4c957f2d)
            .wrapping_add(0x14057b7ef767814f);
        let mut x = self.state;
        x ^= x >> 33;
        x
    }

    /// Non-negative 31-bit value, the shape of a C `rand()` call.
    pub fn next_i31(&mut self) -> i32 {
        (self.next_u64() >> 33) as i32
    }

    /// Uniform in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        (self.next_u64() >> 40) as f32 / (1u64 << 24) as f32
    }
}

/// Gaussian sample by the polar (Marsaglia) method.
pub fn normal_random(rng: &mut Rng, mean: f32, stddev: f32) -> f32 {
    loop {
        let r1 = 2.0 * rng.next_f32() - 1.0;
        let r2 = 2.0 * rng.next_f32() - 1.0;
        let hypo = r1 * r1 + r2 * r2;
        if hypo < 1.0 && hypo != 0.0 {
            let mult = fast_sqrt_f32(-2.0 * ln_f32(hypo) / hypo);
            return mean + stddev * r1 * mult;
        }
    }
}

/// Collect `n` Gaussian samples, for initialization and tests.
pub fn normal_samples(rng: &mut Rng, mean: f32, stddev: f32, n: usize) -> Vec<f32> {
    (0..n).map(|_| normal_random(rng, mean, stddev)).collect()
}

// ============================================================================
// Tests
// ============================================================================
