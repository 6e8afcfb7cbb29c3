//! # Fixed-Width Text Persistence
//!
//! Tensors serialize as fixed 16-byte fields: 15 characters of
//! zero-padded decimal (six fractional digits, a leading `-` replacing one
//! integer digit for negatives) followed by a space, or a newline for the
//! last field of a row. The format needs no float printing or parsing
//! support from the host; both directions are positional powers of ten.

use alloc::string::String;

use crate::error::{SynapseError, SynapseResult};
use crate::tensor::{DType, Tensor, Value};

/// Serialized size of one value, separator included
pub const FIELD_BYTES: usize = 16;

const FRAC_DIGITS: usize = 6;
const FRAC_SCALE: f64 = 1_000_000.0;

/// Largest magnitude the integer field can carry
const MAX_MAGNITUDE: f32 = 1.0e8;

// ============================================================================
// Single values
// ============================================================================

/// Render one value into its fixed 16-byte field.
pub fn format_value(value: f32, last_in_row: bool) -> [u8; FIELD_BYTES] {
    let magnitude = if value < 0.0 { -value } else { value };
    assert!(magnitude < MAX_MAGNITUDE, "value too large for fixed-width format");

    let negative = value < 0.0;
    let dec = value as i64;
    let frac = if value >= 0.0 {
        ((value as f64 - dec as f64) * FRAC_SCALE) as i64
    } else {
        ((dec as f64 - value as f64) * FRAC_SCALE) as i64
    };
    let frac = frac.clamp(0, 999_999) as u64;

    let mut buf = [b'0'; FIELD_BYTES];
    let int_digits = if negative { 7 } else { 8 };
    let mut start = 0;
    if negative {
        buf[0] = b'-';
        start = 1;
    }

    let mut rem = dec.unsigned_abs();
    for i in (0..int_digits).rev() {
        buf[start + i] = b'0' + (rem % 10) as u8;
        rem /= 10;
    }
    buf[start + int_digits] = b'.';

    let mut rem = frac;
    for i in (0..FRAC_DIGITS).rev() {
        buf[start + int_digits + 1 + i] = b'0' + (rem % 10) as u8;
        rem /= 10;
    }

    buf[FIELD_BYTES - 1] = if last_in_row { b'\n' } else { b' ' };
    buf
}

/// Parse one 16-byte field back into an f32.
pub fn parse_value(field: &[u8]) -> Option<f32> {
    if field.len() != FIELD_BYTES {
        return None;
    }
    let terminator = field[FIELD_BYTES - 1];
    if terminator != b' ' && terminator != b'\n' {
        return None;
    }

    let body = &field[..FIELD_BYTES - 1];
    let (negative, digits) = match body.first() {
        Some(b'-') => (true, &body[1..]),
        Some(_) => (false, body),
        None => return None,
    };

    let mut integer = 0.0f64;
    let mut idx = 0;
    while idx < digits.len() && digits[idx] != b'.' {
        let d = digits[idx];
        if !d.is_ascii_digit() {
            return None;
        }
        integer = integer * 10.0 + (d - b'0') as f64;
        idx += 1;
    }
    if idx >= digits.len() {
        return None;
    }

    // Skip the decimal point
    idx += 1;
    let mut fraction = 0.0f64;
    let mut scale = 0.1f64;
    while idx < digits.len() {
        let d = digits[idx];
        if !d.is_ascii_digit() {
            return None;
        }
        fraction += (d - b'0') as f64 * scale;
        scale *= 0.1;
        idx += 1;
    }

    let value = integer + fraction;
    Some(if negative { -value as f32 } else { value as f32 })
}

// ============================================================================
// Whole tensors
// ============================================================================

/// Serialize a tensor row by row. Every dtype renders through f32.
pub fn encode_matrix(t: &Tensor) -> String {
    let mut out = String::with_capacity(t.len() * FIELD_BYTES);
    for r in 0..t.rows() {
        for c in 0..t.cols() {
            let field = format_value(t.get(r, c).to_f32(), c == t.cols() - 1);
            for &b in &field {
                out.push(b as char);
            }
        }
    }
    out
}

/// Deserialize into an existing tensor, whose shape and dtype decide the
/// layout and element conversion.
pub fn decode_matrix(text: &str, dest: &mut Tensor) -> SynapseResult<()> {
    let bytes = text.as_bytes();
    let expected = dest.len();
    if bytes.len() != expected * FIELD_BYTES {
        return Err(SynapseError::LengthMismatch {
            expected,
            actual: bytes.len() / FIELD_BYTES,
        });
    }
    let cols = dest.cols();
    for i in 0..expected {
        let field = &bytes[i * FIELD_BYTES..(i + 1) * FIELD_BYTES];
        let v = parse_value(field).ok_or(SynapseError::ParseField { index: i })?;
        let value = match dest.dtype() {
            DType::F32 => Value::F32(v),
            DType::F64 => Value::F64(v as f64),
            DType::I32 => Value::I32(v as i32),
        };
        dest.set(i / cols, i % cols, value);
    }
    Ok(())
}

// ============================================================================
// File helpers (std)
// ============================================================================

#[cfg(feature = "std")]
pub fn write_tensor<P: AsRef<std::path::Path>>(path: P, t: &Tensor) -> SynapseResult<()> {
    std::fs::write(path, encode_matrix(t))?;
    Ok(())
}

#[cfg(feature = "std")]
pub fn read_tensor<P: AsRef<std::path::Path>>(path: P, dest: &mut Tensor) -> SynapseResult<()> {
    let text = std::fs::read_to_string(path)?;
    decode_matrix(&text, dest)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn format_positive_field() {
        let field = format_value(3.14, false);
        assert_eq!(&field, b"00000003.140000 ");
    }

    #[test]
    fn format_negative_field_keeps_width() {
        let field = format_value(-2.5, true);
        assert_eq!(&field, b"-0000002.500000\n");
    }

    #[test]
    fn format_zero() {
        let field = format_value(0.0, false);
        assert_eq!(&field, b"00000000.000000 ");
    }

    #[test]
    fn parse_inverts_format() {
        for v in [0.0f32, 1.0, -1.0, 3.14159, -273.15, 65536.5, 0.000125] {
            let field = format_value(v, false);
            let back = parse_value(&field).unwrap();
            assert_abs_diff_eq!(back, v, epsilon = 2.0e-5 * (1.0 + v.abs()));
        }
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(parse_value(b"not a number at!").is_none());
        assert!(parse_value(b"short").is_none());
        // Valid digits but missing terminator
        assert!(parse_value(b"00000001.0000000").is_none());
    }

    #[test]
    fn matrix_round_trip() {
        let t = Tensor::from_f32(2, 3, &[1.5, -2.25, 0.0, 10.125, -0.5, 99.0]);
        let text = encode_matrix(&t);
        assert_eq!(text.len(), 6 * FIELD_BYTES);
        // Rows end in newlines
        assert_eq!(text.as_bytes()[3 * FIELD_BYTES - 1], b'\n');

        let mut back = Tensor::zeros(crate::tensor::DType::F32, 2, 3);
        decode_matrix(&text, &mut back).unwrap();
        for r in 0..2 {
            for c in 0..3 {
                assert_abs_diff_eq!(
                    back.get(r, c).as_f32(),
                    t.get(r, c).as_f32(),
                    epsilon = 1.0e-4
                );
            }
        }
    }

    #[test]
    fn decode_into_integer_tensor_truncates() {
        let t = Tensor::from_i32(1, 2, &[7, -3]);
        let text = encode_matrix(&t);
        let mut back = Tensor::zeros(crate::tensor::DType::I32, 1, 2);
        decode_matrix(&text, &mut back).unwrap();
        assert_eq!(back.i32_data(), &[7, -3]);
    }

    #[test]
    fn decode_length_mismatch() {
        let t = Tensor::from_f32(1, 2, &[1.0, 2.0]);
        let text = encode_matrix(&t);
        let mut wrong = Tensor::zeros(crate::tensor::DType::F32, 2, 2);
        assert_eq!(
            decode_matrix(&text, &mut wrong),
            Err(SynapseError::LengthMismatch { expected: 4, actual: 2 })
        );
    }

    #[cfg(feature = "std")]
    #[test]
    fn file_round_trip() {
        let dir = std::env::temp_dir().join("synapse-textio-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("weights.txt");

        let t = Tensor::from_f32(2, 2, &[0.25, -0.75, 4.5, -8.125]);
        write_tensor(&path, &t).unwrap();
        let mut back = Tensor::zeros(crate::tensor::DType::F32, 2, 2);
        read_tensor(&path, &mut back).unwrap();
        for i in 0..4 {
            assert_abs_diff_eq!(back.f32_data()[i], t.f32_data()[i], epsilon = 1.0e-4);
        }
        std::fs::remove_file(&path).ok();
    }
}
