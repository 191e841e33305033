use std::convert::TryFrom;

use anyhow::{anyhow, bail, Context, Result};
use chrono::{DateTime, Utc};

const F64_WIDTH: usize = std::mem::size_of::<f64>();

pub fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

pub fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

pub fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field}"))
}

/// Packs a vector as consecutive little-endian f64 values.
pub fn encode_f64_blob(values: &[f64]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_le_bytes()).collect()
}

pub fn decode_f64_blob(bytes: &[u8], field: &str) -> Result<Vec<f64>> {
    if bytes.len() % F64_WIDTH != 0 {
        bail!(
            "{field} blob has {} bytes, not a multiple of {F64_WIDTH}",
            bytes.len()
        );
    }
    Ok(bytes
        .chunks_exact(F64_WIDTH)
        .map(|chunk| {
            let mut buf = [0u8; F64_WIDTH];
            buf.copy_from_slice(chunk);
            f64::from_le_bytes(buf)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blob_round_trip_is_bit_exact() {
        let values = vec![
            0.0,
            -0.0,
            1.0 / 3.0,
            std::f64::consts::PI,
            f64::MIN_POSITIVE,
            f64::MAX,
            -1.5e-300,
            f64::INFINITY,
            f64::NAN,
        ];

        let decoded = decode_f64_blob(&encode_f64_blob(&values), "test").unwrap();
        assert_eq!(decoded.len(), values.len());
        for (a, b) in values.iter().zip(&decoded) {
            assert_eq!(a.to_bits(), b.to_bits());
        }
    }

    #[test]
    fn test_blob_layout_is_little_endian() {
        assert_eq!(encode_f64_blob(&[1.0]), 1.0f64.to_le_bytes().to_vec());
        assert!(encode_f64_blob(&[]).is_empty());
    }

    #[test]
    fn test_truncated_blob_is_rejected() {
        let mut bytes = encode_f64_blob(&[1.0, 2.0]);
        bytes.pop();
        assert!(decode_f64_blob(&bytes, "alpha").is_err());
    }

    #[test]
    fn test_integer_conversions() {
        assert_eq!(to_i64(42).unwrap(), 42);
        assert!(to_i64(u64::MAX).is_err());
        assert!(to_u64(-1, "tick_count").is_err());
    }
}
