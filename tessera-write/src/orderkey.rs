//! Order-key encoders: map native little-endian values to `u64` keys whose
//! unsigned order matches the natural order of the datatype.
//!
//! Signed integers flip the sign bit; floats use the IEEE-754 trick
//! (negatives inverted, positives flip the sign bit). Keys are only ever
//! compared within one dimension, so widths below 64 bits zero-extend.

use crate::schema::Datatype;

/// Order key of one fixed-width value. `bytes` must be exactly
/// `datatype.size()` long.
#[inline]
pub fn order_key(bytes: &[u8], datatype: Datatype) -> u64 {
    debug_assert_eq!(bytes.len() as u64, datatype.size());
    match datatype {
        Datatype::Int8 => ((bytes[0] ^ 0x80) as u64),
        Datatype::UInt8 | Datatype::StringAscii => bytes[0] as u64,
        Datatype::Int16 => {
            (u16::from_le_bytes([bytes[0], bytes[1]]) ^ 0x8000) as u64
        }
        Datatype::UInt16 => u16::from_le_bytes([bytes[0], bytes[1]]) as u64,
        Datatype::Int32 => {
            (u32::from_le_bytes(bytes.try_into().unwrap()) ^ 0x8000_0000) as u64
        }
        Datatype::UInt32 => {
            u32::from_le_bytes(bytes.try_into().unwrap()) as u64
        }
        Datatype::Int64 => {
            u64::from_le_bytes(bytes.try_into().unwrap())
                ^ 0x8000_0000_0000_0000
        }
        Datatype::UInt64 => u64::from_le_bytes(bytes.try_into().unwrap()),
        Datatype::Float32 => {
            let mut bits = u32::from_le_bytes(bytes.try_into().unwrap());
            if bits & 0x8000_0000 != 0 {
                bits = !bits;
            } else {
                bits ^= 0x8000_0000;
            }
            bits as u64
        }
        Datatype::Float64 => {
            let mut bits = u64::from_le_bytes(bytes.try_into().unwrap());
            if bits & 0x8000_0000_0000_0000 != 0 {
                bits = !bits;
            } else {
                bits ^= 0x8000_0000_0000_0000;
            }
            bits
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key_i32(v: i32) -> u64 {
        order_key(&v.to_le_bytes(), Datatype::Int32)
    }

    fn key_f64(v: f64) -> u64 {
        order_key(&v.to_le_bytes(), Datatype::Float64)
    }

    #[test]
    fn int_keys_preserve_order() {
        let values = [i32::MIN, -5, -1, 0, 1, 7, i32::MAX];
        for w in values.windows(2) {
            assert!(key_i32(w[0]) < key_i32(w[1]), "{} vs {}", w[0], w[1]);
        }
        // 1 -> 0x80000001, as asserted in pruning elsewhere
        assert_eq!(key_i32(1), 0x8000_0001);
    }

    #[test]
    fn float_keys_preserve_order() {
        let values = [f64::NEG_INFINITY, -2.5, -0.0, 0.0, 1e-9, 3.5, f64::INFINITY];
        for w in values.windows(2) {
            assert!(key_f64(w[0]) <= key_f64(w[1]), "{} vs {}", w[0], w[1]);
        }
        assert!(key_f64(-0.5) < key_f64(0.5));
    }

    #[test]
    fn unsigned_keys_are_identity() {
        assert_eq!(order_key(&42u8.to_le_bytes(), Datatype::UInt8), 42);
        assert_eq!(
            order_key(&7u64.to_le_bytes(), Datatype::UInt64),
            7
        );
    }
}
