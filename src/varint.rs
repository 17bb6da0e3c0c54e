//! LEB128 varints with zigzag mapping, used for packed coordinate streams.

pub fn encode_varint(mut value: u64, out: &mut Vec<u8>) {
    while value >= 0x80 {
        out.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    out.push(value as u8);
}

/// Reads one varint at `*pos` and advances past it. Returns `None` on a
/// truncated or over-long encoding.
pub fn decode_varint(data: &[u8], pos: &mut usize) -> Option<u64> {
    let mut value = 0u64;
    let mut shift = 0u32;
    loop {
        let byte = *data.get(*pos)?;
        *pos += 1;
        let payload = u64::from(byte & 0x7F);
        if shift == 63 && payload > 1 || shift > 63 {
            return None;
        }
        value |= payload << shift;
        if byte & 0x80 == 0 {
            return Some(value);
        }
        shift += 7;
    }
}

#[inline]
pub fn zigzag_encode(value: i64) -> u64 {
    ((value << 1) ^ (value >> 63)) as u64
}

#[inline]
pub fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

pub fn encode_signed(value: i64, out: &mut Vec<u8>) {
    encode_varint(zigzag_encode(value), out);
}

pub fn decode_signed(data: &[u8], pos: &mut usize) -> Option<i64> {
    decode_varint(data, pos).map(zigzag_decode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_single_byte_boundary() {
        let mut out = Vec::new();
        encode_varint(127, &mut out);
        assert_eq!(out, vec![0x7F]);
        out.clear();
        encode_varint(128, &mut out);
        assert_eq!(out, vec![0x80, 0x01]);
    }

    #[test]
    fn test_sequential_reads() {
        let mut out = Vec::new();
        for value in [5, 300, 70_000] {
            encode_varint(value, &mut out);
        }
        let mut pos = 0;
        assert_eq!(decode_varint(&out, &mut pos), Some(5));
        assert_eq!(decode_varint(&out, &mut pos), Some(300));
        assert_eq!(decode_varint(&out, &mut pos), Some(70_000));
        assert_eq!(pos, out.len());
        assert_eq!(decode_varint(&out, &mut pos), None);
    }

    #[test]
    fn test_truncated_input() {
        let mut pos = 0;
        assert_eq!(decode_varint(&[0x80, 0x80], &mut pos), None);
    }

    #[test]
    fn test_zigzag_small_values() {
        assert_eq!(zigzag_encode(0), 0);
        assert_eq!(zigzag_encode(-1), 1);
        assert_eq!(zigzag_encode(1), 2);
        assert_eq!(zigzag_encode(-2), 3);
    }

    proptest! {
        #[test]
        fn signed_values_survive(value in any::<i64>()) {
            let mut out = Vec::new();
            encode_signed(value, &mut out);
            let mut pos = 0;
            prop_assert_eq!(decode_signed(&out, &mut pos), Some(value));
            prop_assert_eq!(pos, out.len());
        }
    }
}
