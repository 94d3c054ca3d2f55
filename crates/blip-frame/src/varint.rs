//! Unsigned LEB128 varints.
//!
//! Seven data bits per byte, least-significant group first, high bit set on
//! every byte but the last. Message numbers and the properties-size prefix
//! use this encoding.

/// Maximum encoded length of a 64-bit value.
pub const MAX_VARINT_LEN64: usize = 10;

/// Encode `value` into `dst` and return the number of bytes written.
///
/// `dst` must be at least [`MAX_VARINT_LEN64`] bytes.
pub fn put_uvarint(dst: &mut [u8], mut value: u64) -> usize {
    let mut i = 0;
    while value >= 0x80 {
        dst[i] = (value as u8) | 0x80;
        value >>= 7;
        i += 1;
    }
    dst[i] = value as u8;
    i + 1
}

/// Encoded length of `value`: `max(1, ceil(bits/7))`.
pub fn uvarint_len(value: u64) -> usize {
    if value == 0 {
        1
    } else {
        (64 - value.leading_zeros() as usize).div_ceil(7)
    }
}

/// Decode a varint from the front of `cursor`, advancing it past the
/// encoding on success.
///
/// Returns `None` if the slice ends mid-varint or the encoding overflows 64
/// bits; `cursor` is left untouched in that case.
pub fn read_uvarint(cursor: &mut &[u8]) -> Option<u64> {
    let mut value: u64 = 0;
    for (i, &byte) in cursor.iter().enumerate() {
        if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
            // The 10th byte may only carry the top bit of a u64.
            return None;
        }
        value |= u64::from(byte & 0x7f) << (7 * i);
        if byte & 0x80 == 0 {
            *cursor = &cursor[i + 1..];
            return Some(value);
        }
    }
    None
}

/// Decode a varint that must fit in 32 bits.
///
/// Returns `None` (without advancing) on truncation or when the value
/// exceeds `u32::MAX`.
pub fn read_uvarint32(cursor: &mut &[u8]) -> Option<u32> {
    let mut probe = *cursor;
    let value = read_uvarint(&mut probe)?;
    let value = u32::try_from(value).ok()?;
    *cursor = probe;
    Some(value)
}
