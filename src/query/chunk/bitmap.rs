//! Null bitmap helpers
//!
//! Column validity uses 1 bit per row, least significant bit first. A set
//! bit marks a present value, a cleared bit marks NULL.

/// Read the validity bit for `index`
#[inline]
pub fn get_bit(bitmap: &[u8], index: usize) -> bool {
    bitmap
        .get(index / 8)
        .map(|b| (b >> (index % 8)) & 1 == 1)
        .unwrap_or(false)
}

/// Append one validity bit at position `len` (the current bit count)
#[inline]
pub fn push_bit(bitmap: &mut Vec<u8>, len: usize, valid: bool) {
    if len % 8 == 0 {
        bitmap.push(0);
    }
    if valid {
        let last = bitmap.len() - 1;
        bitmap[last] |= 1 << (len % 8);
    }
}

/// Append `count` identical validity bits starting at position `len`
pub fn push_bits(bitmap: &mut Vec<u8>, len: usize, count: usize, valid: bool) {
    let mut pos = len;
    let end = len + count;

    // Fill the partial byte bit by bit, then whole bytes at once
    while pos < end && pos % 8 != 0 {
        push_bit(bitmap, pos, valid);
        pos += 1;
    }
    let full = (end - pos) / 8;
    let fill = if valid { 0xFF } else { 0x00 };
    bitmap.extend(std::iter::repeat(fill).take(full));
    pos += full * 8;
    while pos < end {
        push_bit(bitmap, pos, valid);
        pos += 1;
    }
}

/// Count set bits in `[start, end)`
pub fn count_ones(bitmap: &[u8], start: usize, end: usize) -> usize {
    if start >= end {
        return 0;
    }
    let mut count = 0usize;
    let mut pos = start;

    while pos < end && pos % 8 != 0 {
        count += get_bit(bitmap, pos) as usize;
        pos += 1;
    }
    while pos + 8 <= end {
        count += bitmap.get(pos / 8).map(|b| b.count_ones() as usize).unwrap_or(0);
        pos += 8;
    }
    while pos < end {
        count += get_bit(bitmap, pos) as usize;
        pos += 1;
    }
    count
}

/// Slice a validity bitmap for the bit range `[start, end)`
///
/// Returns a new bitmap whose bit 0 is the source bit `start`.
pub fn slice_bitmap(bitmap: &[u8], start: usize, end: usize) -> Vec<u8> {
    let count = end.saturating_sub(start);
    if count == 0 {
        return Vec::new();
    }

    let mut result = vec![0u8; count.div_ceil(8)];
    for i in 0..count {
        let src_idx = start + i;
        let src_byte = src_idx / 8;

        // Missing source bytes read as NULL
        if src_byte < bitmap.len() {
            let bit_value = (bitmap[src_byte] >> (src_idx % 8)) & 1;
            result[i / 8] |= bit_value << (i % 8);
        }
    }
    result
}
