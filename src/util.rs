const HEX: &[u8; 16] = b"0123456789abcdef";

#[inline]
pub(crate) fn mix_u64(mut x: u64) -> u64 {
    x ^= x >> 30;
    x = x.wrapping_mul(0xbf58_476d_1ce4_e5b9);
    x ^= x >> 27;
    x = x.wrapping_mul(0x94d0_49bb_1331_11eb);
    x ^ (x >> 31)
}

/// Append the 8 lowercase hex digits of `value` to `out`.
#[inline]
pub(crate) fn push_u32_hex_8(out: &mut String, value: u32) {
    for shift in (0..8).rev() {
        let nibble = ((value >> (shift * 4)) & 0xf) as usize;
        out.push(char::from(HEX[nibble]));
    }
}

/// Build an id of the form `{prefix}_{8 hex digits}`.
#[inline]
pub(crate) fn short_prefixed_id(prefix: &str, value: u32) -> String {
    let mut out = String::with_capacity(prefix.len() + 9);
    out.push_str(prefix);
    out.push('_');
    push_u32_hex_8(&mut out, value);
    out
}

/// Take at most `max_chars` characters from `text` without splitting a code point.
#[must_use]
pub(crate) fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
