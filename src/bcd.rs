//! Telephony BCD / TBCD digit strings.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NibbleOrder {
    /// TBCD: low nibble is the first digit.
    Swapped,
    /// Plain BCD: high nibble first.
    Packed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DigitSet {
    /// `0-9` only; any other nibble ends the string.
    Strict,
    /// `0xA..=0xE` map to `* # a b c`.
    Extended,
}

const FILLER: u8 = 0x0F;

#[inline]
fn digit_char(nibble: u8, set: DigitSet) -> Option<char> {
    match (nibble, set) {
        (0..=9, _) => Some(char::from(b'0' + nibble)),
        (0x0A, DigitSet::Extended) => Some('*'),
        (0x0B, DigitSet::Extended) => Some('#'),
        (0x0C, DigitSet::Extended) => Some('a'),
        (0x0D, DigitSet::Extended) => Some('b'),
        (0x0E, DigitSet::Extended) => Some('c'),
        _ => None,
    }
}

/// Decodes a digit string. A `0xF` filler nibble (or, for
/// [`DigitSet::Strict`], any non-decimal nibble) ends decoding.
pub fn decode_digits(bytes: &[u8], order: NibbleOrder, set: DigitSet) -> String {
    let mut digits = String::with_capacity(bytes.len() * 2);
    for &b in bytes {
        let (first, second) = match order {
            NibbleOrder::Swapped => (b & 0x0F, b >> 4),
            NibbleOrder::Packed => (b >> 4, b & 0x0F),
        };
        for nibble in [first, second] {
            if nibble == FILLER {
                return digits;
            }
            match digit_char(nibble, set) {
                Some(c) => digits.push(c),
                None => return digits,
            }
        }
    }
    digits
}

#[inline]
pub fn decode_tbcd(bytes: &[u8]) -> String {
    decode_digits(bytes, NibbleOrder::Swapped, DigitSet::Strict)
}

/// Removes the first matching prefix, once, and only when `digits` is
/// longer than `min_len`.
pub fn strip_prefix<S: AsRef<str>>(digits: &str, prefixes: &[S], min_len: usize) -> String {
    if digits.len() <= min_len {
        return digits.to_owned();
    }
    prefixes
        .iter()
        .find_map(|p| digits.strip_prefix(p.as_ref()))
        .unwrap_or(digits)
        .to_owned()
}

/// Inverse of [`decode_tbcd`]. Returns `None` for non-decimal input.
pub fn encode_tbcd(digits: &str) -> Option<Vec<u8>> {
    let nibbles: Vec<u8> = digits
        .bytes()
        .map(|c| c.is_ascii_digit().then(|| c - b'0'))
        .collect::<Option<_>>()?;
    Some(
        nibbles
            .chunks(2)
            .map(|pair| (pair.get(1).copied().unwrap_or(FILLER) << 4) | pair[0])
            .collect(),
    )
}

/// Three-octet PLMN identity as `"MCC-MNC"`.
pub fn decode_plmn(bytes: &[u8]) -> Option<String> {
    let &[b0, b1, b2] = bytes else {
        return None;
    };
    let nibbles = [b0 & 0x0F, b0 >> 4, b1 & 0x0F, b2 & 0x0F, b2 >> 4, b1 >> 4];
    if nibbles[..5].iter().any(|&n| n > 9) || (nibbles[5] > 9 && nibbles[5] != FILLER) {
        return None;
    }
    let mut out = String::with_capacity(7);
    for (i, &n) in nibbles.iter().enumerate() {
        if i == 3 {
            out.push('-');
        }
        if n != FILLER {
            out.push(char::from(b'0' + n));
        }
    }
    Some(out)
}

/// IMEI with a trailing software-version digit is cut to 15 digits.
pub fn normalize_imei(digits: &str) -> &str {
    if digits.len() == 16 {
        &digits[..15]
    } else {
        digits
    }
}
