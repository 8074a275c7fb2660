//! Fixed-width base-36 codec for the capsule time fields
//!
//! Digits are `0-9a-z`, most significant first, left-padded with `0`.
//! Decoding accepts upper-case letters as well.

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";

/// Encode `value` as exactly `width` base-36 digits.
///
/// Returns `None` if the value needs more than `width` digits.
pub fn encode(mut value: u64, width: usize) -> Option<Vec<u8>> {
    let mut out = vec![b'0'; width];
    for slot in out.iter_mut().rev() {
        *slot = DIGITS[(value % 36) as usize];
        value /= 36;
    }
    (value == 0).then_some(out)
}

/// Decode a base-36 field. Empty input or any non-alphanumeric byte is rejected.
pub fn decode(field: &[u8]) -> Option<u64> {
    if field.is_empty() {
        return None;
    }

    field.iter().try_fold(0u64, |acc, &b| {
        let digit = match b {
            b'0'..=b'9' => b - b'0',
            b'a'..=b'z' => b - b'a' + 10,
            b'A'..=b'Z' => b - b'A' + 10,
            _ => return None,
        };
        acc.checked_mul(36)?.checked_add(u64::from(digit))
    })
}
