//! HMAC-SHA256 capsule authentication
//!
//! The stored MAC is HMAC-SHA256 truncated to `MAC_LEN` bytes. Verification
//! HMACs both the received and the recomputed MAC again under a fresh random
//! key and compares those outputs, so the compared bytes are unrelated to the
//! true MAC and a comparison that exits early reveals nothing about it.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::rng::RandomSource;
use crate::MAC_LEN;

type HmacSha256 = Hmac<Sha256>;

/// Length of the one-time key used for the second HMAC round.
pub const SECOND_ROUND_KEY_LEN: usize = 16;

/// Full 32-byte HMAC-SHA256.
pub fn hmac_sha256(key: &[u8], data: &[u8]) -> CryptoResult<[u8; 32]> {
    let mut mac = HmacSha256::new_from_slice(key)
        .map_err(|e| CryptoError::KeyDerivation(format!("HMAC key rejected: {e}")))?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().into())
}

/// HMAC-SHA256 truncated to the capsule MAC length.
pub fn capsule_mac(key: &[u8], header: &[u8]) -> CryptoResult<[u8; MAC_LEN]> {
    let mut full = hmac_sha256(key, header)?;
    let mut mac = [0u8; MAC_LEN];
    mac.copy_from_slice(&full[..MAC_LEN]);
    full.zeroize();
    Ok(mac)
}

/// Double-HMAC comparison of a received MAC against the expected one.
///
/// Fails with `RandomnessUnavailable` if the one-time key cannot be drawn.
pub fn verify(received: &[u8], expected: &[u8], rng: &dyn RandomSource) -> CryptoResult<bool> {
    let mut round_key = [0u8; SECOND_ROUND_KEY_LEN];
    rng.fill(&mut round_key)?;

    let a = hmac_sha256(&round_key, received);
    let b = hmac_sha256(&round_key, expected);
    round_key.zeroize();

    Ok(constant_time_eq(&a?, &b?))
}

/// Length-checked comparison whose running time does not depend on where
/// the inputs first differ. Empty inputs never compare equal.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.is_empty() || a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
