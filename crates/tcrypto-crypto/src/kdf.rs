//! Key setup: concatenation of the entropy pool and per-capsule fields,
//! optionally compressed through truncated SHA-512.
//!
//! The MAC key is the raw concatenation. The cipher key is the concatenation
//! hashed and truncated to the cipher's key length. Changing either rule
//! changes every capsule byte, so both are fixed.

use sha2::{Digest, Sha512};
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::KeyMaterial;

/// Longest output `hash` will produce.
pub const MAX_HASH_LEN: usize = 32;

/// SHA-512 of `data`, truncated to `len` bytes (`len <= 32`).
pub fn hash(data: &[u8], len: usize) -> CryptoResult<KeyMaterial> {
    if len > MAX_HASH_LEN {
        return Err(CryptoError::KeyDerivation(format!(
            "cannot hash keys longer than {MAX_HASH_LEN} bytes (requested {len})"
        )));
    }

    let mut digest = Sha512::digest(data);
    let key = KeyMaterial::from_slice(&digest[..len]);
    digest.as_mut_slice().zeroize();
    Ok(key)
}

/// `pool[0] ++ .. ++ pool[n] ++ fields[0] ++ .. ++ fields[m]`
pub fn setup_key(pool: &[Vec<u8>], fields: &[&[u8]]) -> CryptoResult<KeyMaterial> {
    if fields.is_empty() {
        return Err(CryptoError::KeyDerivation(
            "key construction needs at least one field".into(),
        ));
    }

    let len = pool.iter().map(Vec::len).sum::<usize>()
        + fields.iter().map(|f| f.len()).sum::<usize>();
    let mut key = Vec::with_capacity(len);
    for part in pool {
        key.extend_from_slice(part);
    }
    for field in fields {
        key.extend_from_slice(field);
    }
    Ok(KeyMaterial::from_vec(key))
}

/// Per-capsule cipher key: `hash(pool ++ timestamp ++ expiry ++ iv ++ seed)`.
pub fn derive_cipher_key(
    pool: &[Vec<u8>],
    timestamp: u64,
    expiry: u64,
    iv: &[u8],
    seed: &KeyMaterial,
    key_len: usize,
) -> CryptoResult<KeyMaterial> {
    let ts = timestamp.to_string();
    let exp = expiry.to_string();
    let material = setup_key(
        pool,
        &[ts.as_bytes(), exp.as_bytes(), iv, seed.as_bytes()],
    )?;
    hash(material.as_bytes(), key_len)
}

/// Per-capsule MAC key: `pool ++ timestamp ++ expiry ++ seed`, unhashed.
pub fn derive_mac_key(
    pool: &[Vec<u8>],
    timestamp: u64,
    expiry: u64,
    seed: &KeyMaterial,
) -> CryptoResult<KeyMaterial> {
    let ts = timestamp.to_string();
    let exp = expiry.to_string();
    setup_key(pool, &[ts.as_bytes(), exp.as_bytes(), seed.as_bytes()])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_truncates_sha512() {
        let full = Sha512::digest(b"abc");
        let short = hash(b"abc", 16).unwrap();
        assert_eq!(short.as_bytes(), &full[..16]);
        assert_eq!(hash(b"abc", 32).unwrap().len(), 32);
    }

    #[test]
    fn test_hash_rejects_long_output() {
        assert!(matches!(hash(b"abc", 33), Err(CryptoError::KeyDerivation(_))));
    }

    #[test]
    fn test_setup_key_concatenates_in_order() {
        let pool = vec![b"10.0.0.1".to_vec(), b"|ua".to_vec()];
        let key = setup_key(&pool, &[b"123", b"456", b"seed"]).unwrap();
        assert_eq!(key.as_bytes(), b"10.0.0.1|ua123456seed");
    }

    #[test]
    fn test_setup_key_requires_fields() {
        assert!(setup_key(&[b"pool".to_vec()], &[]).is_err());
    }

    #[test]
    fn test_mac_key_is_unhashed() {
        let seed = KeyMaterial::from_vec(vec![0x41; 32]);
        let key = derive_mac_key(&[], 1000, 4600, &seed).unwrap();

        let mut expected = b"10004600".to_vec();
        expected.extend_from_slice(&[0x41; 32]);
        assert_eq!(key.as_bytes(), expected.as_slice());
    }

    #[test]
    fn test_cipher_key_depends_on_iv() {
        let seed = KeyMaterial::from_vec(vec![0x41; 32]);
        let a = derive_cipher_key(&[], 1000, 4600, &[0u8; 16], &seed, 32).unwrap();
        let b = derive_cipher_key(&[], 1000, 4600, &[1u8; 16], &seed, 32).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_entropy_pool_changes_keys() {
        let seed = KeyMaterial::from_vec(vec![0x41; 32]);
        let a = derive_mac_key(&[b"10.0.0.1".to_vec()], 1, 2, &seed).unwrap();
        let b = derive_mac_key(&[b"10.0.0.2".to_vec()], 1, 2, &seed).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }
}
