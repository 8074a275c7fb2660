//! Payload ciphers
//!
//! The engine is cipher-agnostic: it derives a fresh key per capsule, draws
//! a random IV of `iv_len()` bytes and hands both to a `CipherProvider`.
//! The shipped providers are AES-128-CBC and AES-256-CBC with PKCS#7
//! padding. Every decryption error collapses into `CipherFailure` so a
//! caller cannot tell bad padding from a wrong key.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use tcrypto_core::CipherChoice;

use crate::error::{CryptoError, CryptoResult};

pub trait CipherProvider {
    fn encrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>>;

    fn decrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>>;

    /// Required IV length in bytes.
    fn iv_len(&self) -> usize;

    /// Required key length in bytes (at most 32).
    fn key_len(&self) -> usize;
}

/// AES block size; also the CBC IV length.
pub const AES_BLOCK_LEN: usize = 16;

#[derive(Debug, Clone, Copy, Default)]
pub struct Aes128Cbc;

#[derive(Debug, Clone, Copy, Default)]
pub struct Aes256Cbc;

impl CipherProvider for Aes128Cbc {
    fn encrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        cbc_encrypt::<cbc::Encryptor<aes::Aes128>>(data, iv, key)
    }

    fn decrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        cbc_decrypt::<cbc::Decryptor<aes::Aes128>>(data, iv, key)
    }

    fn iv_len(&self) -> usize {
        AES_BLOCK_LEN
    }

    fn key_len(&self) -> usize {
        16
    }
}

impl CipherProvider for Aes256Cbc {
    fn encrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        cbc_encrypt::<cbc::Encryptor<aes::Aes256>>(data, iv, key)
    }

    fn decrypt(&self, data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>> {
        cbc_decrypt::<cbc::Decryptor<aes::Aes256>>(data, iv, key)
    }

    fn iv_len(&self) -> usize {
        AES_BLOCK_LEN
    }

    fn key_len(&self) -> usize {
        32
    }
}

fn cbc_encrypt<E>(data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>>
where
    E: KeyIvInit + BlockEncryptMut,
{
    let encryptor = E::new_from_slices(key, iv).map_err(|_| CryptoError::CipherFailure)?;
    Ok(encryptor.encrypt_padded_vec_mut::<Pkcs7>(data))
}

fn cbc_decrypt<D>(data: &[u8], iv: &[u8], key: &[u8]) -> CryptoResult<Vec<u8>>
where
    D: KeyIvInit + BlockDecryptMut,
{
    let decryptor = D::new_from_slices(key, iv).map_err(|_| CryptoError::CipherFailure)?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(data)
        .map_err(|_| CryptoError::CipherFailure)
}

/// Build the configured cipher, if any.
pub fn from_choice(choice: CipherChoice) -> Option<Box<dyn CipherProvider>> {
    match choice {
        CipherChoice::None => None,
        CipherChoice::Aes128Cbc => Some(Box::new(Aes128Cbc)),
        CipherChoice::Aes256Cbc => Some(Box::new(Aes256Cbc)),
    }
}
