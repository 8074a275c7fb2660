//! tcrypto-crypto: tamper-evident state capsules for untrusted storage
//!
//! A capsule carries a small key-value map through storage the application
//! does not trust (a cookie, a token, a file). It is authenticated with
//! HMAC-SHA256 and, when a cipher is configured, encrypted with AES-CBC.
//!
//! Wire format:
//! ```text
//! MAC(16) || key_version || '$' || base36(timestamp, 6) || base36(expiry, 6) || payload
//!                                                                              └── IV || ciphertext  (cipher active)
//! ```
//!
//! Key setup, per capsule:
//! ```text
//! mac_key    = pool ++ ts ++ exp ++ auth_seed                      (unhashed)
//! cipher_key = SHA-512(pool ++ ts ++ exp ++ iv ++ enc_seed)[..key_len]
//! ```
//!
//! Pipeline: map → json → [zstd, plaintext capsules only] → encrypt → frame → MAC

pub mod base36;
pub mod capsule;
pub mod cipher;
pub mod clock;
pub mod error;
pub mod kdf;
pub mod keyfile;
pub mod keys;
pub mod mac;
pub mod pipeline;
pub mod rng;

pub use capsule::{Capsule, CapsuleOptions};
pub use cipher::{Aes128Cbc, Aes256Cbc, CipherProvider};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CryptoError, CryptoResult};
pub use keyfile::{FileKeyProvider, KeyFile};
pub use keys::{KeyMaterial, KeyPair, KeyProvider, KeyRing, KeyRole};
pub use pipeline::{CompressStage, DataMap, JsonStage, Pipeline, StageData, TransformStage};
pub use rng::{OsRandom, RandomSource};

/// Length of the stored (truncated) MAC
pub const MAC_LEN: usize = 16;

/// Separates the key version from the time fields
pub const VERSION_DELIMITER: u8 = b'$';

/// Minimum length of an authentication or encryption key
pub const MIN_KEY_LEN: usize = 32;

/// Width of each base36 time field
pub const TIME_FIELD_LEN: usize = 6;
