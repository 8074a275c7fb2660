//! Key material, key roles, and the in-memory key ring
//!
//! Every key version carries two independent keys: one for authentication
//! (the HMAC seed) and one for encryption (the cipher key seed). Both must be
//! at least `MIN_KEY_LEN` bytes.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::{MIN_KEY_LEN, VERSION_DELIMITER};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyRole {
    Authentication,
    Encryption,
}

impl KeyRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyRole::Authentication => "authentication",
            KeyRole::Encryption => "encryption",
        }
    }
}

impl fmt::Display for KeyRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Owned key bytes. Zeroized on drop.
#[derive(Clone, Default)]
pub struct KeyMaterial {
    bytes: Vec<u8>,
}

impl KeyMaterial {
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.to_vec(),
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Fail with `InsufficientKeyMaterial` unless the key is at least 32 bytes.
    pub fn require(self, role: KeyRole) -> CryptoResult<Self> {
        if self.bytes.len() < MIN_KEY_LEN {
            return Err(CryptoError::InsufficientKeyMaterial {
                role,
                len: self.bytes.len(),
            });
        }
        Ok(self)
    }
}

impl Drop for KeyMaterial {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("len", &self.bytes.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Resolves key versions to key bytes.
///
/// A version or role that simply does not exist yields empty key material,
/// not an error; callers check the length. `KeyLookupFailure` is reserved for
/// a backing store that cannot be read at all.
pub trait KeyProvider {
    /// `version: None` selects the primary version.
    fn key_by_version(&self, role: KeyRole, version: Option<&str>) -> CryptoResult<KeyMaterial>;

    fn primary_key_version(&self) -> CryptoResult<String>;
}

impl<K: KeyProvider + ?Sized> KeyProvider for Arc<K> {
    fn key_by_version(&self, role: KeyRole, version: Option<&str>) -> CryptoResult<KeyMaterial> {
        (**self).key_by_version(role, version)
    }

    fn primary_key_version(&self) -> CryptoResult<String> {
        (**self).primary_key_version()
    }
}

impl<K: KeyProvider + ?Sized> KeyProvider for Box<K> {
    fn key_by_version(&self, role: KeyRole, version: Option<&str>) -> CryptoResult<KeyMaterial> {
        (**self).key_by_version(role, version)
    }

    fn primary_key_version(&self) -> CryptoResult<String> {
        (**self).primary_key_version()
    }
}

/// Reject version identifiers that cannot be framed.
pub fn validate_version(version: &str) -> CryptoResult<()> {
    if version.is_empty() || version.as_bytes().contains(&VERSION_DELIMITER) {
        return Err(CryptoError::InvalidKeyVersion(version.to_string()));
    }
    Ok(())
}

/// Both keys of one key version.
#[derive(Debug, Clone)]
pub struct KeyPair {
    pub authentication: KeyMaterial,
    pub encryption: KeyMaterial,
    /// Unix seconds
    pub created_at: u64,
}

impl KeyPair {
    pub fn new(authentication: KeyMaterial, encryption: KeyMaterial, created_at: u64) -> Self {
        Self {
            authentication,
            encryption,
            created_at,
        }
    }

    pub fn get(&self, role: KeyRole) -> &KeyMaterial {
        match role {
            KeyRole::Authentication => &self.authentication,
            KeyRole::Encryption => &self.encryption,
        }
    }
}

/// Rotation history: key versions indexed by identifier, one of them primary.
#[derive(Debug, Clone, Default)]
pub struct KeyRing {
    keys: BTreeMap<String, KeyPair>,
    primary: Option<String>,
    last_key_creation_time: u64,
}

impl KeyRing {
    pub fn new() -> Self {
        Self::default()
    }

    /// A ring holding a single version, which is primary.
    pub fn with_primary(version: impl Into<String>, pair: KeyPair) -> CryptoResult<Self> {
        let version = version.into();
        let mut ring = Self::new();
        ring.insert(version.clone(), pair)?;
        ring.set_primary(&version)?;
        Ok(ring)
    }

    pub fn insert(&mut self, version: impl Into<String>, pair: KeyPair) -> CryptoResult<()> {
        let version = version.into();
        validate_version(&version)?;
        self.last_key_creation_time = self.last_key_creation_time.max(pair.created_at);
        self.keys.insert(version, pair);
        Ok(())
    }

    pub fn set_primary(&mut self, version: &str) -> CryptoResult<()> {
        if !self.keys.contains_key(version) {
            return Err(CryptoError::InvalidKeyVersion(version.to_string()));
        }
        self.primary = Some(version.to_string());
        Ok(())
    }

    pub fn primary(&self) -> Option<&str> {
        self.primary.as_deref()
    }

    pub fn get(&self, version: &str) -> Option<&KeyPair> {
        self.keys.get(version)
    }

    pub fn remove(&mut self, version: &str) -> Option<KeyPair> {
        if self.primary.as_deref() == Some(version) {
            self.primary = None;
        }
        self.keys.remove(version)
    }

    pub fn versions(&self) -> impl Iterator<Item = &str> {
        self.keys.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyPair)> {
        self.keys.iter().map(|(v, p)| (v.as_str(), p))
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn last_key_creation_time(&self) -> u64 {
        self.last_key_creation_time
    }

    pub fn set_last_key_creation_time(&mut self, at: u64) {
        self.last_key_creation_time = at;
    }
}

impl KeyProvider for KeyRing {
    fn key_by_version(&self, role: KeyRole, version: Option<&str>) -> CryptoResult<KeyMaterial> {
        let version = match version.or(self.primary.as_deref()) {
            Some(v) => v,
            None => return Ok(KeyMaterial::default()),
        };
        Ok(self
            .keys
            .get(version)
            .map(|pair| pair.get(role).clone())
            .unwrap_or_default())
    }

    fn primary_key_version(&self) -> CryptoResult<String> {
        Ok(self.primary.clone().unwrap_or_default())
    }
}
