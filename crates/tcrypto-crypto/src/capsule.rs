//! The capsule engine
//!
//! `Capsule` owns the application map. On `open` it fetches whatever the
//! storage backend holds and tries to authenticate and decode it; anything
//! wrong with the stored bytes leaves the map empty and removes them. On
//! `save` it serializes the map, optionally encrypts it, frames and MACs the
//! result, and hands the capsule to the backend.
//!
//! Errors while reading a stored capsule are indistinguishable from "no
//! capsule". Errors while building a new one always reach the caller.

use serde_json::Value;
use tcrypto_core::EngineConfig;
use tcrypto_storage::StorageBackend;

use crate::base36;
use crate::cipher::CipherProvider;
use crate::clock::{Clock, SystemClock};
use crate::error::{CryptoError, CryptoResult};
use crate::kdf::{derive_cipher_key, derive_mac_key};
use crate::keys::{validate_version, KeyMaterial, KeyProvider, KeyRole};
use crate::mac::{capsule_mac, verify};
use crate::pipeline::{DataMap, Pipeline};
use crate::rng::{OsRandom, RandomSource};
use crate::{MAC_LEN, MIN_KEY_LEN, TIME_FIELD_LEN, VERSION_DELIMITER};

/// Default validity window, in seconds.
pub const DEFAULT_MAX_LIFETIME: u64 = 3600;

#[derive(Debug, Clone)]
pub struct CapsuleOptions {
    /// Extra context mixed into every derived key (e.g. the client address).
    /// Never persisted; a capsule only opens under the same pool.
    pub entropy_pool: Vec<Vec<u8>>,
    /// Seconds between save and the end of the validity window.
    pub max_lifetime: u64,
    /// Persist after every `set`.
    pub save_on_set: bool,
}

impl Default for CapsuleOptions {
    fn default() -> Self {
        Self {
            entropy_pool: Vec::new(),
            max_lifetime: DEFAULT_MAX_LIFETIME,
            save_on_set: false,
        }
    }
}

impl CapsuleOptions {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            entropy_pool: Vec::new(),
            max_lifetime: config.max_lifetime_secs,
            save_on_set: config.save_on_set,
        }
    }

    pub fn with_entropy(mut self, context: impl Into<Vec<u8>>) -> Self {
        self.entropy_pool.push(context.into());
        self
    }
}

/// Byte offsets of a parsed capsule frame.
struct Frame<'a> {
    mac: &'a [u8],
    version: &'a str,
    /// Everything after the MAC; the bytes the MAC covers.
    header: &'a [u8],
    timestamp: u64,
    expiry: u64,
    payload: &'a [u8],
}

impl<'a> Frame<'a> {
    fn parse(raw: &'a [u8]) -> CryptoResult<Self> {
        let delim = raw
            .iter()
            .skip(MAC_LEN)
            .position(|&b| b == VERSION_DELIMITER)
            .map(|pos| pos + MAC_LEN)
            .ok_or(CryptoError::MalformedCapsule("no key version delimiter"))?;
        if delim == MAC_LEN {
            return Err(CryptoError::MalformedCapsule("empty key version"));
        }

        let times = delim + 1;
        let payload = times + 2 * TIME_FIELD_LEN;
        if raw.len() <= payload {
            return Err(CryptoError::MalformedCapsule("capsule too short"));
        }

        let version = std::str::from_utf8(&raw[MAC_LEN..delim])
            .map_err(|_| CryptoError::MalformedCapsule("key version is not UTF-8"))?;
        let timestamp = base36::decode(&raw[times..times + TIME_FIELD_LEN])
            .ok_or(CryptoError::MalformedCapsule("bad timestamp field"))?;
        let expiry = base36::decode(&raw[times + TIME_FIELD_LEN..payload])
            .ok_or(CryptoError::MalformedCapsule("bad expiry field"))?;

        Ok(Self {
            mac: &raw[..MAC_LEN],
            version,
            header: &raw[MAC_LEN..],
            timestamp,
            expiry,
            payload: &raw[payload..],
        })
    }
}

pub struct Capsule<S> {
    keys: Box<dyn KeyProvider>,
    storage: S,
    pipeline: Pipeline,
    cipher: Option<Box<dyn CipherProvider>>,
    options: CapsuleOptions,
    rng: Box<dyn RandomSource>,
    clock: Box<dyn Clock>,
    data: DataMap,
}

impl<S: StorageBackend> Capsule<S> {
    /// Open with the OS random source and the system clock.
    pub fn open(
        keys: impl KeyProvider + 'static,
        storage: S,
        pipeline: Pipeline,
        cipher: Option<Box<dyn CipherProvider>>,
        options: CapsuleOptions,
    ) -> CryptoResult<Self> {
        Self::open_with(
            keys,
            storage,
            pipeline,
            cipher,
            options,
            Box::new(OsRandom),
            Box::new(SystemClock),
        )
    }

    /// Check the primary keys, then load whatever capsule `storage` holds.
    ///
    /// Fails only on configuration or environment errors (short keys, key
    /// store unreadable, storage I/O, no randomness). A stored capsule that
    /// is malformed, forged, expired or undecryptable yields an empty map.
    pub fn open_with(
        keys: impl KeyProvider + 'static,
        storage: S,
        pipeline: Pipeline,
        cipher: Option<Box<dyn CipherProvider>>,
        options: CapsuleOptions,
        rng: Box<dyn RandomSource>,
        clock: Box<dyn Clock>,
    ) -> CryptoResult<Self> {
        for role in [KeyRole::Authentication, KeyRole::Encryption] {
            keys.key_by_version(role, None)?.require(role)?;
        }

        let mut capsule = Self {
            keys: Box::new(keys),
            storage,
            pipeline,
            cipher,
            options,
            rng,
            clock,
            data: DataMap::new(),
        };
        capsule.load()?;
        Ok(capsule)
    }

    fn load(&mut self) -> CryptoResult<()> {
        let raw = match self.storage.fetch()? {
            Some(raw) => raw,
            None => return self.destroy(),
        };

        match self.extract(&raw) {
            Ok(map) => {
                for (key, value) in map {
                    self.data.insert(key, value);
                }
                tracing::debug!(entries = self.data.len(), "capsule loaded");
                Ok(())
            }
            Err(e) if e.is_recoverable() => {
                tracing::debug!(reason = %e, "discarding stored capsule");
                self.destroy()
            }
            Err(e) => Err(e),
        }
    }

    fn extract(&self, raw: &[u8]) -> CryptoResult<DataMap> {
        let frame = Frame::parse(raw)?;

        let now = self.clock.now();
        if now < frame.timestamp || now > frame.expiry {
            return Err(CryptoError::AuthenticationFailure("outside validity window"));
        }

        // An unknown version still pays for a full MAC and verify.
        let mut auth_seed = self
            .keys
            .key_by_version(KeyRole::Authentication, Some(frame.version))?;
        let known_version = auth_seed.len() >= MIN_KEY_LEN;
        if !known_version {
            auth_seed = KeyMaterial::from_vec(vec![0u8; MIN_KEY_LEN]);
        }
        let mac_key = derive_mac_key(
            &self.options.entropy_pool,
            frame.timestamp,
            frame.expiry,
            &auth_seed,
        )?;
        let expected = capsule_mac(mac_key.as_bytes(), frame.header)?;
        let mac_ok = verify(frame.mac, &expected, self.rng.as_ref())?;
        if !known_version {
            return Err(CryptoError::AuthenticationFailure("unknown key version"));
        }
        if !mac_ok {
            return Err(CryptoError::AuthenticationFailure("MAC mismatch"));
        }

        let plain = match &self.cipher {
            Some(cipher) => {
                let iv_len = cipher.iv_len();
                if frame.payload.len() <= iv_len {
                    return Err(CryptoError::MalformedCapsule("payload shorter than IV"));
                }
                let (iv, ciphertext) = frame.payload.split_at(iv_len);

                let seed = self
                    .keys
                    .key_by_version(KeyRole::Encryption, Some(frame.version))?;
                if seed.len() < MIN_KEY_LEN {
                    return Err(CryptoError::CipherFailure);
                }
                let key = derive_cipher_key(
                    &self.options.entropy_pool,
                    frame.timestamp,
                    frame.expiry,
                    iv,
                    &seed,
                    cipher.key_len(),
                )?;
                cipher.decrypt(ciphertext, iv, key.as_bytes())?
            }
            None => frame.payload.to_vec(),
        };

        self.pipeline.backward(plain, self.cipher.is_some())
    }

    /// Build a capsule from the current map and persist it.
    ///
    /// Returns `None` (after `destroy`) when there is nothing to save.
    pub fn save(&mut self) -> CryptoResult<Option<Vec<u8>>> {
        if self.data.is_empty() {
            self.destroy()?;
            return Ok(None);
        }

        let encrypted = self.cipher.is_some();
        let data = match self.pipeline.forward(&self.data, encrypted) {
            Ok(data) => data,
            Err(CryptoError::NoData) => {
                self.destroy()?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        let timestamp = self.clock.now();
        let expiry = timestamp
            .checked_add(self.options.max_lifetime)
            .ok_or(CryptoError::WindowOverflow(timestamp))?;
        let ts_field = base36::encode(timestamp, TIME_FIELD_LEN)
            .ok_or(CryptoError::WindowOverflow(timestamp))?;
        let exp_field =
            base36::encode(expiry, TIME_FIELD_LEN).ok_or(CryptoError::WindowOverflow(expiry))?;

        let payload = match &self.cipher {
            Some(cipher) => {
                let seed = self
                    .keys
                    .key_by_version(KeyRole::Encryption, None)?
                    .require(KeyRole::Encryption)?;

                let mut iv = vec![0u8; cipher.iv_len()];
                self.rng.fill(&mut iv)?;
                let key = derive_cipher_key(
                    &self.options.entropy_pool,
                    timestamp,
                    expiry,
                    &iv,
                    &seed,
                    cipher.key_len(),
                )?;
                let ciphertext = cipher.encrypt(&data, &iv, key.as_bytes())?;

                let mut payload = iv;
                payload.extend_from_slice(&ciphertext);
                payload
            }
            None => data,
        };

        let auth_seed = self
            .keys
            .key_by_version(KeyRole::Authentication, None)?
            .require(KeyRole::Authentication)?;
        let version = self.keys.primary_key_version()?;
        validate_version(&version)?;

        let mut header =
            Vec::with_capacity(version.len() + 1 + 2 * TIME_FIELD_LEN + payload.len());
        header.extend_from_slice(version.as_bytes());
        header.push(VERSION_DELIMITER);
        header.extend_from_slice(&ts_field);
        header.extend_from_slice(&exp_field);
        header.extend_from_slice(&payload);

        let mac_key = derive_mac_key(&self.options.entropy_pool, timestamp, expiry, &auth_seed)?;
        let mac = capsule_mac(mac_key.as_bytes(), &header)?;

        let mut capsule = Vec::with_capacity(MAC_LEN + header.len());
        capsule.extend_from_slice(&mac);
        capsule.extend_from_slice(&header);

        self.storage.save(&capsule)?;
        tracing::debug!(
            key_version = %version,
            encrypted,
            bytes = capsule.len(),
            "capsule saved"
        );
        Ok(Some(capsule))
    }

    /// Clear the map and remove the stored capsule.
    pub fn destroy(&mut self) -> CryptoResult<()> {
        self.data.clear();
        self.storage.remove()?;
        Ok(())
    }

    /// Insert or replace a value. Saves immediately when `save_on_set` is on.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) -> CryptoResult<()> {
        self.data.insert(key.into(), value.into());
        if self.options.save_on_set {
            self.save()?;
        }
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a Value) -> &'a Value {
        self.data.get(key).unwrap_or(default)
    }

    /// True if the key was present.
    pub fn remove(&mut self, key: &str) -> bool {
        self.data.remove(key).is_some()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.data.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn data(&self) -> &DataMap {
        &self.data
    }

    pub fn is_encrypted(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn options(&self) -> &CapsuleOptions {
        &self.options
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    pub fn into_storage(self) -> S {
        self.storage
    }
}
