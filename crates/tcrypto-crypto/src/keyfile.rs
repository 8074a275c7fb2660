//! On-disk key file and the file-backed key provider
//!
//! Format (JSON, key bytes base64-encoded):
//! ```json
//! {
//!   "keys": {
//!     "a1b2c3": { "authentication": "...", "encryption": "...", "created_at": 1700000000 }
//!   },
//!   "primary_index": "a1b2c3",
//!   "last_key_creation_time": 1700000000
//! }
//! ```

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use zeroize::Zeroize;

use crate::error::{CryptoError, CryptoResult};
use crate::keys::{KeyMaterial, KeyPair, KeyProvider, KeyRing, KeyRole};
use crate::rng::RandomSource;
use crate::MIN_KEY_LEN;

#[derive(Serialize, Deserialize)]
struct KeyEntryRepr {
    authentication: String,
    encryption: String,
    #[serde(default)]
    created_at: u64,
}

impl Drop for KeyEntryRepr {
    fn drop(&mut self) {
        self.authentication.zeroize();
        self.encryption.zeroize();
    }
}

#[derive(Serialize, Deserialize, Default)]
struct KeyFileRepr {
    #[serde(default)]
    keys: BTreeMap<String, KeyEntryRepr>,
    #[serde(default)]
    primary_index: Option<String>,
    #[serde(default)]
    last_key_creation_time: u64,
}

/// A key ring as persisted by the key-management tool.
#[derive(Debug, Clone, Default)]
pub struct KeyFile {
    ring: KeyRing,
}

impl KeyFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_ring(ring: KeyRing) -> Self {
        Self { ring }
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }

    pub fn into_ring(self) -> KeyRing {
        self.ring
    }

    /// Parse key-file JSON.
    pub fn from_json(data: &[u8]) -> CryptoResult<Self> {
        let repr: KeyFileRepr = serde_json::from_slice(data)
            .map_err(|e| CryptoError::KeyFile(format!("parse: {e}")))?;

        let mut ring = KeyRing::new();
        for (version, entry) in &repr.keys {
            let pair = KeyPair::new(
                decode_key(&entry.authentication, version, KeyRole::Authentication)?,
                decode_key(&entry.encryption, version, KeyRole::Encryption)?,
                entry.created_at,
            );
            ring.insert(version.clone(), pair)?;
        }
        if let Some(primary) = repr.primary_index.as_deref().filter(|p| !p.is_empty()) {
            ring.set_primary(primary).map_err(|_| {
                CryptoError::KeyFile(format!("primary key {primary:?} is not in the key file"))
            })?;
        }
        ring.set_last_key_creation_time(repr.last_key_creation_time);

        Ok(Self { ring })
    }

    pub fn to_json(&self) -> CryptoResult<Vec<u8>> {
        let repr = KeyFileRepr {
            keys: self
                .ring
                .iter()
                .map(|(version, pair)| {
                    (
                        version.to_string(),
                        KeyEntryRepr {
                            authentication: STANDARD.encode(pair.authentication.as_bytes()),
                            encryption: STANDARD.encode(pair.encryption.as_bytes()),
                            created_at: pair.created_at,
                        },
                    )
                })
                .collect(),
            primary_index: self.ring.primary().map(str::to_string),
            last_key_creation_time: self.ring.last_key_creation_time(),
        };

        serde_json::to_vec_pretty(&repr)
            .map_err(|e| CryptoError::KeyFile(format!("serialize: {e}")))
    }

    pub fn load(path: &Path) -> CryptoResult<Self> {
        let data = std::fs::read(path)
            .map_err(|e| CryptoError::KeyFile(format!("reading {}: {e}", path.display())))?;
        Self::from_json(&data)
    }

    /// Like `load`, but a file that does not exist yet is an empty key file.
    pub fn load_or_new(path: &Path) -> CryptoResult<Self> {
        match std::fs::read(path) {
            Ok(data) => Self::from_json(&data),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Self::new()),
            Err(e) => Err(CryptoError::KeyFile(format!(
                "reading {}: {e}",
                path.display()
            ))),
        }
    }

    /// The parent directory must exist and the path must not be a directory.
    pub fn validate_location(path: &Path) -> CryptoResult<()> {
        if path.is_dir() {
            return Err(CryptoError::KeyFile(format!(
                "{} is a directory",
                path.display()
            )));
        }
        let parent = parent_dir(path).ok_or_else(|| {
            CryptoError::KeyFile(format!("{} has no parent directory", path.display()))
        })?;
        if !parent.is_dir() {
            return Err(CryptoError::KeyFile(format!(
                "directory {} does not exist",
                parent.display()
            )));
        }
        Ok(())
    }

    /// Write atomically: a uniquely named temp file in the same directory,
    /// renamed over `path`. Concurrent saves never share a temp file.
    pub fn save(&self, path: &Path, permissions: u32) -> CryptoResult<()> {
        Self::validate_location(path)?;
        let json = self.to_json()?;
        let dir = parent_dir(path).unwrap_or(Path::new("."));

        let mut tmp = create_temp(dir, permissions).map_err(|e| {
            CryptoError::KeyFile(format!("creating temp file in {}: {e}", dir.display()))
        })?;
        tmp.write_all(&json)
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| CryptoError::KeyFile(format!("writing {}: {e}", tmp.path().display())))?;
        tmp.persist(path).map_err(|e| {
            CryptoError::KeyFile(format!("renaming into {}: {}", path.display(), e.error))
        })?;

        tracing::info!(path = %path.display(), keys = self.ring.len(), "key file written");
        Ok(())
    }

    /// Generate a new key pair and make it primary. Returns the new version.
    ///
    /// The version is `bytes_in_key_name` random bytes, hex encoded.
    pub fn add_key(
        &mut self,
        rng: &dyn RandomSource,
        bytes_in_key_name: usize,
        now: u64,
    ) -> CryptoResult<String> {
        if bytes_in_key_name == 0 {
            return Err(CryptoError::KeyFile(
                "key names need at least one random byte".into(),
            ));
        }

        let version = loop {
            let mut name = vec![0u8; bytes_in_key_name];
            rng.fill(&mut name)?;
            let candidate: String = name.iter().map(|b| format!("{b:02x}")).collect();
            if self.ring.get(&candidate).is_none() {
                break candidate;
            }
        };

        let mut auth = vec![0u8; MIN_KEY_LEN];
        let mut enc = vec![0u8; MIN_KEY_LEN];
        rng.fill(&mut auth)?;
        rng.fill(&mut enc)?;

        self.ring.insert(
            version.clone(),
            KeyPair::new(KeyMaterial::from_vec(auth), KeyMaterial::from_vec(enc), now),
        )?;
        self.ring.set_primary(&version)?;
        self.ring.set_last_key_creation_time(now);

        tracing::info!(version = %version, "added primary key");
        Ok(version)
    }

    /// Drop every non-primary key once the newest key is older than
    /// `max_lifetime`: by then no capsule signed with an older key can
    /// still be inside its window. A key file without a primary is left
    /// alone. Returns the number of keys removed.
    pub fn prune_inactive(&mut self, max_lifetime: u64, now: u64) -> usize {
        let Some(primary) = self.ring.primary().map(str::to_string) else {
            return 0;
        };
        if self
            .ring
            .last_key_creation_time()
            .saturating_add(max_lifetime)
            >= now
        {
            return 0;
        }

        let stale: Vec<String> = self
            .ring
            .versions()
            .filter(|v| *v != primary)
            .map(str::to_string)
            .collect();
        for version in &stale {
            self.ring.remove(version);
        }

        if !stale.is_empty() {
            tracing::info!(removed = stale.len(), "pruned inactive keys");
        }
        stale.len()
    }

    /// Seconds since the primary key was created, if there is one.
    pub fn primary_age(&self, now: u64) -> Option<u64> {
        let primary = self.ring.primary()?;
        let pair = self.ring.get(primary)?;
        Some(now.saturating_sub(pair.created_at))
    }
}

fn decode_key(encoded: &str, version: &str, role: KeyRole) -> CryptoResult<KeyMaterial> {
    STANDARD
        .decode(encoded)
        .map(KeyMaterial::from_vec)
        .map_err(|e| CryptoError::KeyFile(format!("{role} key of {version:?}: base64 decode: {e}")))
}

fn parent_dir(path: &Path) -> Option<&Path> {
    match path.parent() {
        Some(p) if p.as_os_str().is_empty() => Some(Path::new(".")),
        other => other,
    }
}

/// Empty temp file in `dir`, already carrying `permissions`.
fn create_temp(dir: &Path, permissions: u32) -> std::io::Result<NamedTempFile> {
    let tmp = tempfile::Builder::new()
        .prefix(".keyfile-")
        .suffix(".tmp")
        .tempfile_in(dir)?;
    set_permissions(tmp.as_file(), permissions)?;
    Ok(tmp)
}

#[cfg(unix)]
fn set_permissions(file: &File, mode: u32) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(mode))
}

#[cfg(not(unix))]
fn set_permissions(_file: &File, _mode: u32) -> std::io::Result<()> {
    Ok(())
}

/// `KeyProvider` over a key file read once at construction.
#[derive(Debug, Clone)]
pub struct FileKeyProvider {
    path: PathBuf,
    ring: KeyRing,
}

impl FileKeyProvider {
    /// Fails with `KeyLookupFailure` if the file cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> CryptoResult<Self> {
        let path = path.into();
        let ring = KeyFile::load(&path)
            .map_err(|e| CryptoError::KeyLookupFailure(e.to_string()))?
            .into_ring();
        tracing::debug!(path = %path.display(), keys = ring.len(), "key file loaded");
        Ok(Self { path, ring })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn ring(&self) -> &KeyRing {
        &self.ring
    }
}

impl KeyProvider for FileKeyProvider {
    fn key_by_version(&self, role: KeyRole, version: Option<&str>) -> CryptoResult<KeyMaterial> {
        self.ring.key_by_version(role, version)
    }

    fn primary_key_version(&self) -> CryptoResult<String> {
        self.ring.primary_key_version()
    }
}
