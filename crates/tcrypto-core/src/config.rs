use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, ConfigResult};

/// Top-level configuration (loaded from tcrypto.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TcryptoConfig {
    pub engine: EngineConfig,
    pub keystore: KeystoreConfig,
    pub log: LogConfig,
}

/// Cipher used to encrypt capsule payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum CipherChoice {
    /// Authenticate only; the payload is stored in the clear
    #[serde(rename = "none")]
    None,
    #[serde(rename = "aes-128-cbc")]
    Aes128Cbc,
    #[default]
    #[serde(rename = "aes-256-cbc")]
    Aes256Cbc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum time between save and extract, in seconds (default: 3600)
    pub max_lifetime_secs: u64,
    /// Persist the capsule after every `set` (default: false)
    pub save_on_set: bool,
    /// Payload cipher (default: aes-256-cbc)
    pub cipher: CipherChoice,
    /// Append a zstd stage to the transform pipeline. Skipped while a cipher is active.
    pub compress: bool,
    /// zstd level for the compression stage (1..=22, default: 3)
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KeystoreConfig {
    /// Key file path
    pub keyfile: PathBuf,
    /// Unix permission bits applied to the key file (default: 0o600)
    pub permissions: u32,
    /// Random bytes used for a new key version name (hex encoded, default: 3)
    pub bytes_in_key_name: usize,
    /// Lifetime used when pruning inactive keys, in seconds (default: 3600)
    pub key_max_lifetime_secs: u64,
    /// `add` refuses to rotate a primary key younger than this unless forced
    pub min_rotation_interval_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_lifetime_secs: 3600,
            save_on_set: false,
            cipher: CipherChoice::default(),
            compress: false,
            compression_level: 3,
        }
    }
}

impl Default for KeystoreConfig {
    fn default() -> Self {
        Self {
            keyfile: PathBuf::from("~/.config/tcrypto/keys.json"),
            permissions: 0o600,
            bytes_in_key_name: 3,
            key_max_lifetime_secs: 3600,
            min_rotation_interval_secs: 3600,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl TcryptoConfig {
    /// Load and validate a config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        if !path.exists() {
            tracing::warn!("config file not found: {}  (using defaults)", path.display());
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.engine.max_lifetime_secs == 0 {
            return Err(ConfigError::Invalid(
                "engine.max_lifetime_secs must be greater than 0".into(),
            ));
        }
        if !(1..=22).contains(&self.engine.compression_level) {
            return Err(ConfigError::Invalid(format!(
                "engine.compression_level must be within 1..=22 (got {})",
                self.engine.compression_level
            )));
        }
        if self.keystore.bytes_in_key_name == 0 {
            return Err(ConfigError::Invalid(
                "keystore.bytes_in_key_name must be greater than 0".into(),
            ));
        }
        Ok(())
    }
}
