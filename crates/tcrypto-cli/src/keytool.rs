//! Key-file operations behind the `tcrypto-keytool` subcommands

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tcrypto_core::KeystoreConfig;
use tcrypto_crypto::{KeyFile, RandomSource};

/// Expand `~` in path to the user's home directory
pub fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    if let Some(rest) = s.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(format!("{home}/{rest}"))
    } else {
        path.to_path_buf()
    }
}

pub fn now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One line per key version, primary marked with `*`. Key bytes are never shown.
pub fn show(file: &KeyFile, now: u64) -> String {
    let ring = file.ring();
    if ring.is_empty() {
        return "no keys\n".to_string();
    }

    let mut out = String::new();
    for (version, pair) in ring.iter() {
        let marker = if ring.primary() == Some(version) { '*' } else { ' ' };
        out.push_str(&format!(
            "{marker} {version:<16} created {:>10}  age {}s\n",
            pair.created_at,
            now.saturating_sub(pair.created_at)
        ));
    }
    out.push_str(&format!(
        "last key creation: {}\n",
        ring.last_key_creation_time()
    ));
    out
}

#[derive(Debug, PartialEq, Eq)]
pub enum AddOutcome {
    Added(String),
    /// The primary key is younger than `min_rotation_interval_secs`
    TooSoon { age: u64 },
}

/// Rotate in a new primary key and write the key file.
pub fn add(
    path: &Path,
    config: &KeystoreConfig,
    force: bool,
    rng: &dyn RandomSource,
    now: u64,
) -> Result<AddOutcome> {
    let mut file = KeyFile::load_or_new(path)?;

    if !force {
        if let Some(age) = file.primary_age(now) {
            if age < config.min_rotation_interval_secs {
                return Ok(AddOutcome::TooSoon { age });
            }
        }
    }

    let version = file
        .add_key(rng, config.bytes_in_key_name, now)
        .context("generating key")?;
    file.save(path, config.permissions)
        .with_context(|| format!("writing key file: {}", path.display()))?;
    Ok(AddOutcome::Added(version))
}

/// Drop inactive keys; returns how many were removed.
pub fn prune(
    path: &Path,
    config: &KeystoreConfig,
    max_lifetime: Option<u64>,
    now: u64,
) -> Result<usize> {
    let mut file = KeyFile::load(path)?;
    let removed = file.prune_inactive(max_lifetime.unwrap_or(config.key_max_lifetime_secs), now);
    if removed > 0 {
        file.save(path, config.permissions)
            .with_context(|| format!("writing key file: {}", path.display()))?;
    }
    Ok(removed)
}
