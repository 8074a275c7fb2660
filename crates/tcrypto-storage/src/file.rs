//! Single-file backend
//!
//! Writes take an exclusive lock on the file, reads take a shared one, so a
//! reader never observes a half-written capsule. Permission bits (default
//! 0o600) are in place before any capsule byte reaches the file.

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use crate::{StorageBackend, StorageResult};

pub const DEFAULT_PERMISSIONS: u32 = 0o600;

#[derive(Debug, Clone)]
pub struct FileStorage {
    path: PathBuf,
    permissions: u32,
}

impl FileStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            permissions: DEFAULT_PERMISSIONS,
        }
    }

    pub fn with_permissions(mut self, permissions: u32) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(unix)]
    fn apply_permissions(&self, file: &File) -> std::io::Result<()> {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(self.permissions))
    }

    #[cfg(not(unix))]
    fn apply_permissions(&self, _file: &File) -> std::io::Result<()> {
        Ok(())
    }
}

impl StorageBackend for FileStorage {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        let mut file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        file.lock_shared()?;
        let mut capsule = Vec::new();
        file.read_to_end(&mut capsule)?;
        file.unlock()?;

        Ok((!capsule.is_empty()).then_some(capsule))
    }

    fn save(&mut self, capsule: &[u8]) -> StorageResult<()> {
        let mut options = OpenOptions::new();
        options.write(true).create(true).truncate(false);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(self.permissions);
        }
        let mut file = options.open(&self.path)?;

        file.lock()?;
        self.apply_permissions(&file)?;
        file.set_len(0)?;
        file.write_all(capsule)?;
        file.sync_all()?;
        file.unlock()?;

        tracing::debug!(path = %self.path.display(), bytes = capsule.len(), "capsule written");
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
