//! In-memory capsule slot

use crate::{StorageBackend, StorageResult};

#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    slot: Option<Vec<u8>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with a capsule already stored.
    pub fn with_capsule(capsule: impl Into<Vec<u8>>) -> Self {
        Self {
            slot: Some(capsule.into()),
        }
    }

    pub fn capsule(&self) -> Option<&[u8]> {
        self.slot.as_deref()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}

impl StorageBackend for MemoryStorage {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.slot.clone())
    }

    fn save(&mut self, capsule: &[u8]) -> StorageResult<()> {
        self.slot = Some(capsule.to_vec());
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.slot = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_empty() {
        let mut storage = MemoryStorage::new();
        assert!(storage.fetch().unwrap().is_none());
    }

    #[test]
    fn test_save_fetch_remove() {
        let mut storage = MemoryStorage::new();
        storage.save(b"\x00\x01$capsule").unwrap();
        assert_eq!(storage.fetch().unwrap().as_deref(), Some(&b"\x00\x01$capsule"[..]));

        storage.remove().unwrap();
        assert!(storage.is_empty());
        storage.remove().unwrap();
    }
}
