//! tcrypto-storage: where capsules live between requests
//!
//! Backends only move opaque bytes. They never inspect or alter a capsule;
//! any transport framing (base64, cookie attributes) is undone on `fetch`
//! so the engine sees exactly the bytes it saved.
//!
//! - `memory`: in-process slot, used for tests and mocking
//! - `plain`: hands the capsule back to the caller as a token
//! - `cookie`: URL-safe base64 cookie value + `Set-Cookie` headers
//! - `file`: single file with exclusive-lock writes

pub mod cookie;
pub mod error;
pub mod file;
pub mod memory;
pub mod plain;

pub use cookie::CookieStorage;
pub use error::{StorageError, StorageResult};
pub use file::FileStorage;
pub use memory::MemoryStorage;
pub use plain::{PlainStringStorage, TokenEncoding};

/// Opaque byte-string persistence for a single capsule.
pub trait StorageBackend {
    /// Return the stored capsule, or `None` when nothing (decodable) is stored.
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>>;

    /// Persist `capsule`, replacing any previous one.
    fn save(&mut self, capsule: &[u8]) -> StorageResult<()>;

    /// Remove the stored capsule. Removing an absent capsule is not an error.
    fn remove(&mut self) -> StorageResult<()>;
}

impl<S: StorageBackend + ?Sized> StorageBackend for Box<S> {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        (**self).fetch()
    }

    fn save(&mut self, capsule: &[u8]) -> StorageResult<()> {
        (**self).save(capsule)
    }

    fn remove(&mut self) -> StorageResult<()> {
        (**self).remove()
    }
}
