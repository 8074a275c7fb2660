//! Plain-string backend: the capsule is handed back to the caller as a token
//!
//! Useful when the application persists the token itself, e.g. sealing a
//! third-party token before writing it to a database column. `fetch` reads
//! the token supplied at construction, `save` stores the new token in
//! `token()`.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::{StorageBackend, StorageResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TokenEncoding {
    /// Standard base64 with padding
    #[default]
    Base64,
    /// Capsule bytes as-is
    Raw,
}

#[derive(Debug, Clone, Default)]
pub struct PlainStringStorage {
    input: Vec<u8>,
    encoding: TokenEncoding,
    output: Option<Vec<u8>>,
}

impl PlainStringStorage {
    /// `input` is the token previously produced by `save`; pass an empty
    /// value when there is none.
    pub fn new(input: impl Into<Vec<u8>>, encoding: TokenEncoding) -> Self {
        Self {
            input: input.into(),
            encoding,
            output: None,
        }
    }

    pub fn empty(encoding: TokenEncoding) -> Self {
        Self::new(Vec::new(), encoding)
    }

    /// The token produced by the last `save`.
    pub fn token(&self) -> Option<&[u8]> {
        self.output.as_deref()
    }

    /// The last token as text (always available for base64 tokens).
    pub fn token_str(&self) -> Option<&str> {
        self.output
            .as_deref()
            .and_then(|t| std::str::from_utf8(t).ok())
    }
}

impl StorageBackend for PlainStringStorage {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        if self.input.is_empty() {
            return Ok(None);
        }

        match self.encoding {
            TokenEncoding::Raw => Ok(Some(self.input.clone())),
            TokenEncoding::Base64 => match STANDARD.decode(&self.input) {
                Ok(bytes) => Ok(Some(bytes)),
                Err(e) => {
                    tracing::debug!("plain token is not valid base64: {e}");
                    Ok(None)
                }
            },
        }
    }

    fn save(&mut self, capsule: &[u8]) -> StorageResult<()> {
        let token = match self.encoding {
            TokenEncoding::Raw => capsule.to_vec(),
            TokenEncoding::Base64 => STANDARD.encode(capsule).into_bytes(),
        };
        self.output = Some(token);
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.input.clear();
        self.output = None;
        Ok(())
    }
}
