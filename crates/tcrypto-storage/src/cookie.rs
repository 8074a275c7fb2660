//! Cookie backend
//!
//! The capsule travels as a URL-safe base64 cookie value without padding.
//! This type does not talk HTTP itself: the host framework passes in the
//! incoming cookie value and whether the request arrived over HTTPS, and
//! collects the `Set-Cookie` header values produced by `save`/`remove`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;

use crate::{StorageBackend, StorageError, StorageResult};

pub const DEFAULT_COOKIE_NAME: &str = "tcrypto";

#[derive(Debug, Clone)]
pub struct CookieStorage {
    name: String,
    require_secure: bool,
    https: bool,
    incoming: Option<String>,
    headers: Vec<String>,
}

impl CookieStorage {
    /// `incoming` is the raw value of the request cookie named `name`, if any.
    pub fn new(name: impl Into<String>, incoming: Option<String>) -> Self {
        Self {
            name: name.into(),
            require_secure: true,
            https: false,
            incoming,
            headers: Vec::new(),
        }
    }

    /// Mark the cookie `Secure` and refuse to set it over plain HTTP (default: true).
    pub fn require_secure(mut self, require: bool) -> Self {
        self.require_secure = require;
        self
    }

    /// Whether the current request arrived over HTTPS.
    pub fn https(mut self, https: bool) -> Self {
        self.https = https;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// `Set-Cookie` header values produced so far, oldest first.
    pub fn set_cookie_headers(&self) -> &[String] {
        &self.headers
    }

    pub fn take_headers(&mut self) -> Vec<String> {
        std::mem::take(&mut self.headers)
    }
}

impl Default for CookieStorage {
    fn default() -> Self {
        Self::new(DEFAULT_COOKIE_NAME, None)
    }
}

impl StorageBackend for CookieStorage {
    fn fetch(&mut self) -> StorageResult<Option<Vec<u8>>> {
        let Some(value) = self.incoming.as_deref() else {
            return Ok(None);
        };

        match URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')) {
            Ok(bytes) if !bytes.is_empty() => Ok(Some(bytes)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::debug!(cookie = %self.name, "cookie value is not valid base64url: {e}");
                Ok(None)
            }
        }
    }

    fn save(&mut self, capsule: &[u8]) -> StorageResult<()> {
        if self.require_secure && !self.https {
            tracing::warn!(
                cookie = %self.name,
                "secure cookie requested over plain HTTP; not setting it"
            );
            return Err(StorageError::InsecureTransport);
        }

        let value = URL_SAFE_NO_PAD.encode(capsule);
        let mut header = format!("{}={}; Path=/; HttpOnly", self.name, value);
        if self.require_secure {
            header.push_str("; Secure");
        }
        self.headers.push(header);
        self.incoming = Some(value);
        Ok(())
    }

    fn remove(&mut self) -> StorageResult<()> {
        self.incoming = None;
        self.headers.push(format!(
            "{}=; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT; HttpOnly",
            self.name
        ));
        Ok(())
    }
}
