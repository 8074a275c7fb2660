pub mod config;
pub mod error;

pub use config::{CipherChoice, EngineConfig, KeystoreConfig, LogConfig, TcryptoConfig};
pub use error::{ConfigError, ConfigResult};
