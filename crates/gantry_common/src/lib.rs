//! Shared foundation for the gantry proxy.
//!
//! Everything the backend and namespace layers have in common lives here:
//! the error taxonomy, the cooperative stop signal used by background
//! probers, the synchronized LRU caches, SQL fingerprinting, client IP
//! rules, the MySQL charset/collation tables, and the configuration models
//! pushed by the config store.

pub mod cache;
pub mod charset;
pub mod config;
pub mod error;
pub mod fingerprint;
pub mod ip;
pub mod stop;

pub use error::{BackendError, ConfigError, ErrorKind, PolicyError, ProxyError, ProxyResult};
pub use stop::StopSignal;
