//! Error taxonomy for the proxy runtime.
//!
//! Classification drives handling:
//! - `Config`            — invalid namespace configuration; fatal to construction
//! - `Policy`            — per-request lookup failure, rendered to the client
//! - `Transient`         — backend acquire/ping/reconnect failures; absorbed by
//!   the health supervisor and at most drive a DOWN transition
//! - `ReplicationHealth` — a replica answered but reports lag or a stopped
//!   thread; converted to a DOWN status
//! - `Internal`          — should not happen
//!
//! Cache misses are not errors anywhere in this crate; absence is expressed
//! with `Option`.

use thiserror::Error;

/// Convenience alias for `Result<T, ProxyError>`.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// Coarse classification used by callers to decide surface vs. absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Config,
    Policy,
    Transient,
    ReplicationHealth,
    Internal,
}

/// Top-level error type all layer-specific errors convert into.
#[derive(Error, Debug)]
pub enum ProxyError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    #[error("policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Namespace configuration errors. All of these abort construction; a
/// partially built namespace is released before the error is surfaced.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("slow sql time {0:?} is not a non-negative integer")]
    InvalidSlowSqlTime(String),

    #[error("db {0} has no physical db mapping")]
    MissingPhysicalDb(String),

    #[error("invalid charset {0:?}")]
    InvalidCharset(String),

    #[error("invalid collation {0:?}")]
    InvalidCollation(String),

    #[error("collation {collation:?} does not belong to charset {charset:?}")]
    CharsetMismatch { charset: String, collation: String },

    #[error("duplicate slice [{0}]")]
    DuplicateSlice(String),

    #[error("{referrer} references unknown slice [{slice}]")]
    UnknownSliceRef { referrer: String, slice: String },

    #[error("down_after_no_alive must not be negative (got {0})")]
    NegativeDownAfterNoAlive(i64),

    #[error("invalid ip rule {rule:?}: {reason}")]
    InvalidIpRule { rule: String, reason: String },

    #[error("slice [{slice}] has no {role} endpoint")]
    EmptyEndpoint { slice: String, role: String },
}

/// Per-request policy lookup errors. Carry the offending field so the
/// session can render a client-visible message.
#[derive(Error, Debug)]
pub enum PolicyError {
    #[error("invalid db {0}")]
    InvalidDb(String),
}

/// Backend-facing errors raised below the namespace. Probe paths absorb
/// these; query paths hand them to the session for per-request retry.
#[derive(Error, Debug)]
pub enum BackendError {
    #[error("pool {addr} acquire failed: {reason}")]
    Acquire { addr: String, reason: String },

    #[error("connection {addr} ping failed: {reason}")]
    Ping { addr: String, reason: String },

    #[error("connection {addr} reconnect failed: {reason}")]
    Reconnect { addr: String, reason: String },

    #[error("query on {addr} failed: {reason}")]
    Query { addr: String, reason: String },

    #[error("pool {addr} close failed: {reason}")]
    Close { addr: String, reason: String },

    #[error("replica {addr} degraded: {reason}")]
    ReplicationDegraded { addr: String, reason: String },
}

impl ProxyError {
    /// Classify this error for surface/absorb decisions.
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProxyError::Config(_) => ErrorKind::Config,
            ProxyError::Policy(_) => ErrorKind::Policy,
            ProxyError::Backend(BackendError::ReplicationDegraded { .. }) => {
                ErrorKind::ReplicationHealth
            }
            ProxyError::Backend(_) => ErrorKind::Transient,
            ProxyError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True for errors that abort namespace construction.
    pub fn is_config(&self) -> bool {
        matches!(self.kind(), ErrorKind::Config)
    }

    /// True for backend failures the supervisor absorbs.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind(), ErrorKind::Transient)
    }

    /// True for lookup failures returned to the session layer.
    pub fn is_policy(&self) -> bool {
        matches!(self.kind(), ErrorKind::Policy)
    }
}

impl BackendError {
    /// The backend address this error was observed on.
    pub fn addr(&self) -> &str {
        match self {
            BackendError::Acquire { addr, .. }
            | BackendError::Ping { addr, .. }
            | BackendError::Reconnect { addr, .. }
            | BackendError::Query { addr, .. }
            | BackendError::Close { addr, .. }
            | BackendError::ReplicationDegraded { addr, .. } => addr,
        }
    }
}
