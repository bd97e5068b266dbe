//! Tenant-scoped proxy runtime.
//!
//! A `Namespace` aggregates everything the session layer needs for one
//! tenant: backend slices with live health statuses, policy tables
//! (allowed DBs, IP rules, user flags, SQL blacklist), the fingerprint and
//! plan caches, the router, and the sequence registry. Namespaces are
//! immutable after construction — configuration changes build a
//! replacement and retire the old instance through a delayed close.

pub mod context;
pub mod namespace;
pub mod plan;
pub mod registry;
pub mod router;
pub mod sequence;

pub use context::{RequestContext, FINGERPRINT_KEY};
pub use namespace::{Namespace, UserProperty, DELAY_CLOSE};
pub use plan::Plan;
pub use registry::NamespaceRegistry;
pub use router::Router;
pub use sequence::{MysqlSequence, SequenceRegistry};
