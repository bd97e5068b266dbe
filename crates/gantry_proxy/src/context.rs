//! Per-request context handed through policy checks.
//!
//! The blacklist check computes the statement fingerprint anyway, so it
//! stashes it here and the slow/error SQL bookkeeping later in the request
//! reuses it instead of fingerprinting twice.

use std::collections::HashMap;

use parking_lot::Mutex;

/// Key under which `Namespace::is_sql_allowed` stores the fingerprint.
pub const FINGERPRINT_KEY: &str = "fingerprint";

/// A small string stash scoped to one client request.
#[derive(Default)]
pub struct RequestContext {
    values: Mutex<HashMap<String, String>>,
}

impl RequestContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        self.values.lock().insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.values.lock().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get() {
        let ctx = RequestContext::new();
        assert_eq!(ctx.get("k"), None);
        ctx.set("k", "v");
        assert_eq!(ctx.get("k").as_deref(), Some("v"));
        ctx.set("k", "v2");
        assert_eq!(ctx.get("k").as_deref(), Some("v2"));
    }
}
