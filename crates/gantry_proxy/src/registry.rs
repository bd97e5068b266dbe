//! Live namespace set and configuration swap.
//!
//! The config store pushes whole `NamespaceConfig` records; a changed
//! namespace is rebuilt from scratch and swapped in atomically. The
//! displaced instance keeps serving its in-flight sessions and is retired
//! on a detached closer thread after the drain window.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;

use gantry_backend::pool::PoolFactory;
use gantry_common::config::NamespaceConfig;
use gantry_common::error::ProxyResult;

use crate::namespace::{Namespace, DELAY_CLOSE};

pub struct NamespaceRegistry {
    namespaces: DashMap<String, Arc<Namespace>>,
    drain: Duration,
}

impl NamespaceRegistry {
    pub fn new() -> Self {
        Self::with_drain(DELAY_CLOSE)
    }

    /// Registry with a custom drain window for retired namespaces.
    pub fn with_drain(drain: Duration) -> Self {
        Self {
            namespaces: DashMap::new(),
            drain,
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<Namespace>> {
        self.namespaces.get(name).map(|ns| Arc::clone(&ns))
    }

    pub fn names(&self) -> Vec<String> {
        self.namespaces.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.namespaces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.namespaces.is_empty()
    }

    /// Install a new or changed namespace. The replacement is fully built
    /// before the old instance is displaced; a construction error leaves
    /// the old instance serving.
    pub fn apply(&self, cfg: &NamespaceConfig, factory: Arc<dyn PoolFactory>) -> ProxyResult<()> {
        let fresh = Arc::new(Namespace::new(cfg, factory)?);
        let name = fresh.name().to_string();
        if let Some(displaced) = self.namespaces.insert(name.clone(), fresh) {
            tracing::info!(namespace = %name, "namespace replaced, retiring old instance");
            self.retire(displaced);
        } else {
            tracing::info!(namespace = %name, "namespace added");
        }
        Ok(())
    }

    /// Drop a namespace, retiring it through the drain window.
    pub fn remove(&self, name: &str) {
        if let Some((_, displaced)) = self.namespaces.remove(name) {
            tracing::info!(namespace = %name, "namespace removed");
            self.retire(displaced);
        }
    }

    /// Prompt close of every namespace; used on process shutdown where no
    /// drain is wanted.
    pub fn shutdown(&self) {
        let names = self.names();
        for name in names {
            if let Some((_, ns)) = self.namespaces.remove(&name) {
                ns.close(false);
            }
        }
    }

    fn retire(&self, ns: Arc<Namespace>) {
        let drain = self.drain;
        let name = ns.name().to_string();
        let worker_ns = Arc::clone(&ns);
        let spawned = std::thread::Builder::new()
            .name(format!("gantry-ns-closer-{name}"))
            .spawn(move || worker_ns.close_after(drain));
        if let Err(e) = spawned {
            tracing::warn!(namespace = %name, error = %e, "failed to spawn closer thread, closing promptly");
            ns.close_after(Duration::ZERO);
        }
    }
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
