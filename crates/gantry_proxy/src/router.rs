//! Shard routing table.
//!
//! The planner decides *how* a statement spreads over shards; the router
//! only answers *where* — which slices a `(db, table)` pair lives on.
//! Construction validates every rule against the slice set so a namespace
//! can never publish a rule that routes into the void.

use std::collections::HashMap;
use std::sync::Arc;

use gantry_backend::slice::Slice;
use gantry_common::config::NamespaceConfig;
use gantry_common::error::{ConfigError, ProxyResult};

#[derive(Debug)]
pub struct Router {
    default_slice: String,
    rules: HashMap<(String, String), Vec<String>>,
}

impl Router {
    pub fn new(
        cfg: &NamespaceConfig,
        slices: &HashMap<String, Arc<Slice>>,
    ) -> ProxyResult<Self> {
        if !cfg.default_slice.is_empty() && !slices.contains_key(&cfg.default_slice) {
            return Err(ConfigError::UnknownSliceRef {
                referrer: "default slice".to_string(),
                slice: cfg.default_slice.clone(),
            }
            .into());
        }

        let mut rules = HashMap::with_capacity(cfg.shard_rules.len());
        for rule in &cfg.shard_rules {
            for slice in &rule.slices {
                if !slices.contains_key(slice) {
                    return Err(ConfigError::UnknownSliceRef {
                        referrer: format!("shard rule {}.{}", rule.db, rule.table),
                        slice: slice.clone(),
                    }
                    .into());
                }
            }
            rules.insert(
                (rule.db.clone(), rule.table.clone()),
                rule.slices.clone(),
            );
        }

        Ok(Self {
            default_slice: cfg.default_slice.clone(),
            rules,
        })
    }

    /// Slices a sharded table spreads over; `None` for unsharded tables.
    pub fn rule_slices(&self, db: &str, table: &str) -> Option<&[String]> {
        self.rules
            .get(&(db.to_string(), table.to_string()))
            .map(|s| s.as_slice())
    }

    /// Target slice for a statement: the rule's first slice, or the
    /// namespace default for unsharded tables.
    pub fn route(&self, db: &str, table: &str) -> &str {
        self.rule_slices(db, table)
            .and_then(|slices| slices.first())
            .map(|s| s.as_str())
            .unwrap_or(&self.default_slice)
    }

    pub fn default_slice(&self) -> &str {
        &self.default_slice
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gantry_backend::fault::FaultFactory;
    use gantry_backend::pool::PoolFactory;
    use gantry_common::charset::DEFAULT_COLLATION_ID;
    use gantry_common::config::{ShardRuleConfig, SliceConfig};

    fn slices(names: &[&str]) -> HashMap<String, Arc<Slice>> {
        let factory: Arc<dyn PoolFactory> = Arc::new(FaultFactory::new());
        names
            .iter()
            .map(|name| {
                let cfg = SliceConfig {
                    name: name.to_string(),
                    master: format!("{name}-master:3306"),
                    ..Default::default()
                };
                let slice =
                    Slice::assemble(&cfg, "utf8mb4", DEFAULT_COLLATION_ID, &factory).unwrap();
                (name.to_string(), Arc::new(slice))
            })
            .collect()
    }

    fn cfg_with_rule(default_slice: &str, rule_slices: &[&str]) -> NamespaceConfig {
        NamespaceConfig {
            name: "ns".into(),
            default_slice: default_slice.into(),
            shard_rules: vec![ShardRuleConfig {
                db: "db0".into(),
                table: "orders".into(),
                rule_type: "hash".into(),
                slices: rule_slices.iter().map(|s| s.to_string()).collect(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_route_by_rule_and_default() {
        let slices = slices(&["slice-0", "slice-1"]);
        let router = Router::new(&cfg_with_rule("slice-0", &["slice-1"]), &slices).unwrap();
        assert_eq!(router.route("db0", "orders"), "slice-1");
        assert_eq!(router.route("db0", "users"), "slice-0");
        assert_eq!(
            router.rule_slices("db0", "orders").unwrap(),
            &["slice-1".to_string()][..]
        );
    }

    #[test]
    fn test_unknown_rule_slice_rejected() {
        let slices = slices(&["slice-0"]);
        let err = Router::new(&cfg_with_rule("slice-0", &["slice-9"]), &slices).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains("slice-9"));
    }

    #[test]
    fn test_unknown_default_slice_rejected() {
        let slices = slices(&["slice-0"]);
        let err = Router::new(&cfg_with_rule("slice-7", &["slice-0"]), &slices).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_empty_default_slice_allowed() {
        let slices = slices(&["slice-0"]);
        let router = Router::new(&cfg_with_rule("", &["slice-0"]), &slices).unwrap();
        assert_eq!(router.default_slice(), "");
    }
}
