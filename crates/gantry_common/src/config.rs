//! Configuration models pushed by the config store.
//!
//! A `NamespaceConfig` is the full per-tenant record: allowed databases,
//! users, backend slices, routing rules, sequences, and safety policies.
//! Field semantics (defaults, sentinels like `-1`) are interpreted by the
//! namespace constructor, not here; these types are the wire shape.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// `UserConfig::rw_flag`: user may only read.
pub const RW_FLAG_READ_ONLY: i32 = 1;
/// `UserConfig::rw_flag`: user may read and write.
pub const RW_FLAG_READ_WRITE: i32 = 2;

/// `UserConfig::rw_split`: all statements go to the master.
pub const RW_SPLIT_OFF: i32 = 0;
/// `UserConfig::rw_split`: reads may be routed to slaves.
pub const RW_SPLIT_ON: i32 = 1;

/// `UserConfig::other_property`: ordinary user.
pub const USER_PROPERTY_NORMAL: i32 = 0;
/// `UserConfig::other_property`: statistic user, routed to statistic slaves.
pub const USER_PROPERTY_STATISTIC: i32 = 1;

/// Per-tenant proxy configuration record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceConfig {
    pub name: String,

    /// Session logs every statement when true.
    #[serde(default)]
    pub open_general_log: bool,

    /// Decimal milliseconds as a string; empty means 1000, negative is an error.
    #[serde(default)]
    pub slow_sql_time: String,

    /// Milliseconds; `<= 0` disables the per-statement execution cap.
    #[serde(default)]
    pub max_sql_execute_time: i64,

    /// Rows; `-1` disables, other non-positive values fall back to 10000.
    #[serde(default)]
    pub max_sql_result_size: i64,

    /// Logical DB name → enabled flag.
    #[serde(default)]
    pub allowed_dbs: HashMap<String, bool>,

    /// Logical → physical DB. Empty means identity over `allowed_dbs`.
    #[serde(default)]
    pub default_phy_dbs: HashMap<String, String>,

    /// CIDR / exact-IP / percent-glob rules; empty means allow-all.
    #[serde(default)]
    pub allowed_ip: Vec<String>,

    #[serde(default)]
    pub default_charset: String,
    #[serde(default)]
    pub default_collation: String,

    #[serde(default)]
    pub users: Vec<UserConfig>,

    #[serde(default)]
    pub slices: Vec<SliceConfig>,

    #[serde(default)]
    pub shard_rules: Vec<ShardRuleConfig>,

    #[serde(default)]
    pub global_sequences: Vec<GlobalSequenceConfig>,

    /// Statements to fingerprint into the blacklist.
    #[serde(default)]
    pub black_sql: Vec<String>,

    /// `<= 0` means effectively unlimited.
    #[serde(default)]
    pub max_client_connections: i64,

    /// Seconds a probe keeps retrying before marking an instance DOWN;
    /// 0 means the default (8), negative is an error.
    #[serde(default)]
    pub down_after_no_alive: i64,

    /// Replication lag threshold in seconds; 0 disables the lag check.
    #[serde(default)]
    pub seconds_behind_master: u64,

    #[serde(default)]
    pub check_select_lock: bool,

    #[serde(default)]
    pub default_slice: String,

    /// Session holds its backend connection across statements when true.
    #[serde(default)]
    pub set_for_keep_session: bool,
}

/// One backend cluster: a master plus optional slave groups.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SliceConfig {
    pub name: String,
    #[serde(default)]
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    /// `host:port` of the master instance.
    pub master: String,
    #[serde(default)]
    pub slaves: Vec<String>,
    #[serde(default)]
    pub statistic_slaves: Vec<String>,
    /// Connection pool capacity per instance.
    #[serde(default)]
    pub capacity: usize,
    #[serde(default)]
    pub idle_timeout_ms: u64,
}

/// Proxy user entry.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UserConfig {
    pub user_name: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub rw_flag: i32,
    #[serde(default)]
    pub rw_split: i32,
    #[serde(default)]
    pub other_property: i32,
}

/// Registration of one MySQL-backed global sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalSequenceConfig {
    pub slice_name: String,
    pub db: String,
    pub table: String,
    #[serde(default)]
    pub pk_name: String,
}

/// One shard routing rule; `slices` must name existing slices.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ShardRuleConfig {
    pub db: String,
    pub table: String,
    #[serde(default)]
    pub rule_type: String,
    #[serde(default)]
    pub slices: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_deserializes() {
        let cfg: NamespaceConfig = serde_json::from_str(
            r#"{
                "name": "tenant_a",
                "allowed_dbs": {"sbtest1": true},
                "slices": [{"name": "slice-0", "master": "127.0.0.1:3306"}]
            }"#,
        )
        .unwrap();
        assert_eq!(cfg.name, "tenant_a");
        assert_eq!(cfg.slices.len(), 1);
        assert_eq!(cfg.slices[0].master, "127.0.0.1:3306");
        assert!(cfg.slow_sql_time.is_empty());
        assert_eq!(cfg.max_client_connections, 0);
        assert!(!cfg.set_for_keep_session);
    }

    #[test]
    fn test_roundtrip() {
        let mut cfg = NamespaceConfig {
            name: "t".into(),
            seconds_behind_master: 5,
            ..Default::default()
        };
        cfg.users.push(UserConfig {
            user_name: "app".into(),
            rw_flag: RW_FLAG_READ_WRITE,
            rw_split: RW_SPLIT_ON,
            ..Default::default()
        });
        let json = serde_json::to_string(&cfg).unwrap();
        let back: NamespaceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "t");
        assert_eq!(back.seconds_behind_master, 5);
        assert_eq!(back.users[0].rw_flag, RW_FLAG_READ_WRITE);
    }
}
