//! The per-tenant runtime aggregate.
//!
//! A `Namespace` is built once from a `NamespaceConfig`, owns its slices
//! and probe workers, answers policy lookups on the query path, and is
//! torn down with `close`. Nothing structural mutates after construction;
//! only the per-instance statuses change, and only the probers write
//! those.
//!
//! Construction is staged: pure config parsing first, then backend
//! resources, then referential validation, then the probe workers. An
//! error after pools exist releases everything already built — a partial
//! namespace is never published.

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use gantry_backend::health::{ProbePolicy, SliceProber, DEFAULT_DOWN_AFTER_NO_ALIVE_SECS};
use gantry_backend::pool::PoolFactory;
use gantry_backend::slice::Slice;
use gantry_common::cache::{SyncLru, PLAN_CACHE_CAPACITY, SQL_CACHE_CAPACITY};
use gantry_common::charset::{self, CollationId};
use gantry_common::config::{
    NamespaceConfig, RW_FLAG_READ_WRITE, RW_SPLIT_ON, USER_PROPERTY_STATISTIC,
};
use gantry_common::error::{ConfigError, PolicyError, ProxyResult};
use gantry_common::fingerprint::{fingerprint, md5_hex};
use gantry_common::ip::IpMatcher;
use gantry_common::stop::StopSignal;

use crate::context::{RequestContext, FINGERPRINT_KEY};
use crate::plan::{plan_cache_key, Plan};
use crate::router::Router;
use crate::sequence::{sequence_key, MysqlSequence, SequenceRegistry};

/// Drain wait before a delayed close releases backends, so in-flight
/// sessions on a replaced namespace can finish.
pub const DELAY_CLOSE: Duration = Duration::from_secs(60);

const DEFAULT_SLOW_SQL_TIME_MS: i64 = 1000;
const DEFAULT_MAX_SQL_RESULT_SIZE: i64 = 10000;
const DEFAULT_MAX_CLIENT_CONNECTIONS: i64 = 100_000_000;

/// Runtime flags of one proxy user.
#[derive(Debug, Clone, Copy)]
pub struct UserProperty {
    pub rw_flag: i32,
    pub rw_split: i32,
    pub other_property: i32,
}

pub struct Namespace {
    name: String,
    allowed_dbs: HashMap<String, bool>,
    default_phy_dbs: HashMap<String, String>,
    /// md5(fingerprint) → fingerprint
    blacklist: HashMap<String, String>,
    slow_sql_time_ms: i64,
    allow_ips: Vec<IpMatcher>,
    router: Router,
    sequences: SequenceRegistry,
    slices: HashMap<String, Arc<Slice>>,
    user_properties: HashMap<String, UserProperty>,
    default_charset: String,
    default_collation_id: CollationId,
    open_general_log: bool,
    max_sql_execute_time_ms: i64,
    max_sql_result_size: i64,
    default_slice: String,
    down_after_no_alive_secs: u64,
    seconds_behind_master: u64,
    max_client_connections: i64,
    check_select_lock: bool,
    keep_session: bool,

    slow_sql_cache: SyncLru<String>,
    error_sql_cache: SyncLru<String>,
    backend_slow_sql_cache: SyncLru<String>,
    backend_error_sql_cache: SyncLru<String>,
    plan_cache: SyncLru<Arc<dyn Plan>>,

    stop: StopSignal,
    prober_handles: Mutex<Vec<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Namespace {
    /// Build the namespace and start its health supervisors.
    pub fn new(cfg: &NamespaceConfig, factory: Arc<dyn PoolFactory>) -> ProxyResult<Self> {
        let down_after = parse_down_after_no_alive(cfg.down_after_no_alive)?;
        let probe = ProbePolicy::new(down_after, cfg.seconds_behind_master);
        Self::with_probe_policy(cfg, factory, probe)
    }

    /// Like `new` but with an explicit probe cadence. Embedders tighten the
    /// backoff unit and tick interval in tests; production uses `new`.
    pub fn with_probe_policy(
        cfg: &NamespaceConfig,
        factory: Arc<dyn PoolFactory>,
        probe: ProbePolicy,
    ) -> ProxyResult<Self> {
        // stage 1: pure config parsing, nothing to release on error
        let blacklist = parse_black_sqls(&cfg.black_sql);
        let slow_sql_time_ms = parse_slow_sql_time(&cfg.slow_sql_time)?;
        let max_sql_execute_time_ms = cfg.max_sql_execute_time.max(0);
        let max_sql_result_size =
            if cfg.max_sql_result_size <= 0 && cfg.max_sql_result_size != -1 {
                DEFAULT_MAX_SQL_RESULT_SIZE
            } else {
                cfg.max_sql_result_size
            };
        let allowed_dbs: HashMap<String, bool> = cfg
            .allowed_dbs
            .iter()
            .map(|(db, allowed)| (db.trim().to_string(), *allowed))
            .collect();
        let default_phy_dbs = parse_default_phy_dbs(&cfg.default_phy_dbs, &allowed_dbs)?;
        let allow_ips = parse_allow_ips(&cfg.allowed_ip)?;
        let (default_charset, default_collation_id) =
            charset::resolve(&cfg.default_charset, &cfg.default_collation)?;
        let user_properties: HashMap<String, UserProperty> = cfg
            .users
            .iter()
            .map(|u| {
                (
                    u.user_name.clone(),
                    UserProperty {
                        rw_flag: u.rw_flag,
                        rw_split: u.rw_split,
                        other_property: u.other_property,
                    },
                )
            })
            .collect();
        let down_after_no_alive_secs = parse_down_after_no_alive(cfg.down_after_no_alive)?;
        let max_client_connections = if cfg.max_client_connections <= 0 {
            DEFAULT_MAX_CLIENT_CONNECTIONS
        } else {
            cfg.max_client_connections
        };

        // stage 2: backend resources
        let slices = parse_slices(&cfg.slices, &default_charset, default_collation_id, &factory)?;

        // stage 3: referential validation against the slice set
        let router = match Router::new(cfg, &slices) {
            Ok(router) => router,
            Err(e) => {
                close_slices(&slices);
                return Err(e);
            }
        };
        let sequences = match build_sequences(cfg, &slices) {
            Ok(sequences) => sequences,
            Err(e) => {
                close_slices(&slices);
                return Err(e);
            }
        };

        let ns = Self {
            name: cfg.name.clone(),
            allowed_dbs,
            default_phy_dbs,
            blacklist,
            slow_sql_time_ms,
            allow_ips,
            router,
            sequences,
            slices,
            user_properties,
            default_charset,
            default_collation_id,
            open_general_log: cfg.open_general_log,
            max_sql_execute_time_ms,
            max_sql_result_size,
            default_slice: cfg.default_slice.clone(),
            down_after_no_alive_secs,
            seconds_behind_master: cfg.seconds_behind_master,
            max_client_connections,
            check_select_lock: cfg.check_select_lock,
            keep_session: cfg.set_for_keep_session,
            slow_sql_cache: SyncLru::with_capacity(SQL_CACHE_CAPACITY),
            error_sql_cache: SyncLru::with_capacity(SQL_CACHE_CAPACITY),
            backend_slow_sql_cache: SyncLru::with_capacity(SQL_CACHE_CAPACITY),
            backend_error_sql_cache: SyncLru::with_capacity(SQL_CACHE_CAPACITY),
            plan_cache: SyncLru::with_capacity(PLAN_CACHE_CAPACITY),
            stop: StopSignal::new(),
            prober_handles: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        };

        // stage 4: probe workers, one per pool group
        if let Err(e) = ns.start_probers(probe) {
            ns.close_now();
            return Err(e);
        }

        tracing::info!(
            namespace = %ns.name,
            slices = ns.slices.len(),
            "namespace constructed"
        );
        Ok(ns)
    }

    fn start_probers(&self, policy: ProbePolicy) -> ProxyResult<()> {
        let mut handles = self.prober_handles.lock();
        for slice in self.slices.values() {
            handles.extend(SliceProber::spawn(
                Arc::clone(slice),
                policy.clone(),
                self.stop.clone(),
            )?);
        }
        Ok(())
    }

    // ── identity & read-only accessors ───────────────────────────────────

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn slice(&self, name: &str) -> Option<Arc<Slice>> {
        self.slices.get(name).cloned()
    }

    pub fn slices(&self) -> &HashMap<String, Arc<Slice>> {
        &self.slices
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn sequences(&self) -> &SequenceRegistry {
        &self.sequences
    }

    pub fn default_charset(&self) -> &str {
        &self.default_charset
    }

    pub fn default_collation_id(&self) -> CollationId {
        self.default_collation_id
    }

    pub fn default_slice(&self) -> &str {
        &self.default_slice
    }

    pub fn physical_dbs(&self) -> &HashMap<String, String> {
        &self.default_phy_dbs
    }

    pub fn allowed_db_names(&self) -> Vec<String> {
        self.allowed_dbs.keys().cloned().collect()
    }

    pub fn slow_sql_time_ms(&self) -> i64 {
        self.slow_sql_time_ms
    }

    /// 0 means the per-statement execution cap is disabled.
    pub fn max_execute_time_ms(&self) -> i64 {
        self.max_sql_execute_time_ms
    }

    /// -1 means the result-size cap is disabled.
    pub fn max_result_size(&self) -> i64 {
        self.max_sql_result_size
    }

    pub fn max_client_connections(&self) -> i64 {
        self.max_client_connections
    }

    pub fn down_after_no_alive_secs(&self) -> u64 {
        self.down_after_no_alive_secs
    }

    pub fn seconds_behind_master(&self) -> u64 {
        self.seconds_behind_master
    }

    pub fn open_general_log(&self) -> bool {
        self.open_general_log
    }

    pub fn check_select_lock(&self) -> bool {
        self.check_select_lock
    }

    /// Session persistence: hold one backend connection across statements.
    pub fn is_keep_session(&self) -> bool {
        self.keep_session
    }

    // ── policy lookups (hot path) ────────────────────────────────────────

    /// An empty rule list admits every client.
    pub fn is_client_ip_allowed(&self, ip: &IpAddr) -> bool {
        if self.allow_ips.is_empty() {
            return true;
        }
        self.allow_ips.iter().any(|rule| rule.matches(ip))
    }

    /// Present *and* enabled.
    pub fn is_allowed_db(&self, db: &str) -> bool {
        self.allowed_dbs.get(db).copied().unwrap_or(false)
    }

    /// Physical DB behind a logical name. An empty logical name resolves to
    /// nothing (the session has not selected a DB yet); an unknown one is a
    /// policy error carrying the name.
    pub fn default_physical_db(&self, logical: &str) -> ProxyResult<Option<String>> {
        if logical.is_empty() {
            return Ok(None);
        }
        match self.default_phy_dbs.get(logical) {
            Some(phy) => Ok(Some(phy.clone())),
            None => Err(PolicyError::InvalidDb(logical.to_string()).into()),
        }
    }

    /// Blacklist check. Computes the statement fingerprint, stashes it in
    /// the request context for later bookkeeping, and rejects when its md5
    /// is blacklisted.
    pub fn is_sql_allowed(&self, ctx: &RequestContext, sql: &str) -> bool {
        if self.blacklist.is_empty() {
            return true;
        }
        let fp = fingerprint(sql);
        let digest = md5_hex(&fp);
        ctx.set(FINGERPRINT_KEY, fp);
        !self.blacklist.contains_key(&digest)
    }

    pub fn is_allow_write(&self, user: &str) -> bool {
        self.user_property(user)
            .map(|p| p.rw_flag == RW_FLAG_READ_WRITE)
            .unwrap_or(false)
    }

    pub fn is_rw_split(&self, user: &str) -> bool {
        self.user_property(user)
            .map(|p| p.rw_split == RW_SPLIT_ON)
            .unwrap_or(false)
    }

    pub fn is_statistic_user(&self, user: &str) -> bool {
        self.user_property(user)
            .map(|p| p.other_property == USER_PROPERTY_STATISTIC)
            .unwrap_or(false)
    }

    /// Sessions resolve users during auth, so an unknown user here is a
    /// caller bug; deny and log rather than panic.
    fn user_property(&self, user: &str) -> Option<UserProperty> {
        let prop = self.user_properties.get(user).copied();
        if prop.is_none() {
            tracing::warn!(namespace = %self.name, user, "policy lookup for unknown user");
        }
        prop
    }

    // ── plan cache ───────────────────────────────────────────────────────

    pub fn get_cached_plan(&self, db: &str, sql: &str) -> Option<Arc<dyn Plan>> {
        self.plan_cache.get(&plan_cache_key(db, sql))
    }

    /// If-absent: concurrent builds of equivalent plans keep the first.
    pub fn set_cached_plan(&self, db: &str, sql: &str, plan: Arc<dyn Plan>) {
        self.plan_cache.put_if_absent(plan_cache_key(db, sql), plan);
    }

    // ── fingerprint caches ───────────────────────────────────────────────

    pub fn set_slow_sql_fingerprint(&self, md5: &str, fp: &str) {
        self.slow_sql_cache.put(md5, fp.to_string());
    }

    pub fn get_slow_sql_fingerprint(&self, md5: &str) -> Option<String> {
        self.slow_sql_cache.get(md5)
    }

    pub fn slow_sql_fingerprints(&self) -> HashMap<String, String> {
        self.slow_sql_cache.entries().into_iter().collect()
    }

    pub fn clear_slow_sql_fingerprints(&self) {
        self.slow_sql_cache.clear();
    }

    pub fn set_error_sql_fingerprint(&self, md5: &str, fp: &str) {
        self.error_sql_cache.put(md5, fp.to_string());
    }

    pub fn get_error_sql_fingerprint(&self, md5: &str) -> Option<String> {
        self.error_sql_cache.get(md5)
    }

    pub fn error_sql_fingerprints(&self) -> HashMap<String, String> {
        self.error_sql_cache.entries().into_iter().collect()
    }

    pub fn clear_error_sql_fingerprints(&self) {
        self.error_sql_cache.clear();
    }

    pub fn set_backend_slow_sql_fingerprint(&self, md5: &str, fp: &str) {
        self.backend_slow_sql_cache.put(md5, fp.to_string());
    }

    pub fn get_backend_slow_sql_fingerprint(&self, md5: &str) -> Option<String> {
        self.backend_slow_sql_cache.get(md5)
    }

    pub fn backend_slow_sql_fingerprints(&self) -> HashMap<String, String> {
        self.backend_slow_sql_cache.entries().into_iter().collect()
    }

    pub fn clear_backend_slow_sql_fingerprints(&self) {
        self.backend_slow_sql_cache.clear();
    }

    pub fn set_backend_error_sql_fingerprint(&self, md5: &str, fp: &str) {
        self.backend_error_sql_cache.put(md5, fp.to_string());
    }

    pub fn get_backend_error_sql_fingerprint(&self, md5: &str) -> Option<String> {
        self.backend_error_sql_cache.get(md5)
    }

    pub fn backend_error_sql_fingerprints(&self) -> HashMap<String, String> {
        self.backend_error_sql_cache.entries().into_iter().collect()
    }

    pub fn clear_backend_error_sql_fingerprints(&self) {
        self.backend_error_sql_cache.clear();
    }

    // ── teardown ─────────────────────────────────────────────────────────

    /// Release the namespace. `delay` waits out the drain window first so
    /// in-flight sessions on a replaced namespace can finish.
    pub fn close(&self, delay: bool) {
        self.close_after(if delay { DELAY_CLOSE } else { Duration::ZERO });
    }

    /// `close` with an explicit drain duration.
    pub fn close_after(&self, drain: Duration) {
        if !drain.is_zero() {
            std::thread::sleep(drain);
        }
        self.close_now();
    }

    fn close_now(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.stop.trigger();
        let handles = std::mem::take(&mut *self.prober_handles.lock());
        for handle in handles {
            if handle.join().is_err() {
                tracing::warn!(namespace = %self.name, "probe worker panicked");
            }
        }
        for (name, slice) in &self.slices {
            slice.close();
            tracing::debug!(namespace = %self.name, slice = %name, "slice closed");
        }
        self.slow_sql_cache.clear();
        self.error_sql_cache.clear();
        self.backend_slow_sql_cache.clear();
        self.backend_error_sql_cache.clear();
        self.plan_cache.clear();
        tracing::info!(namespace = %self.name, "namespace closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

// ── config parsing ───────────────────────────────────────────────────────

fn parse_black_sqls(sqls: &[String]) -> HashMap<String, String> {
    let mut map = HashMap::with_capacity(sqls.len());
    for sql in sqls {
        let sql = sql.trim();
        if sql.is_empty() {
            continue;
        }
        let fp = fingerprint(sql);
        map.insert(md5_hex(&fp), fp);
    }
    map
}

fn parse_slow_sql_time(raw: &str) -> ProxyResult<i64> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(DEFAULT_SLOW_SQL_TIME_MS);
    }
    let ms: i64 = raw
        .parse()
        .map_err(|_| ConfigError::InvalidSlowSqlTime(raw.to_string()))?;
    if ms < 0 {
        return Err(ConfigError::InvalidSlowSqlTime(raw.to_string()).into());
    }
    Ok(ms)
}

fn parse_default_phy_dbs(
    configured: &HashMap<String, String>,
    allowed_dbs: &HashMap<String, bool>,
) -> ProxyResult<HashMap<String, String>> {
    // no logical-DB mode: identity over the allowed set
    if configured.is_empty() {
        return Ok(allowed_dbs
            .keys()
            .map(|db| (db.clone(), db.clone()))
            .collect());
    }

    let mapping: HashMap<String, String> = configured
        .iter()
        .map(|(logical, phy)| (logical.trim().to_string(), phy.trim().to_string()))
        .collect();
    for db in allowed_dbs.keys() {
        if !mapping.contains_key(db) {
            return Err(ConfigError::MissingPhysicalDb(db.clone()).into());
        }
    }
    Ok(mapping)
}

fn parse_allow_ips(rules: &[String]) -> ProxyResult<Vec<IpMatcher>> {
    let mut matchers = Vec::with_capacity(rules.len());
    for rule in rules {
        let rule = rule.trim();
        if rule.is_empty() {
            continue;
        }
        matchers.push(IpMatcher::parse(rule)?);
    }
    Ok(matchers)
}

fn parse_down_after_no_alive(secs: i64) -> ProxyResult<u64> {
    if secs < 0 {
        return Err(ConfigError::NegativeDownAfterNoAlive(secs).into());
    }
    if secs == 0 {
        return Ok(DEFAULT_DOWN_AFTER_NO_ALIVE_SECS);
    }
    Ok(secs as u64)
}

fn parse_slices(
    cfgs: &[gantry_common::config::SliceConfig],
    charset: &str,
    collation_id: CollationId,
    factory: &Arc<dyn PoolFactory>,
) -> ProxyResult<HashMap<String, Arc<Slice>>> {
    let mut slices = HashMap::with_capacity(cfgs.len());
    for cfg in cfgs {
        let name = cfg.name.trim().to_string();
        if slices.contains_key(&name) {
            close_slices(&slices);
            return Err(ConfigError::DuplicateSlice(name).into());
        }
        match Slice::assemble(cfg, charset, collation_id, factory) {
            Ok(slice) => {
                slices.insert(name, Arc::new(slice));
            }
            Err(e) => {
                close_slices(&slices);
                return Err(e);
            }
        }
    }
    Ok(slices)
}

fn close_slices(slices: &HashMap<String, Arc<Slice>>) {
    for slice in slices.values() {
        slice.close();
    }
}

fn build_sequences(
    cfg: &NamespaceConfig,
    slices: &HashMap<String, Arc<Slice>>,
) -> ProxyResult<SequenceRegistry> {
    let mut registry = SequenceRegistry::new();
    for seq in &cfg.global_sequences {
        if !slices.contains_key(&seq.slice_name) {
            return Err(ConfigError::UnknownSliceRef {
                referrer: format!("global sequence {}.{}", seq.db, seq.table),
                slice: seq.slice_name.clone(),
            }
            .into());
        }
        let seq_name = sequence_key(&seq.db, &seq.table);
        registry.set_sequence(
            &seq.db,
            &seq.table,
            MysqlSequence::new(&seq.slice_name, seq_name, &seq.pk_name),
        );
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_slow_sql_time_defaults_and_bounds() {
        assert_eq!(parse_slow_sql_time("").unwrap(), 1000);
        assert_eq!(parse_slow_sql_time("  ").unwrap(), 1000);
        assert_eq!(parse_slow_sql_time("250").unwrap(), 250);
        assert!(parse_slow_sql_time("-5").is_err());
        assert!(parse_slow_sql_time("fast").is_err());
    }

    #[test]
    fn test_parse_down_after_no_alive() {
        assert_eq!(parse_down_after_no_alive(0).unwrap(), 8);
        assert_eq!(parse_down_after_no_alive(3).unwrap(), 3);
        assert!(parse_down_after_no_alive(-1).is_err());
    }

    #[test]
    fn test_phy_dbs_identity_mode() {
        let allowed = HashMap::from([("sbtest1".to_string(), true)]);
        let mapping = parse_default_phy_dbs(&HashMap::new(), &allowed).unwrap();
        assert_eq!(mapping.get("sbtest1").map(String::as_str), Some("sbtest1"));
    }

    #[test]
    fn test_phy_dbs_logical_mode_requires_every_db() {
        let allowed =
            HashMap::from([("a".to_string(), true), ("b".to_string(), true)]);
        let configured = HashMap::from([("a".to_string(), "A".to_string())]);
        let err = parse_default_phy_dbs(&configured, &allowed).unwrap_err();
        assert!(err.is_config());
        assert!(err.to_string().contains('b'));
    }

    #[test]
    fn test_blacklist_trims_and_dedupes() {
        let map = parse_black_sqls(&[
            "  select * from users where id=?  ".to_string(),
            "".to_string(),
            "SELECT * FROM users WHERE id=42".to_string(),
        ]);
        // both entries normalize to the same fingerprint
        assert_eq!(map.len(), 1);
        let fp = map.values().next().unwrap();
        assert_eq!(fp, "select * from users where id=?");
    }

    #[test]
    fn test_allow_ips_skip_blanks() {
        let matchers = parse_allow_ips(&[
            " 10.0.0.0/8 ".to_string(),
            "".to_string(),
            "  ".to_string(),
        ])
        .unwrap();
        assert_eq!(matchers.len(), 1);
    }
}
