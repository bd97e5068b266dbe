//! Backend health supervisor.
//!
//! Three probe workers per slice — one per pool group. Each tick a worker
//! walks its group's pools in order, classifies every instance UP or DOWN,
//! and stores the verdict at the pool's index in the group's status map.
//! It is the only writer of that map.
//!
//! Probe protocol per pool: acquire with exponential backoff (sleeps 1, 2,
//! 4, ... units, give up once the next sleep would reach
//! `down_after_no_alive`), then `PING`, falling back to `RECONNECT`. An
//! instance that answered within the envelope is UP. A slave that is UP is
//! additionally checked for replication lag when the lag check is enabled
//! — unless the slice's master is DOWN, because a dead master stops the
//! slave IO thread and the lag check would demote healthy slaves.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use gantry_common::error::{ProxyError, ProxyResult};
use gantry_common::stop::StopSignal;

use crate::pool::{ConnectionPool, PooledConnect, QueryResult};
use crate::slice::{GroupRole, InstanceStatus, Slice};

/// Seconds of failed probing after which an instance is declared DOWN when
/// the namespace does not configure its own window.
pub const DEFAULT_DOWN_AFTER_NO_ALIVE_SECS: u64 = 8;

/// Probe cadence and thresholds for one namespace.
#[derive(Debug, Clone)]
pub struct ProbePolicy {
    /// Backoff envelope, measured in `backoff_unit`s.
    pub down_after_no_alive: u64,
    /// Replication lag threshold in seconds; 0 disables the lag check.
    pub seconds_behind_master: u64,
    /// Length of one backoff unit. One second on the wire; tests shrink it.
    pub backoff_unit: Duration,
    /// Sleep between passes over a pool group.
    pub check_interval: Duration,
}

impl Default for ProbePolicy {
    fn default() -> Self {
        Self {
            down_after_no_alive: DEFAULT_DOWN_AFTER_NO_ALIVE_SECS,
            seconds_behind_master: 0,
            backoff_unit: Duration::from_secs(1),
            check_interval: Duration::from_secs(2),
        }
    }
}

impl ProbePolicy {
    pub fn new(down_after_no_alive: u64, seconds_behind_master: u64) -> Self {
        Self {
            down_after_no_alive,
            seconds_behind_master,
            ..Self::default()
        }
    }
}

/// Outcome of probing one pool.
pub enum ProbeReport {
    /// Classification plus the live connection, if one was obtained. The
    /// caller runs the optional lag check on it and must recycle it.
    Done {
        status: InstanceStatus,
        conn: Option<Box<dyn PooledConnect>>,
    },
    /// Stop was requested mid-probe; no verdict for this tick.
    Cancelled,
}

/// Probe a single pool within the backoff envelope.
pub fn probe_instance(
    pool: &dyn ConnectionPool,
    policy: &ProbePolicy,
    stop: &StopSignal,
) -> ProbeReport {
    let mut sleep_units: u64 = 1;
    let mut alive: Option<Box<dyn PooledConnect>> = None;

    loop {
        match pool.acquire(stop) {
            Err(e) => {
                tracing::debug!(addr = pool.addr(), error = %e, "probe acquire failed");
            }
            Ok(mut conn) => {
                if conn.ping().is_ok() {
                    alive = Some(conn);
                    break;
                }
                match conn.reconnect() {
                    Ok(()) => {
                        alive = Some(conn);
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(addr = pool.addr(), error = %e, "probe reconnect failed");
                        conn.recycle();
                    }
                }
            }
        }

        // next sleep would reach the envelope: give up on this instance
        if sleep_units >= policy.down_after_no_alive {
            break;
        }
        if stop.wait(policy.backoff_unit * sleep_units as u32) {
            return ProbeReport::Cancelled;
        }
        sleep_units *= 2;
    }

    let status = if alive.is_some() {
        InstanceStatus::Up
    } else {
        InstanceStatus::Down
    };
    ProbeReport::Done {
        status,
        conn: alive,
    }
}

/// Replica state as reported by `SHOW SLAVE STATUS`. Missing or odd-typed
/// columns fall back to zero values, which read as unhealthy.
#[derive(Debug, Clone, Default)]
pub struct SlaveStatus {
    pub seconds_behind_master: u64,
    pub slave_io_running: String,
    pub slave_sql_running: String,
    pub master_log_file: String,
    pub read_master_log_pos: u64,
    pub relay_master_log_file: String,
    pub exec_master_log_pos: u64,
}

impl SlaveStatus {
    pub fn from_result(res: &QueryResult) -> Self {
        Self {
            seconds_behind_master: res.get_u64(0, "Seconds_Behind_Master").unwrap_or(0),
            slave_io_running: res.get_string(0, "Slave_IO_Running").unwrap_or_default(),
            slave_sql_running: res.get_string(0, "Slave_SQL_Running").unwrap_or_default(),
            master_log_file: res.get_string(0, "Master_Log_File").unwrap_or_default(),
            read_master_log_pos: res.get_u64(0, "Read_Master_Log_Pos").unwrap_or(0),
            relay_master_log_file: res.get_string(0, "Relay_Master_Log_File").unwrap_or_default(),
            exec_master_log_pos: res.get_u64(0, "Exec_Master_Log_Pos").unwrap_or(0),
        }
    }
}

/// Ask a live replica whether it is healthy for reads. A failed probe
/// query is absorbed — the instance already answered the ping, so only a
/// positive lag/stopped-thread finding demotes it.
pub fn slave_is_lagging(conn: &mut dyn PooledConnect, threshold: u64) -> bool {
    let res = match conn.execute("SHOW SLAVE STATUS") {
        Ok(res) => res,
        Err(e) => {
            tracing::warn!(addr = conn.addr(), error = %e, "SHOW SLAVE STATUS failed");
            return false;
        }
    };
    let status = SlaveStatus::from_result(&res);

    if status.seconds_behind_master > threshold {
        tracing::warn!(
            addr = conn.addr(),
            seconds_behind_master = status.seconds_behind_master,
            threshold,
            "replica lag over threshold"
        );
        return true;
    }
    if status.slave_io_running != "Yes" {
        tracing::warn!(addr = conn.addr(), io_running = %status.slave_io_running, "Slave_IO_Running is not Yes");
        return true;
    }
    if status.slave_sql_running != "Yes" {
        tracing::warn!(addr = conn.addr(), sql_running = %status.slave_sql_running, "Slave_SQL_Running is not Yes");
        return true;
    }
    false
}

/// Lag-gate: run the replication check only for slave-role groups, only on
/// an instance that just probed UP, only when the check is enabled, and
/// only while the slice's master is not DOWN.
fn should_check_replication(
    policy: &ProbePolicy,
    role: GroupRole,
    status: InstanceStatus,
    slice: &Slice,
) -> bool {
    if role == GroupRole::Master || status != InstanceStatus::Up {
        return false;
    }
    if policy.seconds_behind_master == 0 {
        return false;
    }
    slice.master().status_of(0) != Some(InstanceStatus::Down)
}

/// Spawns the three probe workers of one slice.
pub struct SliceProber;

impl SliceProber {
    pub fn spawn(
        slice: Arc<Slice>,
        policy: ProbePolicy,
        stop: StopSignal,
    ) -> ProxyResult<Vec<JoinHandle<()>>> {
        let roles = [GroupRole::Master, GroupRole::Slave, GroupRole::StatisticSlave];
        let mut handles = Vec::with_capacity(roles.len());
        for role in roles {
            let slice = Arc::clone(&slice);
            let policy = policy.clone();
            let stop = stop.clone();
            let handle = std::thread::Builder::new()
                .name(format!("gantry-probe-{}-{}", slice.name(), role))
                .spawn(move || run_group_worker(slice, role, policy, stop))
                .map_err(|e| {
                    ProxyError::Internal(format!("failed to spawn probe worker: {e}"))
                })?;
            handles.push(handle);
        }
        Ok(handles)
    }
}

fn run_group_worker(slice: Arc<Slice>, role: GroupRole, policy: ProbePolicy, stop: StopSignal) {
    tracing::info!(slice = slice.name(), role = %role, "probe worker started");
    'ticks: loop {
        let group = slice.group(role);
        for (idx, pool) in group.pools().iter().enumerate() {
            if stop.is_triggered() {
                break 'ticks;
            }
            let started = Instant::now();
            match probe_instance(pool.as_ref(), &policy, &stop) {
                ProbeReport::Cancelled => break 'ticks,
                ProbeReport::Done { mut status, conn } => {
                    let mut conn = conn;
                    if should_check_replication(&policy, role, status, &slice) {
                        if let Some(c) = conn.as_mut() {
                            if slave_is_lagging(c.as_mut(), policy.seconds_behind_master) {
                                status = InstanceStatus::Down;
                            }
                        }
                    }
                    if let Some(c) = conn.take() {
                        c.recycle();
                    }
                    group.set_status(idx, status);
                    let elapsed_ms = started.elapsed().as_millis() as u64;
                    if status == InstanceStatus::Down {
                        tracing::warn!(
                            slice = slice.name(),
                            role = %role,
                            addr = pool.addr(),
                            status = %status,
                            elapsed_ms,
                            "backend probe"
                        );
                    } else {
                        tracing::debug!(
                            slice = slice.name(),
                            role = %role,
                            addr = pool.addr(),
                            status = %status,
                            elapsed_ms,
                            "backend probe"
                        );
                    }
                }
            }
        }
        if stop.wait(policy.check_interval) {
            break;
        }
    }
    tracing::info!(slice = slice.name(), role = %role, "probe worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{FaultFactory, FaultPool};
    use crate::pool::PoolFactory;
    use gantry_common::charset::DEFAULT_COLLATION_ID;
    use gantry_common::config::SliceConfig;
    use std::sync::atomic::Ordering;

    fn fast_policy(down_after: u64, behind: u64) -> ProbePolicy {
        ProbePolicy {
            down_after_no_alive: down_after,
            seconds_behind_master: behind,
            backoff_unit: Duration::from_millis(5),
            check_interval: Duration::from_millis(20),
        }
    }

    fn pool_with_state() -> (FaultPool, Arc<crate::fault::FaultState>) {
        let state = Arc::new(crate::fault::FaultState::default());
        (FaultPool::new("db0:3306", state.clone()), state)
    }

    #[test]
    fn test_probe_healthy_is_up() {
        let (pool, state) = pool_with_state();
        let stop = StopSignal::new();
        match probe_instance(&pool, &fast_policy(8, 0), &stop) {
            ProbeReport::Done { status, conn } => {
                assert_eq!(status, InstanceStatus::Up);
                conn.unwrap().recycle();
            }
            ProbeReport::Cancelled => panic!("not cancelled"),
        }
        assert_eq!(state.acquires.load(Ordering::SeqCst), 1);
        assert_eq!(state.pings.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_backoff_attempts_then_down() {
        let (pool, state) = pool_with_state();
        state.set_unreachable();
        let stop = StopSignal::new();
        let started = Instant::now();
        match probe_instance(&pool, &fast_policy(8, 0), &stop) {
            ProbeReport::Done { status, conn } => {
                assert_eq!(status, InstanceStatus::Down);
                assert!(conn.is_none());
            }
            ProbeReport::Cancelled => panic!("not cancelled"),
        }
        // attempts at sleep units 1, 2, 4 plus the final one before giving up
        assert_eq!(state.acquires.load(Ordering::SeqCst), 4);
        // wall time: 1 + 2 + 4 = 7 units, within the 8-unit envelope
        let elapsed = started.elapsed();
        assert!(elapsed >= Duration::from_millis(30), "elapsed {elapsed:?}");
        assert!(elapsed < Duration::from_millis(8 * 5 + 40), "elapsed {elapsed:?}");
    }

    #[test]
    fn test_probe_single_attempt_envelope() {
        let (pool, state) = pool_with_state();
        state.set_unreachable();
        match probe_instance(&pool, &fast_policy(1, 0), &StopSignal::new()) {
            ProbeReport::Done { status, .. } => assert_eq!(status, InstanceStatus::Down),
            ProbeReport::Cancelled => panic!("not cancelled"),
        }
        assert_eq!(state.acquires.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_reconnect_rescues_dead_ping() {
        let (pool, state) = pool_with_state();
        state.fail_ping.store(true, Ordering::SeqCst);
        match probe_instance(&pool, &fast_policy(8, 0), &StopSignal::new()) {
            ProbeReport::Done { status, conn } => {
                assert_eq!(status, InstanceStatus::Up);
                conn.unwrap().recycle();
            }
            ProbeReport::Cancelled => panic!("not cancelled"),
        }
        assert_eq!(state.reconnects.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_probe_cancelled_mid_backoff() {
        let (pool, state) = pool_with_state();
        state.set_unreachable();
        let stop = StopSignal::new();
        let mut policy = fast_policy(64, 0);
        policy.backoff_unit = Duration::from_millis(50);
        let trigger = stop.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            trigger.trigger();
        });
        let started = Instant::now();
        assert!(matches!(
            probe_instance(&pool, &policy, &stop),
            ProbeReport::Cancelled
        ));
        assert!(started.elapsed() < Duration::from_millis(500));
        handle.join().unwrap();
    }

    #[test]
    fn test_slave_status_zero_values_read_unhealthy() {
        let status = SlaveStatus::from_result(&QueryResult::default());
        assert_eq!(status.seconds_behind_master, 0);
        assert_ne!(status.slave_io_running, "Yes");
    }

    #[test]
    fn test_worker_marks_lagging_slave_down_when_master_up() {
        let factory = Arc::new(FaultFactory::new());
        factory.state("s0:3306").set_slave_status(10, "Yes", "Yes");
        let cfg = SliceConfig {
            name: "slice-0".into(),
            master: "m0:3306".into(),
            slaves: vec!["s0:3306".into()],
            ..Default::default()
        };
        let dyn_factory: Arc<dyn PoolFactory> = factory.clone();
        let slice = Arc::new(
            Slice::assemble(&cfg, "utf8mb4", DEFAULT_COLLATION_ID, &dyn_factory).unwrap(),
        );
        let stop = StopSignal::new();
        let handles =
            SliceProber::spawn(slice.clone(), fast_policy(2, 5), stop.clone()).unwrap();

        wait_for(Duration::from_secs(2), || {
            slice.slave().status_of(0) == Some(InstanceStatus::Down)
        });
        assert_eq!(slice.master().status_of(0), Some(InstanceStatus::Up));
        assert_eq!(slice.slave().status_of(0), Some(InstanceStatus::Down));

        stop.trigger();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_worker_master_down_gates_lag_demotion() {
        let factory = Arc::new(FaultFactory::new());
        factory.state("m0:3306").set_unreachable();
        // replication numbers that would demote the slave if checked
        factory.state("s0:3306").set_slave_status(9999, "No", "No");
        let cfg = SliceConfig {
            name: "slice-0".into(),
            master: "m0:3306".into(),
            slaves: vec!["s0:3306".into()],
            ..Default::default()
        };
        let dyn_factory: Arc<dyn PoolFactory> = factory.clone();
        let slice = Arc::new(
            Slice::assemble(&cfg, "utf8mb4", DEFAULT_COLLATION_ID, &dyn_factory).unwrap(),
        );
        let stop = StopSignal::new();
        let handles =
            SliceProber::spawn(slice.clone(), fast_policy(2, 5), stop.clone()).unwrap();

        wait_for(Duration::from_secs(2), || {
            slice.master().status_of(0) == Some(InstanceStatus::Down)
        });
        // give the slave worker at least one full tick after the master
        // transition, then make sure lag did not demote it
        std::thread::sleep(Duration::from_millis(120));
        assert_eq!(slice.master().status_of(0), Some(InstanceStatus::Down));
        assert_eq!(slice.slave().status_of(0), Some(InstanceStatus::Up));

        stop.trigger();
        for h in handles {
            h.join().unwrap();
        }
    }

    #[test]
    fn test_worker_all_up_tick() {
        let factory = Arc::new(FaultFactory::new());
        let cfg = SliceConfig {
            name: "slice-0".into(),
            master: "m0:3306".into(),
            slaves: vec!["s0:3306".into(), "s1:3306".into()],
            statistic_slaves: vec!["t0:3306".into()],
            ..Default::default()
        };
        let dyn_factory: Arc<dyn PoolFactory> = factory.clone();
        let slice = Arc::new(
            Slice::assemble(&cfg, "utf8mb4", DEFAULT_COLLATION_ID, &dyn_factory).unwrap(),
        );
        let stop = StopSignal::new();
        let handles =
            SliceProber::spawn(slice.clone(), fast_policy(2, 0), stop.clone()).unwrap();

        wait_for(Duration::from_secs(2), || {
            factory.state("t0:3306").pings.load(Ordering::SeqCst) > 0
        });
        assert!(slice
            .master()
            .statuses()
            .iter()
            .chain(slice.slave().statuses().iter())
            .chain(slice.statistic_slave().statuses().iter())
            .all(|s| *s == InstanceStatus::Up));

        stop.trigger();
        for h in handles {
            h.join().unwrap();
        }
    }

    fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached within {timeout:?}");
    }
}
