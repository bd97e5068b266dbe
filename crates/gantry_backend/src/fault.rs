//! Deterministic fault injection for the backend seam.
//!
//! `FaultPool` implements the pool traits entirely in memory with per-flag
//! failure switches, so probe and namespace behavior can be exercised
//! without a MySQL instance: unreachable pools, ping-dead connections,
//! canned `SHOW SLAVE STATUS` answers. Tests reach the switches through
//! the factory by endpoint address.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;

use gantry_common::charset::CollationId;
use gantry_common::error::BackendError;
use gantry_common::stop::StopSignal;

use crate::pool::{
    BackendResult, ConnectionPool, PoolFactory, PooledConnect, QueryResult, Value,
};

/// Shared failure switches and call counters for one endpoint.
#[derive(Default)]
pub struct FaultState {
    pub fail_acquire: AtomicBool,
    pub fail_ping: AtomicBool,
    pub fail_reconnect: AtomicBool,
    pub fail_execute: AtomicBool,
    /// Canned answer for `SHOW SLAVE STATUS`; `None` answers with an empty
    /// result set (what a non-replica returns).
    pub slave_status: Mutex<Option<QueryResult>>,

    pub acquires: AtomicU64,
    pub pings: AtomicU64,
    pub reconnects: AtomicU64,
    pub executes: AtomicU64,
    pub recycles: AtomicU64,
    pub closed: AtomicBool,
}

impl FaultState {
    pub fn set_healthy(&self) {
        self.fail_acquire.store(false, Ordering::SeqCst);
        self.fail_ping.store(false, Ordering::SeqCst);
        self.fail_reconnect.store(false, Ordering::SeqCst);
        self.fail_execute.store(false, Ordering::SeqCst);
    }

    /// Pool acquire always fails, as if the instance dropped off the network.
    pub fn set_unreachable(&self) {
        self.fail_acquire.store(true, Ordering::SeqCst);
    }

    /// Connections come out of the pool but neither ping nor reconnect works.
    pub fn set_connection_dead(&self) {
        self.fail_ping.store(true, Ordering::SeqCst);
        self.fail_reconnect.store(true, Ordering::SeqCst);
    }

    pub fn set_slave_status(&self, seconds_behind_master: u64, io_running: &str, sql_running: &str) {
        *self.slave_status.lock() = Some(slave_status_result(
            seconds_behind_master,
            io_running,
            sql_running,
        ));
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Build a one-row `SHOW SLAVE STATUS` result the way a replica answers.
pub fn slave_status_result(
    seconds_behind_master: u64,
    io_running: &str,
    sql_running: &str,
) -> QueryResult {
    let mut res = QueryResult::new(vec![
        "Seconds_Behind_Master".to_string(),
        "Slave_IO_Running".to_string(),
        "Slave_SQL_Running".to_string(),
        "Master_Log_File".to_string(),
        "Read_Master_Log_Pos".to_string(),
        "Relay_Master_Log_File".to_string(),
        "Exec_Master_Log_Pos".to_string(),
    ]);
    res.push_row(vec![
        Value::UInt(seconds_behind_master),
        Value::Text(io_running.to_string()),
        Value::Text(sql_running.to_string()),
        Value::Text("mysql-bin.000003".to_string()),
        Value::UInt(120),
        Value::Text("mysql-bin.000003".to_string()),
        Value::UInt(120),
    ]);
    res
}

/// In-memory pool for one endpoint.
pub struct FaultPool {
    addr: String,
    state: Arc<FaultState>,
}

impl FaultPool {
    pub fn new(addr: impl Into<String>, state: Arc<FaultState>) -> Self {
        Self {
            addr: addr.into(),
            state,
        }
    }

    pub fn state(&self) -> &Arc<FaultState> {
        &self.state
    }
}

impl ConnectionPool for FaultPool {
    fn acquire(&self, _stop: &StopSignal) -> BackendResult<Box<dyn PooledConnect>> {
        self.state.acquires.fetch_add(1, Ordering::SeqCst);
        if self.state.is_closed() || self.state.fail_acquire.load(Ordering::SeqCst) {
            return Err(BackendError::Acquire {
                addr: self.addr.clone(),
                reason: "injected acquire failure".to_string(),
            });
        }
        Ok(Box::new(FaultConn {
            addr: self.addr.clone(),
            state: self.state.clone(),
        }))
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn close(&self) -> BackendResult<()> {
        self.state.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

struct FaultConn {
    addr: String,
    state: Arc<FaultState>,
}

impl PooledConnect for FaultConn {
    fn ping(&mut self) -> BackendResult<()> {
        self.state.pings.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_ping.load(Ordering::SeqCst) {
            return Err(BackendError::Ping {
                addr: self.addr.clone(),
                reason: "injected ping failure".to_string(),
            });
        }
        Ok(())
    }

    fn reconnect(&mut self) -> BackendResult<()> {
        self.state.reconnects.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_reconnect.load(Ordering::SeqCst) {
            return Err(BackendError::Reconnect {
                addr: self.addr.clone(),
                reason: "injected reconnect failure".to_string(),
            });
        }
        Ok(())
    }

    fn execute(&mut self, sql: &str) -> BackendResult<QueryResult> {
        self.state.executes.fetch_add(1, Ordering::SeqCst);
        if self.state.fail_execute.load(Ordering::SeqCst) {
            return Err(BackendError::Query {
                addr: self.addr.clone(),
                reason: "injected query failure".to_string(),
            });
        }
        if sql.to_ascii_lowercase().contains("show slave status") {
            if let Some(res) = self.state.slave_status.lock().clone() {
                return Ok(res);
            }
        }
        Ok(QueryResult::default())
    }

    fn addr(&self) -> &str {
        &self.addr
    }

    fn recycle(self: Box<Self>) {
        self.state.recycles.fetch_add(1, Ordering::SeqCst);
    }
}

/// Factory handing out `FaultPool`s keyed by endpoint. The same endpoint
/// always maps to the same `FaultState`, and tests may seed switches
/// before the pools exist.
#[derive(Default)]
pub struct FaultFactory {
    states: DashMap<String, Arc<FaultState>>,
    pub fail_create: AtomicBool,
    created: AtomicU64,
}

impl FaultFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get or create the switches for an endpoint.
    pub fn state(&self, endpoint: &str) -> Arc<FaultState> {
        self.states
            .entry(endpoint.to_string())
            .or_default()
            .clone()
    }

    pub fn created_pools(&self) -> u64 {
        self.created.load(Ordering::SeqCst)
    }

    /// True once every pool this factory handed out has been closed.
    pub fn all_closed(&self) -> bool {
        self.states.iter().all(|entry| entry.value().is_closed())
    }
}

impl PoolFactory for FaultFactory {
    fn create(
        &self,
        endpoint: &str,
        _charset: &str,
        _collation_id: CollationId,
    ) -> BackendResult<Arc<dyn ConnectionPool>> {
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(BackendError::Acquire {
                addr: endpoint.to_string(),
                reason: "injected pool construction failure".to_string(),
            });
        }
        self.created.fetch_add(1, Ordering::SeqCst);
        let state = self.state(endpoint);
        Ok(Arc::new(FaultPool::new(endpoint, state)))
    }
}
