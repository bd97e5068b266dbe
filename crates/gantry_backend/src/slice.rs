//! One backend cluster: master, slave, and statistic-slave pool groups.
//!
//! After assembly a slice is structurally frozen: the pool lists never
//! change, only the per-index status map does, and the only writer of a
//! group's statuses is its probe worker. Query-path readers treat status
//! as a hint and still tolerate connection failure at use time.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;

use gantry_common::charset::CollationId;
use gantry_common::config::SliceConfig;
use gantry_common::error::{ConfigError, ProxyError, ProxyResult};

use crate::pool::{ConnectionPool, PoolFactory};

/// Advisory health of one physical instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceStatus {
    Up,
    Down,
}

impl std::fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InstanceStatus::Up => write!(f, "UP"),
            InstanceStatus::Down => write!(f, "DOWN"),
        }
    }
}

/// Role of a pool group within a slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupRole {
    Master,
    Slave,
    StatisticSlave,
}

impl std::fmt::Display for GroupRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GroupRole::Master => write!(f, "master"),
            GroupRole::Slave => write!(f, "slave"),
            GroupRole::StatisticSlave => write!(f, "statistic-slave"),
        }
    }
}

/// Ordered pools for one role plus the status map the prober writes.
pub struct PoolGroup {
    role: GroupRole,
    pools: Vec<Arc<dyn ConnectionPool>>,
    status: DashMap<usize, InstanceStatus>,
}

impl PoolGroup {
    /// Build one pool per endpoint; every entry starts UP and unprobed.
    /// Blank endpoint entries are a config error at the slice level, so
    /// they are rejected here.
    fn assemble(
        role: GroupRole,
        slice_name: &str,
        endpoints: &[String],
        charset: &str,
        collation_id: CollationId,
        factory: &Arc<dyn PoolFactory>,
    ) -> ProxyResult<Self> {
        let mut pools: Vec<Arc<dyn ConnectionPool>> = Vec::with_capacity(endpoints.len());
        let status = DashMap::new();
        for endpoint in endpoints {
            let endpoint = endpoint.trim();
            if endpoint.is_empty() {
                close_pools(&pools);
                return Err(ConfigError::EmptyEndpoint {
                    slice: slice_name.to_string(),
                    role: role.to_string(),
                }
                .into());
            }
            match factory.create(endpoint, charset, collation_id) {
                Ok(pool) => {
                    status.insert(pools.len(), InstanceStatus::Up);
                    pools.push(pool);
                }
                Err(e) => {
                    close_pools(&pools);
                    return Err(e.into());
                }
            }
        }
        Ok(Self { role, pools, status })
    }

    pub fn role(&self) -> GroupRole {
        self.role
    }

    pub fn pools(&self) -> &[Arc<dyn ConnectionPool>] {
        &self.pools
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Atomic per-key read. `None` only for an out-of-range index.
    pub fn status_of(&self, idx: usize) -> Option<InstanceStatus> {
        self.status.get(&idx).map(|s| *s)
    }

    /// Atomic per-key write; called only by the group's probe worker.
    pub fn set_status(&self, idx: usize, status: InstanceStatus) {
        if idx < self.pools.len() {
            self.status.insert(idx, status);
        }
    }

    /// Statuses in pool order.
    pub fn statuses(&self) -> Vec<InstanceStatus> {
        (0..self.pools.len())
            .map(|idx| self.status_of(idx).unwrap_or(InstanceStatus::Down))
            .collect()
    }

    pub fn status_len(&self) -> usize {
        self.status.len()
    }

    fn close(&self) {
        close_pools(&self.pools);
    }
}

fn close_pools(pools: &[Arc<dyn ConnectionPool>]) {
    for pool in pools {
        if let Err(e) = pool.close() {
            tracing::warn!(addr = pool.addr(), error = %e, "pool close failed");
        }
    }
}

/// One named backend cluster.
pub struct Slice {
    name: String,
    charset: String,
    collation_id: CollationId,
    master: PoolGroup,
    slave: PoolGroup,
    statistic_slave: PoolGroup,
}

impl fmt::Debug for Slice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Slice").field("name", &self.name).finish_non_exhaustive()
    }
}

impl Slice {
    /// Assemble all three pool groups. Any pool-construction error aborts
    /// the slice; pools built so far are closed by the caller's cleanup.
    pub fn assemble(
        cfg: &SliceConfig,
        charset: &str,
        collation_id: CollationId,
        factory: &Arc<dyn PoolFactory>,
    ) -> ProxyResult<Self> {
        let name = cfg.name.trim().to_string();
        if cfg.master.trim().is_empty() {
            return Err(ProxyError::from(ConfigError::EmptyEndpoint {
                slice: name,
                role: GroupRole::Master.to_string(),
            }));
        }
        let master = PoolGroup::assemble(
            GroupRole::Master,
            &name,
            std::slice::from_ref(&cfg.master),
            charset,
            collation_id,
            factory,
        )?;
        let slave = match PoolGroup::assemble(
            GroupRole::Slave,
            &name,
            &cfg.slaves,
            charset,
            collation_id,
            factory,
        ) {
            Ok(group) => group,
            Err(e) => {
                master.close();
                return Err(e);
            }
        };
        let statistic_slave = match PoolGroup::assemble(
            GroupRole::StatisticSlave,
            &name,
            &cfg.statistic_slaves,
            charset,
            collation_id,
            factory,
        ) {
            Ok(group) => group,
            Err(e) => {
                master.close();
                slave.close();
                return Err(e);
            }
        };
        Ok(Self {
            name,
            charset: charset.to_string(),
            collation_id,
            master,
            slave,
            statistic_slave,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn charset(&self) -> &str {
        &self.charset
    }

    pub fn collation_id(&self) -> CollationId {
        self.collation_id
    }

    pub fn master(&self) -> &PoolGroup {
        &self.master
    }

    pub fn slave(&self) -> &PoolGroup {
        &self.slave
    }

    pub fn statistic_slave(&self) -> &PoolGroup {
        &self.statistic_slave
    }

    pub fn group(&self, role: GroupRole) -> &PoolGroup {
        match role {
            GroupRole::Master => &self.master,
            GroupRole::Slave => &self.slave,
            GroupRole::StatisticSlave => &self.statistic_slave,
        }
    }

    /// Close every pool group; per-pool errors are logged and do not stop
    /// the remaining groups from closing.
    pub fn close(&self) {
        self.master.close();
        self.slave.close();
        self.statistic_slave.close();
    }
}
