//! Connection-pool collaborator surface.
//!
//! Probers draw their connections from the same pools that serve queries;
//! a dedicated probe pool would hide pool-exhaustion failures. The traits
//! here are the seam a real MySQL pool implementation plugs into, and
//! `QueryResult` is the typed row access the health supervisor needs from
//! `SHOW SLAVE STATUS`.

use std::sync::Arc;

use gantry_common::charset::CollationId;
use gantry_common::error::BackendError;
use gantry_common::stop::StopSignal;

pub type BackendResult<T> = Result<T, BackendError>;

/// A connection checked out of a pool.
///
/// `recycle` consumes the connection and returns it to its pool; dropping
/// without recycling is allowed (the pool reclaims on drop) but recycling
/// is the fast path.
pub trait PooledConnect: Send {
    fn ping(&mut self) -> BackendResult<()>;
    fn reconnect(&mut self) -> BackendResult<()>;
    fn execute(&mut self, sql: &str) -> BackendResult<QueryResult>;
    fn addr(&self) -> &str;
    fn recycle(self: Box<Self>);
}

/// One pool per physical instance.
pub trait ConnectionPool: Send + Sync {
    /// Check out a connection. May block on pool capacity; implementations
    /// should observe `stop` and bail out promptly on cancellation.
    fn acquire(&self, stop: &StopSignal) -> BackendResult<Box<dyn PooledConnect>>;

    /// `host:port` of the backing instance.
    fn addr(&self) -> &str;

    /// Release all idle connections and refuse further checkouts.
    fn close(&self) -> BackendResult<()>;
}

/// Creates pools during slice assembly. The namespace owns an
/// `Arc<dyn PoolFactory>` so tests and embedders can swap the backend.
pub trait PoolFactory: Send + Sync {
    fn create(
        &self,
        endpoint: &str,
        charset: &str,
        collation_id: CollationId,
    ) -> BackendResult<Arc<dyn ConnectionPool>>;
}

/// A single result-set cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    UInt(u64),
    Int(i64),
    Text(String),
}

/// Column-name-indexed result set with typed retrieval.
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl QueryResult {
    pub fn new(columns: Vec<String>) -> Self {
        Self {
            columns,
            rows: Vec::new(),
        }
    }

    /// Rows shorter than the column list read as `Null` in the tail.
    pub fn push_row(&mut self, row: Vec<Value>) {
        self.rows.push(row);
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Column lookup is case-insensitive, as MySQL metadata is.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.eq_ignore_ascii_case(name))
    }

    fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let idx = self.column_index(column)?;
        self.rows.get(row)?.get(idx)
    }

    /// Typed `u64` retrieval; signed values convert when non-negative, text
    /// parses when it is a decimal integer.
    pub fn get_u64(&self, row: usize, column: &str) -> Option<u64> {
        match self.cell(row, column)? {
            Value::UInt(v) => Some(*v),
            Value::Int(v) => u64::try_from(*v).ok(),
            Value::Text(s) => s.parse().ok(),
            Value::Null => None,
        }
    }

    /// String retrieval; numeric cells render as decimal text.
    pub fn get_string(&self, row: usize, column: &str) -> Option<String> {
        match self.cell(row, column)? {
            Value::Text(s) => Some(s.clone()),
            Value::UInt(v) => Some(v.to_string()),
            Value::Int(v) => Some(v.to_string()),
            Value::Null => None,
        }
    }
}
