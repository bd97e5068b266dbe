//! Global sequence registry.
//!
//! One MySQL-backed sequence generator per `(db, table)`, each anchored to
//! a slice **by name** — the registry never holds slice pointers, which
//! keeps teardown cycle-free. Issuing the actual `SELECT ... FOR UPDATE`
//! round trip is the sequence collaborator's business, not ours.

use std::collections::HashMap;
use std::sync::Arc;

/// A sequence generator definition anchored to a slice.
#[derive(Debug, Clone)]
pub struct MysqlSequence {
    slice_name: String,
    seq_name: String,
    pk_name: String,
}

impl MysqlSequence {
    pub fn new(
        slice_name: impl Into<String>,
        seq_name: impl Into<String>,
        pk_name: impl Into<String>,
    ) -> Self {
        Self {
            slice_name: slice_name.into(),
            seq_name: seq_name.into(),
            pk_name: pk_name.into(),
        }
    }

    pub fn slice_name(&self) -> &str {
        &self.slice_name
    }

    pub fn seq_name(&self) -> &str {
        &self.seq_name
    }

    pub fn pk_name(&self) -> &str {
        &self.pk_name
    }
}

/// Registry key: `UPPER(db).UPPER(table)`.
pub fn sequence_key(db: &str, table: &str) -> String {
    format!("{}.{}", db.to_uppercase(), table.to_uppercase())
}

/// Installed at namespace construction, read-only afterwards.
#[derive(Default)]
pub struct SequenceRegistry {
    sequences: HashMap<String, Arc<MysqlSequence>>,
}

impl SequenceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_sequence(&mut self, db: &str, table: &str, seq: MysqlSequence) {
        self.sequences.insert(sequence_key(db, table), Arc::new(seq));
    }

    pub fn get_sequence(&self, db: &str, table: &str) -> Option<Arc<MysqlSequence>> {
        self.sequences.get(&sequence_key(db, table)).cloned()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }
}
