//! Transaction and query identifiers.

use serde::{Deserialize, Serialize};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};

/// A unique identifier for a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID with the given value.
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the inner u64 value.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for TransactionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Txn{}", self.0)
    }
}

/// Identity of one logical query. Stable across transaction rotations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct QueryId(pub u64);

impl QueryId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u64 {
        self.0
    }
}

impl From<u64> for QueryId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for QueryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query-{}", self.0)
    }
}

/// A thread-safe, monotonically increasing ID generator.
pub struct IdGenerator<T> {
    next_id: AtomicU64,
    _marker: PhantomData<fn() -> T>,
}

pub type TransactionIdGenerator = IdGenerator<TransactionId>;
pub type QueryIdGenerator = IdGenerator<QueryId>;

impl<T: From<u64>> IdGenerator<T> {
    /// Creates a new generator starting from 1.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            _marker: PhantomData,
        }
    }

    /// Generates the next unique ID.
    pub fn next(&self) -> T {
        T::from(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    /// Returns the most recently issued value without incrementing.
    pub fn current(&self) -> T {
        T::from(self.next_id.load(Ordering::SeqCst).saturating_sub(1))
    }
}

impl<T: From<u64>> Default for IdGenerator<T> {
    fn default() -> Self {
        Self::new()
    }
}
