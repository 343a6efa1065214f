//! Live-query registry owned by each transaction.

use dashmap::DashMap;
use std::sync::Arc;

use super::executing::ExecutingQuery;
use crate::transaction::QueryId;

/// Registration of running queries with a transaction.
pub trait QueryRegistryOperations: Send + Sync {
    fn register(&self, query: Arc<ExecutingQuery>);

    fn unregister(&self, query: &ExecutingQuery);
}

/// The set of queries currently executing under one transaction.
///
/// Mutated by the thread running the queries and read concurrently by
/// monitoring.
#[derive(Debug, Default)]
pub struct QueryRegistry {
    queries: DashMap<QueryId, Arc<ExecutingQuery>>,
}

impl QueryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: QueryId) -> bool {
        self.queries.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.queries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queries.is_empty()
    }

    /// Registered queries ordered by id.
    pub fn executing_queries(&self) -> Vec<Arc<ExecutingQuery>> {
        let mut queries: Vec<_> = self
            .queries
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        queries.sort_by_key(|query| query.id());
        queries
    }
}

impl QueryRegistryOperations for QueryRegistry {
    fn register(&self, query: Arc<ExecutingQuery>) {
        log::trace!("registering {}", query.id());
        self.queries.insert(query.id(), query);
    }

    fn unregister(&self, query: &ExecutingQuery) {
        log::trace!("unregistering {}", query.id());
        self.queries.remove(&query.id());
    }
}
