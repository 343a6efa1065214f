//! Transaction manager for coordinating transaction lifecycle.

use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashSet};

use super::error::{Result, TransactionError};
use super::id::{QueryId, TransactionId, TransactionIdGenerator};
use super::kernel::KernelTransaction;
use super::state::{AccessMode, TerminationReason, TransactionState, TransactionType};
use crate::config::KernelConfig;
use crate::query::QuerySnapshot;

/// The transaction manager handles the lifecycle of all transactions and
/// exposes the live-query view used by monitoring.
pub struct TransactionManager {
    /// Generator for unique transaction IDs.
    id_generator: TransactionIdGenerator,
    /// Active and recently finished transactions.
    transactions: DashMap<TransactionId, KernelTransaction>,
    /// Serializes admission so the limit check, id allocation and insert
    /// happen as one step.
    admission: Mutex<()>,
    config: KernelConfig,
}

impl TransactionManager {
    pub fn new() -> Self {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(config: KernelConfig) -> Self {
        Self {
            id_generator: TransactionIdGenerator::new(),
            transactions: DashMap::new(),
            admission: Mutex::new(()),
            config,
        }
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    /// Begins a new transaction.
    ///
    /// Transactions enter the manager in id order.
    pub fn begin(&self, tx_type: TransactionType, access_mode: AccessMode) -> Result<KernelTransaction> {
        let _admission = self.admission.lock();
        if let Some(limit) = self.config.max_concurrent_transactions {
            let active = self.active_count();
            if active >= limit {
                log::warn!("refusing to begin transaction: {} of {} active", active, limit);
                return Err(TransactionError::ResourceLimit { active, limit });
            }
        }

        let id = self.id_generator.next();
        let transaction = KernelTransaction::new(id, tx_type, access_mode);
        self.transactions.insert(id, transaction.clone());
        log::debug!("began {} ({:?}, {:?})", id, tx_type, access_mode);

        Ok(transaction)
    }

    pub fn get(&self, id: TransactionId) -> Result<KernelTransaction> {
        self.transactions
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(TransactionError::NotFound(id))
    }

    pub fn get_state(&self, id: TransactionId) -> Result<TransactionState> {
        Ok(self.get(id)?.state())
    }

    /// Checks if a transaction exists and is active.
    pub fn is_active(&self, id: TransactionId) -> bool {
        self.get_state(id)
            .map(|state| state.is_active())
            .unwrap_or(false)
    }

    /// Marks a transaction for termination. Returns false if it was already
    /// marked or is no longer active.
    pub fn mark_for_termination(&self, id: TransactionId, reason: TerminationReason) -> Result<bool> {
        Ok(self.get(id)?.mark_for_termination(reason))
    }

    /// Marks every active transaction older than the configured timeout.
    ///
    /// Returns the number of transactions newly marked.
    pub fn terminate_expired(&self) -> usize {
        let Some(timeout) = self.config.transaction_timeout else {
            return 0;
        };

        self.transactions
            .iter()
            .filter(|entry| entry.is_active() && entry.elapsed() > timeout)
            .filter(|entry| entry.mark_for_termination(TerminationReason::Timeout))
            .count()
    }

    /// Returns the IDs of all active transactions in ascending order.
    pub fn active_transactions(&self) -> Vec<TransactionId> {
        let mut ids: Vec<_> = self
            .transactions
            .iter()
            .filter(|entry| entry.is_active())
            .map(|entry| *entry.key())
            .collect();
        ids.sort();
        ids
    }

    pub fn active_count(&self) -> usize {
        self.transactions
            .iter()
            .filter(|entry| entry.is_active())
            .count()
    }

    /// Returns the total number of transactions (active and finished).
    pub fn transaction_count(&self) -> usize {
        self.transactions.len()
    }

    /// Removes finished transactions from the manager.
    pub fn cleanup_finished(&self) -> usize {
        let initial_count = self.transactions.len();
        self.transactions.retain(|_, transaction| transaction.is_active());
        initial_count - self.transactions.len()
    }

    /// Lists every query registered with an active transaction, ordered by
    /// transaction then query.
    ///
    /// A query moving between transactions is registered with the new one
    /// before it leaves the old one, so after reading a batch of registries
    /// the scan is repeated for transactions it has not read yet. A query
    /// found in more than one transaction is listed once, under the newest.
    pub fn list_queries(&self) -> Vec<QuerySnapshot> {
        let mut read = HashSet::new();
        let mut listed: BTreeMap<QueryId, QuerySnapshot> = BTreeMap::new();

        loop {
            let batch = self.unread_active(&read);
            if batch.is_empty() {
                break;
            }
            for transaction in batch {
                read.insert(transaction.id());
                for query in transaction.registry().executing_queries() {
                    let snapshot = query.snapshot(transaction.id());
                    match listed.get(&snapshot.query_id) {
                        Some(existing) if existing.transaction_id > snapshot.transaction_id => {}
                        _ => {
                            listed.insert(snapshot.query_id, snapshot);
                        }
                    }
                }
            }
        }

        let mut snapshots: Vec<_> = listed.into_values().collect();
        snapshots.sort_by_key(|snapshot| (snapshot.transaction_id, snapshot.query_id));
        snapshots
    }

    /// Marks every transaction running `query_id` for termination.
    ///
    /// While a query is being moved to a new transaction it can be listed by
    /// both, so all of them are marked, and the scan repeats until no new
    /// holder shows up. Returns true if any transaction was newly marked.
    pub fn kill_query(&self, query_id: QueryId, reason: TerminationReason) -> bool {
        let mut visited = HashSet::new();
        let mut killed = false;

        loop {
            let holders: Vec<_> = self
                .unread_active(&visited)
                .into_iter()
                .filter(|transaction| transaction.registry().contains(query_id))
                .collect();
            if holders.is_empty() {
                break;
            }
            for transaction in holders {
                visited.insert(transaction.id());
                if transaction.mark_for_termination(reason) {
                    log::info!("killing {} running in {}", query_id, transaction.id());
                    killed = true;
                }
            }
        }

        killed
    }

    /// Active transactions not in `skip`, in ascending id order.
    fn unread_active(&self, skip: &HashSet<TransactionId>) -> Vec<KernelTransaction> {
        let mut transactions: Vec<_> = self
            .transactions
            .iter()
            .filter(|entry| entry.is_active() && !skip.contains(entry.key()))
            .map(|entry| entry.value().clone())
            .collect();
        transactions.sort_by_key(|transaction| transaction.id());
        transactions
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new()
    }
}
