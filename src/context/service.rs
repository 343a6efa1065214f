//! The database-facing service that opens transactions for queries.

use std::sync::Arc;

use crate::bridge::TransactionBridge;
use crate::transaction::{
    AccessMode, InternalTransaction, Result, TopLevelTransaction, TransactionManager,
    TransactionType,
};

pub trait QueryService: Send + Sync {
    /// Begins a transaction and binds it to `bridge`.
    ///
    /// On error nothing new is bound.
    fn begin_transaction(
        &self,
        bridge: &mut dyn TransactionBridge,
        tx_type: TransactionType,
        access_mode: AccessMode,
    ) -> Result<Box<dyn InternalTransaction>>;
}

/// Opens transactions through a [`TransactionManager`].
pub struct KernelQueryService {
    manager: Arc<TransactionManager>,
}

impl KernelQueryService {
    pub fn new(manager: Arc<TransactionManager>) -> Self {
        Self { manager }
    }
}

impl QueryService for KernelQueryService {
    fn begin_transaction(
        &self,
        bridge: &mut dyn TransactionBridge,
        tx_type: TransactionType,
        access_mode: AccessMode,
    ) -> Result<Box<dyn InternalTransaction>> {
        let transaction = self.manager.begin(tx_type, access_mode)?;

        if let Err(err) = bridge.bind(transaction.clone()) {
            let _ = transaction.rollback();
            return Err(err.into());
        }

        Ok(Box::new(TopLevelTransaction::new(transaction)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::{BridgeError, ExecutionBinding};
    use crate::transaction::{TransactionError, TransactionId, TransactionState};

    #[test]
    fn test_begin_binds_new_transaction() {
        let manager = Arc::new(TransactionManager::new());
        let service = KernelQueryService::new(Arc::clone(&manager));
        let mut binding = ExecutionBinding::new();

        let transaction = service
            .begin_transaction(&mut binding, TransactionType::Implicit, AccessMode::Read)
            .unwrap();

        let bound = binding.bound_transaction().unwrap();
        assert!(manager.is_active(bound.id()));
        assert_eq!(transaction.access_mode(), AccessMode::Read);
    }

    #[test]
    fn test_begin_on_bound_worker_rolls_back() {
        let manager = Arc::new(TransactionManager::new());
        let service = KernelQueryService::new(Arc::clone(&manager));
        let mut binding = ExecutionBinding::new();

        let _first = service
            .begin_transaction(&mut binding, TransactionType::Implicit, AccessMode::Write)
            .unwrap();
        let first_id = binding.bound_transaction().unwrap().id();

        let err = service
            .begin_transaction(&mut binding, TransactionType::Implicit, AccessMode::Write)
            .err()
            .unwrap();

        assert!(matches!(
            err,
            TransactionError::Binding(BridgeError::AlreadyBound { bound, .. }) if bound == first_id
        ));
        assert_eq!(binding.bound_transaction().unwrap().id(), first_id);
        assert_eq!(manager.active_transactions(), vec![first_id]);
        assert_eq!(manager.transaction_count(), 2);
        assert_eq!(
            manager.get_state(TransactionId::new(2)).unwrap(),
            TransactionState::Aborted
        );
    }
}
