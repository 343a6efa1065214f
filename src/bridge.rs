//! Binding of transactions to the worker executing on their behalf.
//!
//! A worker owns one [`ExecutionBinding`] and passes it to whatever begins,
//! rotates or closes transactions for it. At most one transaction is bound at
//! a time.

use thiserror::Error;

use crate::transaction::{KernelTransaction, Statement, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    #[error("Cannot bind {requested}: {bound} is already bound to this worker")]
    AlreadyBound {
        bound: TransactionId,
        requested: TransactionId,
    },

    #[error("No transaction is bound to this worker")]
    NotBound,
}

/// Binding operations used by query orchestration.
pub trait TransactionBridge {
    /// The transaction currently bound, if any.
    fn bound_transaction(&self) -> Option<KernelTransaction>;

    /// Binds `transaction`. Fails if a different transaction is still bound.
    fn bind(&mut self, transaction: KernelTransaction) -> Result<(), BridgeError>;

    /// Clears the binding and returns the previously bound transaction.
    fn unbind(&mut self) -> Option<KernelTransaction>;

    /// The statement of the currently bound transaction.
    fn statement(&self) -> Result<Statement, BridgeError>;
}

/// Per-worker binding slot.
#[derive(Debug, Default)]
pub struct ExecutionBinding {
    bound: Option<Statement>,
}

impl ExecutionBinding {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }
}

impl TransactionBridge for ExecutionBinding {
    fn bound_transaction(&self) -> Option<KernelTransaction> {
        self.bound
            .as_ref()
            .map(|statement| statement.transaction().clone())
    }

    fn bind(&mut self, transaction: KernelTransaction) -> Result<(), BridgeError> {
        if let Some(current) = &self.bound {
            let bound = current.transaction().id();
            if bound == transaction.id() {
                return Ok(());
            }
            return Err(BridgeError::AlreadyBound {
                bound,
                requested: transaction.id(),
            });
        }

        log::trace!("binding {}", transaction.id());
        self.bound = Some(transaction.acquire_statement());
        Ok(())
    }

    fn unbind(&mut self) -> Option<KernelTransaction> {
        let previous = self.bound.take().map(|statement| statement.transaction().clone());
        if let Some(transaction) = &previous {
            log::trace!("unbinding {}", transaction.id());
        }
        previous
    }

    fn statement(&self) -> Result<Statement, BridgeError> {
        self.bound.clone().ok_or(BridgeError::NotBound)
    }
}
