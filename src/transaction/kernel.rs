//! Kernel transaction handles and statements.

use std::sync::Arc;
use std::time::Duration;

use super::error::Result;
use super::id::TransactionId;
use super::state::{AccessMode, SharedTransactionInfo, TerminationReason, TransactionState, TransactionType};
use crate::query::{QueryRegistry, QueryRegistryOperations};

/// A cheap, clonable handle to one storage transaction.
///
/// Clones refer to the same transaction; equality is by transaction id.
#[derive(Debug, Clone)]
pub struct KernelTransaction {
    info: SharedTransactionInfo,
    registry: Arc<QueryRegistry>,
}

impl KernelTransaction {
    pub fn new(id: TransactionId, tx_type: TransactionType, access_mode: AccessMode) -> Self {
        Self {
            info: SharedTransactionInfo::new(id, tx_type, access_mode),
            registry: Arc::new(QueryRegistry::new()),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.info.id()
    }

    pub fn tx_type(&self) -> TransactionType {
        self.info.info().tx_type
    }

    pub fn access_mode(&self) -> AccessMode {
        self.info.info().access_mode
    }

    pub fn state(&self) -> TransactionState {
        self.info.state()
    }

    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    pub fn elapsed(&self) -> Duration {
        self.info.info().duration()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.info.termination_reason()
    }

    /// Flags the transaction for termination. Running queries observe the
    /// flag at their next guard check.
    pub fn mark_for_termination(&self, reason: TerminationReason) -> bool {
        let marked = self.info.mark_for_termination(reason);
        if marked {
            log::debug!("{} marked for termination: {}", self.id(), reason);
        }
        marked
    }

    /// The live-query registry owned by this transaction.
    pub fn registry(&self) -> Arc<QueryRegistry> {
        Arc::clone(&self.registry)
    }

    pub fn acquire_statement(&self) -> Statement {
        Statement::new(self.clone())
    }

    pub fn commit(&self) -> Result<()> {
        self.info.commit()?;
        log::debug!("{} committed", self.id());
        Ok(())
    }

    pub fn rollback(&self) -> Result<()> {
        self.info.abort()?;
        log::debug!("{} rolled back", self.id());
        Ok(())
    }
}

impl PartialEq for KernelTransaction {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for KernelTransaction {}

/// A transaction-scoped handle through which queries reach the kernel.
#[derive(Clone)]
pub struct Statement {
    transaction: KernelTransaction,
    registry: Arc<dyn QueryRegistryOperations>,
}

impl Statement {
    /// Creates a statement backed by the transaction's own query registry.
    pub fn new(transaction: KernelTransaction) -> Self {
        let registry: Arc<dyn QueryRegistryOperations> = transaction.registry();
        Self {
            transaction,
            registry,
        }
    }

    /// Creates a statement whose query registration goes to `registry`.
    pub fn with_registry(
        transaction: KernelTransaction,
        registry: Arc<dyn QueryRegistryOperations>,
    ) -> Self {
        Self {
            transaction,
            registry,
        }
    }

    pub fn transaction(&self) -> &KernelTransaction {
        &self.transaction
    }

    pub fn query_registration(&self) -> Arc<dyn QueryRegistryOperations> {
        Arc::clone(&self.registry)
    }
}

impl std::fmt::Debug for Statement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Statement")
            .field("transaction", &self.transaction.id())
            .finish()
    }
}
