//! Cooperative termination checks.

use thiserror::Error;

use crate::transaction::{Statement, TerminationReason, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GuardError {
    #[error("Transaction {0} has been terminated: {1}")]
    TransactionTerminated(TransactionId, TerminationReason),
}

/// A cancellation point consulted by long-running queries.
pub trait Guard: Send + Sync {
    fn check(&self, statement: &Statement) -> Result<(), GuardError>;
}

/// Fails once the statement's transaction has been marked for termination.
///
/// Reads the flag only; whoever enforces timeouts or kills sets it.
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminationGuard;

impl TerminationGuard {
    pub fn new() -> Self {
        Self
    }
}

impl Guard for TerminationGuard {
    fn check(&self, statement: &Statement) -> Result<(), GuardError> {
        let transaction = statement.transaction();
        match transaction.termination_reason() {
            Some(reason) => Err(GuardError::TransactionTerminated(transaction.id(), reason)),
            None => Ok(()),
        }
    }
}
