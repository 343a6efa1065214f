//! Top-level transactions as seen by query execution.

use super::error::Result;
use super::kernel::KernelTransaction;
use super::state::{AccessMode, TransactionType};

/// The operations query orchestration needs from an open transaction.
pub trait InternalTransaction: Send {
    fn transaction_type(&self) -> TransactionType;

    fn access_mode(&self) -> AccessMode;

    /// Marks the transaction to be committed on close.
    fn success(&mut self);

    /// Marks the transaction to be rolled back on close. Overrides `success`.
    fn failure(&mut self);

    /// Commits or rolls back according to the recorded outcome and releases
    /// the transaction.
    fn close(self: Box<Self>) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Undecided,
    Success,
    Failure,
}

/// A transaction handle that rolls back on drop unless it was closed.
#[derive(Debug)]
pub struct TopLevelTransaction {
    transaction: KernelTransaction,
    outcome: Outcome,
    closed: bool,
}

impl TopLevelTransaction {
    pub fn new(transaction: KernelTransaction) -> Self {
        Self {
            transaction,
            outcome: Outcome::Undecided,
            closed: false,
        }
    }

    pub fn kernel_transaction(&self) -> &KernelTransaction {
        &self.transaction
    }
}

impl InternalTransaction for TopLevelTransaction {
    fn transaction_type(&self) -> TransactionType {
        self.transaction.tx_type()
    }

    fn access_mode(&self) -> AccessMode {
        self.transaction.access_mode()
    }

    fn success(&mut self) {
        if self.outcome == Outcome::Undecided {
            self.outcome = Outcome::Success;
        }
    }

    fn failure(&mut self) {
        self.outcome = Outcome::Failure;
    }

    fn close(mut self: Box<Self>) -> Result<()> {
        self.closed = true;
        match self.outcome {
            Outcome::Success => self.transaction.commit(),
            Outcome::Undecided | Outcome::Failure => self.transaction.rollback(),
        }
    }
}

impl Drop for TopLevelTransaction {
    fn drop(&mut self) {
        if !self.closed {
            // Best effort rollback - ignore errors
            let _ = self.transaction.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::{TerminationReason, TransactionError, TransactionId, TransactionState};

    fn top_level(id: u64) -> (KernelTransaction, Box<TopLevelTransaction>) {
        let ktx =
            KernelTransaction::new(TransactionId::new(id), TransactionType::Explicit, AccessMode::Write);
        (ktx.clone(), Box::new(TopLevelTransaction::new(ktx)))
    }

    #[test]
    fn test_close_after_success_commits() {
        let (ktx, mut tx) = top_level(1);
        tx.success();
        tx.close().unwrap();

        assert_eq!(ktx.state(), TransactionState::Committed);
    }

    #[test]
    fn test_close_without_success_rolls_back() {
        let (ktx, tx) = top_level(2);
        tx.close().unwrap();

        assert_eq!(ktx.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_failure_overrides_success() {
        let (ktx, mut tx) = top_level(3);
        tx.success();
        tx.failure();
        tx.success();
        tx.close().unwrap();

        assert_eq!(ktx.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_drop_rolls_back() {
        let (ktx, tx) = top_level(4);
        drop(tx);

        assert_eq!(ktx.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_close_of_terminated_transaction_fails() {
        let (ktx, mut tx) = top_level(5);
        ktx.mark_for_termination(TerminationReason::Timeout);
        tx.success();

        assert_eq!(
            tx.close(),
            Err(TransactionError::Terminated(
                TransactionId::new(5),
                TerminationReason::Timeout
            ))
        );
        assert_eq!(ktx.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_type_and_mode_come_from_kernel_transaction() {
        let (_, tx) = top_level(6);

        assert_eq!(tx.transaction_type(), TransactionType::Explicit);
        assert_eq!(tx.access_mode(), AccessMode::Write);
        assert_eq!(tx.kernel_transaction().id(), TransactionId::new(6));
    }
}
