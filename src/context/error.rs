//! Errors surfaced by a transactional context.

use thiserror::Error;

use crate::guard::GuardError;
use crate::transaction::{TransactionError, TransactionId};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ContextError {
    /// The bound transaction was marked for termination.
    #[error(transparent)]
    TransactionTerminated(#[from] GuardError),

    /// No replacement transaction could be started. The previously bound
    /// transaction, if any, is still bound.
    #[error("Failed to begin transaction: {source}")]
    TransactionBeginFailed {
        bound: Option<TransactionId>,
        #[source]
        source: TransactionError,
    },

    /// Rotation completed and `new` is bound, but `old` did not commit.
    #[error("Transaction {old} failed to commit, query continues in {new}: {source}")]
    TransactionCommitFailed {
        old: TransactionId,
        new: TransactionId,
        #[source]
        source: TransactionError,
    },

    #[error("Failed to close transaction {transaction}: {source}")]
    CloseFailed {
        transaction: TransactionId,
        #[source]
        source: TransactionError,
    },

    /// The worker binding was not in the state the orchestrator left it in.
    #[error("Binding invariant violated: {0}")]
    BindingInvariantViolation(String),
}

impl ContextError {
    /// True when the rotation itself did not happen, as opposed to a
    /// completed rotation whose old transaction failed to commit.
    pub fn is_rotation_failure(&self) -> bool {
        matches!(
            self,
            Self::TransactionBeginFailed { .. } | Self::BindingInvariantViolation(_)
        )
    }

    /// The transaction bound to the worker after this error, when known.
    pub fn live_transaction(&self) -> Option<TransactionId> {
        match self {
            Self::TransactionBeginFailed { bound, .. } => *bound,
            Self::TransactionCommitFailed { new, .. } => Some(*new),
            Self::TransactionTerminated(GuardError::TransactionTerminated(id, _)) => Some(*id),
            Self::CloseFailed { .. } | Self::BindingInvariantViolation(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ContextError>;
