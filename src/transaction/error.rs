//! Transaction error types.

use thiserror::Error;

use super::id::TransactionId;
use super::state::{TerminationReason, TransactionState};
use crate::bridge::BridgeError;

/// Errors raised by the transaction layer.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransactionError {
    #[error("Transaction {0} not found")]
    NotFound(TransactionId),

    #[error("Transaction {0} is in invalid state: {1}")]
    InvalidState(TransactionId, TransactionState),

    #[error("Transaction {0} was terminated: {1}")]
    Terminated(TransactionId, TerminationReason),

    #[error("Too many active transactions: {active} of {limit} in use")]
    ResourceLimit { active: usize, limit: usize },

    #[error(transparent)]
    Binding(#[from] BridgeError),
}

/// Result type for transaction operations.
pub type Result<T> = std::result::Result<T, TransactionError>;
