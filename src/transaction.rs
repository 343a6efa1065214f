//! Transaction module.
//!
//! This module provides the storage-side half of query execution:
//! - Transaction and query identifiers
//! - Transaction state, type, access mode and termination marking
//! - Kernel transaction handles and their statements
//! - Top-level transactions with success/close semantics
//! - The in-memory transaction manager

pub mod error;
pub mod id;
pub mod kernel;
pub mod manager;
pub mod state;
pub mod top_level;

// Re-export commonly used types
pub use error::{Result, TransactionError};
pub use id::{IdGenerator, QueryId, QueryIdGenerator, TransactionId, TransactionIdGenerator};
pub use kernel::{KernelTransaction, Statement};
pub use manager::TransactionManager;
pub use state::{
    AccessMode, SharedTransactionInfo, TerminationReason, TransactionInfo, TransactionState,
    TransactionType,
};
pub use top_level::{InternalTransaction, TopLevelTransaction};
