//! Transaction state management.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::error::{Result, TransactionError};
use super::id::TransactionId;

/// The possible states of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    /// The transaction is currently active and can perform operations.
    Active,
    /// The transaction has been successfully committed.
    Committed,
    /// The transaction has been aborted (rolled back).
    Aborted,
}

impl TransactionState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    /// Returns true if the transaction is finished (committed or aborted).
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Committed | Self::Aborted)
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "Active"),
            Self::Committed => write!(f, "Committed"),
            Self::Aborted => write!(f, "Aborted"),
        }
    }
}

/// How a transaction was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Opened by the engine on behalf of a single query.
    Implicit,
    /// Opened explicitly by the client.
    Explicit,
}

/// What a transaction is allowed to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AccessMode {
    Read,
    Write,
    Full,
}

/// Why a transaction was marked for termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TerminationReason {
    /// The transaction outlived its configured timeout.
    Timeout,
    /// An operator explicitly killed the transaction or one of its queries.
    Killed,
    /// A resource limit was breached.
    ResourceLimit,
}

impl std::fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout => write!(f, "timed out"),
            Self::Killed => write!(f, "killed"),
            Self::ResourceLimit => write!(f, "resource limit exceeded"),
        }
    }
}

/// Information about a transaction.
#[derive(Debug, Clone)]
pub struct TransactionInfo {
    pub id: TransactionId,
    pub tx_type: TransactionType,
    pub access_mode: AccessMode,
    pub state: TransactionState,
    /// Set once by an external actor; never cleared.
    pub termination: Option<TerminationReason>,
    pub start_time: Instant,
    pub end_time: Option<Instant>,
}

impl TransactionInfo {
    /// Creates a new transaction info for an active transaction.
    pub fn new(id: TransactionId, tx_type: TransactionType, access_mode: AccessMode) -> Self {
        Self {
            id,
            tx_type,
            access_mode,
            state: TransactionState::Active,
            termination: None,
            start_time: Instant::now(),
            end_time: None,
        }
    }

    /// Returns the duration for which the transaction has been running.
    pub fn duration(&self) -> Duration {
        match self.end_time {
            Some(end) => end.duration_since(self.start_time),
            None => self.start_time.elapsed(),
        }
    }

    fn finish(&mut self, state: TransactionState) {
        self.state = state;
        self.end_time = Some(Instant::now());
    }
}

/// A thread-safe wrapper for transaction information.
#[derive(Debug, Clone)]
pub struct SharedTransactionInfo {
    inner: Arc<Mutex<TransactionInfo>>,
}

impl SharedTransactionInfo {
    pub fn new(id: TransactionId, tx_type: TransactionType, access_mode: AccessMode) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TransactionInfo::new(id, tx_type, access_mode))),
        }
    }

    pub fn id(&self) -> TransactionId {
        self.inner.lock().id
    }

    pub fn state(&self) -> TransactionState {
        self.inner.lock().state
    }

    /// Gets a copy of the transaction info.
    pub fn info(&self) -> TransactionInfo {
        self.inner.lock().clone()
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        self.inner.lock().termination
    }

    /// Marks an active transaction for termination. The first reason wins.
    ///
    /// Returns true if this call set the flag.
    pub fn mark_for_termination(&self, reason: TerminationReason) -> bool {
        let mut info = self.inner.lock();
        if !info.state.is_active() || info.termination.is_some() {
            return false;
        }
        info.termination = Some(reason);
        true
    }

    /// Commits the transaction.
    ///
    /// A transaction marked for termination is rolled back instead and the
    /// termination is reported.
    pub fn commit(&self) -> Result<()> {
        let mut info = self.inner.lock();
        if !info.state.is_active() {
            return Err(TransactionError::InvalidState(info.id, info.state));
        }
        if let Some(reason) = info.termination {
            info.finish(TransactionState::Aborted);
            return Err(TransactionError::Terminated(info.id, reason));
        }
        info.finish(TransactionState::Committed);
        Ok(())
    }

    /// Aborts the transaction.
    pub fn abort(&self) -> Result<()> {
        let mut info = self.inner.lock();
        if !info.state.is_active() {
            return Err(TransactionError::InvalidState(info.id, info.state));
        }
        info.finish(TransactionState::Aborted);
        Ok(())
    }
}
