//! Transactional execution context for a single logical query.
//!
//! A [`TransactionalContext`] keeps one query running across any number of
//! storage transactions. Between batches the caller may ask it to commit
//! the current transaction and continue in a fresh one; while doing so the
//! query stays listed in some live transaction's registry and the worker
//! ends up bound to exactly one transaction.

pub mod error;
pub mod factory;
pub mod phase;
pub mod service;

pub use error::{ContextError, Result};
pub use factory::TransactionalContextFactory;
pub use phase::BindingPhase;
pub use service::{KernelQueryService, QueryService};

use std::sync::Arc;

use crate::bridge::TransactionBridge;
use crate::guard::Guard;
use crate::query::{ExecutingQuery, QueryRegistryOperations};
use crate::transaction::{
    AccessMode, InternalTransaction, KernelTransaction, Statement, TerminationReason,
    TransactionError, TransactionType,
};

pub struct TransactionalContext<'a> {
    service: Arc<dyn QueryService>,
    guard: Arc<dyn Guard>,
    bridge: &'a mut dyn TransactionBridge,
    transaction: Box<dyn InternalTransaction>,
    tx_type: TransactionType,
    access_mode: AccessMode,
    statement: Statement,
    registry: Arc<dyn QueryRegistryOperations>,
    query: Arc<ExecutingQuery>,
    phase: BindingPhase,
    rotations: u64,
}

impl<'a> TransactionalContext<'a> {
    /// Wraps a transaction that is already bound to `bridge` and whose
    /// statement registry already lists `query`.
    pub fn new(
        service: Arc<dyn QueryService>,
        guard: Arc<dyn Guard>,
        bridge: &'a mut dyn TransactionBridge,
        transaction: Box<dyn InternalTransaction>,
        statement: Statement,
        query: Arc<ExecutingQuery>,
    ) -> Self {
        let registry = statement.query_registration();
        Self {
            service,
            guard,
            bridge,
            tx_type: transaction.transaction_type(),
            access_mode: transaction.access_mode(),
            transaction,
            statement,
            registry,
            query,
            phase: BindingPhase::Bound,
            rotations: 0,
        }
    }

    /// Cooperative cancellation point.
    pub fn check(&self) -> Result<()> {
        self.ensure_bound()?;
        self.guard.check(&self.statement)?;
        Ok(())
    }

    /// Commits the current transaction and continues the query in a new one
    /// of the same type and access mode.
    ///
    /// The query is registered with the new transaction before it is
    /// unregistered from the old one. If the new transaction cannot be
    /// started the old one stays bound and nothing is committed. If the old
    /// transaction fails to commit the new one is still bound and the error
    /// is [`ContextError::TransactionCommitFailed`]; if the old one had been
    /// killed the new one is marked killed too.
    pub fn commit_and_restart_tx(&mut self) -> Result<()> {
        self.ensure_bound()?;

        let old_kernel = match self.bridge.bound_transaction() {
            Some(transaction) => transaction,
            None => return Err(self.violation("no transaction bound at start of rotation")),
        };
        self.bridge.unbind();
        self.advance(BindingPhase::Detached)?;

        let new_transaction =
            match self
                .service
                .begin_transaction(&mut *self.bridge, self.tx_type, self.access_mode)
            {
                Ok(transaction) => transaction,
                Err(source) => {
                    log::warn!(
                        "{}: could not begin replacement for {}: {}",
                        self.query.id(),
                        old_kernel.id(),
                        source
                    );
                    if let Err(err) = self.bridge.bind(old_kernel.clone()) {
                        return Err(self.violation(format!("cannot rebind {}: {}", old_kernel.id(), err)));
                    }
                    self.advance(BindingPhase::Bound)?;
                    return Err(ContextError::TransactionBeginFailed {
                        bound: Some(old_kernel.id()),
                        source,
                    });
                }
            };
        self.advance(BindingPhase::BoundNew)?;

        let new_statement = match self.bridge.statement() {
            Ok(statement) => statement,
            Err(err) => return Err(self.violation(format!("replacement has no statement: {}", err))),
        };
        let new_registry = new_statement.query_registration();
        new_registry.register(Arc::clone(&self.query));

        let new_kernel = match self.bridge.bound_transaction() {
            Some(transaction) if transaction != old_kernel => transaction,
            _ => return Err(self.violation("replacement transaction not bound after begin")),
        };
        self.bridge.unbind();
        self.advance(BindingPhase::DetachedNew)?;

        if let Err(err) = self.bridge.bind(old_kernel.clone()) {
            return Err(self.violation(format!("cannot rebind {}: {}", old_kernel.id(), err)));
        }
        self.advance(BindingPhase::CleaningUp)?;
        self.registry.unregister(&self.query);

        let mut old_transaction = std::mem::replace(&mut self.transaction, new_transaction);
        self.statement = new_statement;
        self.registry = new_registry;
        old_transaction.success();
        let committed = old_transaction.close();

        self.bridge.unbind();
        self.advance(BindingPhase::Released)?;
        if let Err(err) = self.bridge.bind(new_kernel.clone()) {
            return Err(self.violation(format!("cannot bind {}: {}", new_kernel.id(), err)));
        }
        self.advance(BindingPhase::Bound)?;
        self.rotations += 1;

        // A kill aimed at the old transaction belongs to the query
        if let Err(TransactionError::Terminated(_, TerminationReason::Killed)) = &committed {
            self.statement
                .transaction()
                .mark_for_termination(TerminationReason::Killed);
        }

        match committed {
            Ok(()) => {
                log::debug!(
                    "{}: rotated {} -> {}",
                    self.query.id(),
                    old_kernel.id(),
                    new_kernel.id()
                );
                Ok(())
            }
            Err(source) => {
                log::warn!(
                    "{}: {} failed to commit, continuing in {}: {}",
                    self.query.id(),
                    old_kernel.id(),
                    new_kernel.id(),
                    source
                );
                Err(ContextError::TransactionCommitFailed {
                    old: old_kernel.id(),
                    new: new_kernel.id(),
                    source,
                })
            }
        }
    }

    /// Ends the query: unregisters it, commits (`success`) or rolls back the
    /// current transaction and unbinds it.
    pub fn close(mut self, success: bool) -> Result<()> {
        self.ensure_bound()?;

        self.registry.unregister(&self.query);
        if success {
            self.transaction.success();
        } else {
            self.transaction.failure();
        }
        let id = self.statement.transaction().id();
        let closed = self.transaction.close();
        self.bridge.unbind();

        closed.map_err(|source| ContextError::CloseFailed {
            transaction: id,
            source,
        })
    }

    pub fn statement(&self) -> &Statement {
        &self.statement
    }

    /// The kernel transaction the current statement belongs to.
    pub fn kernel_transaction(&self) -> &KernelTransaction {
        self.statement.transaction()
    }

    /// What the worker binding currently resolves to.
    pub fn bound_transaction(&self) -> Option<KernelTransaction> {
        self.bridge.bound_transaction()
    }

    pub fn executing_query(&self) -> &Arc<ExecutingQuery> {
        &self.query
    }

    pub fn transaction_type(&self) -> TransactionType {
        self.tx_type
    }

    pub fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    /// Number of completed rotations, including those whose old transaction
    /// failed to commit.
    pub fn rotations(&self) -> u64 {
        self.rotations
    }

    pub fn is_open(&self) -> bool {
        self.phase == BindingPhase::Bound
    }

    fn ensure_bound(&self) -> Result<()> {
        match self.phase {
            BindingPhase::Bound => Ok(()),
            phase => Err(ContextError::BindingInvariantViolation(format!(
                "context for {} is {}",
                self.query.id(),
                phase
            ))),
        }
    }

    fn advance(&mut self, next: BindingPhase) -> Result<()> {
        if !self.phase.can_advance_to(next) {
            return Err(self.violation(format!("illegal transition {} -> {}", self.phase, next)));
        }
        log::trace!("{}: {} -> {}", self.query.id(), self.phase, next);
        self.phase = next;
        Ok(())
    }

    fn violation(&mut self, detail: impl Into<String>) -> ContextError {
        let detail = detail.into();
        log::error!("{}: binding invariant violated: {}", self.query.id(), detail);
        self.phase = BindingPhase::Poisoned;
        ContextError::BindingInvariantViolation(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::BridgeError;
    use crate::guard::{GuardError, TerminationGuard};
    use crate::transaction::{QueryId, TerminationReason, TransactionError, TransactionId};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        BoundTransaction,
        Unbind,
        Bind(TransactionId),
        Statement,
        Register(&'static str, QueryId),
        Unregister(&'static str, QueryId),
        Success(&'static str),
        Failure(&'static str),
        Close(&'static str),
        Check,
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;
    type Membership = Arc<Mutex<Vec<(&'static str, QueryId)>>>;

    struct RecordingBridge {
        log: CallLog,
        bound: Mutex<VecDeque<KernelTransaction>>,
        statement: Option<Statement>,
    }

    impl TransactionBridge for RecordingBridge {
        fn bound_transaction(&self) -> Option<KernelTransaction> {
            self.log.lock().push(Call::BoundTransaction);
            self.bound.lock().pop_front()
        }

        fn bind(&mut self, transaction: KernelTransaction) -> std::result::Result<(), BridgeError> {
            self.log.lock().push(Call::Bind(transaction.id()));
            Ok(())
        }

        fn unbind(&mut self) -> Option<KernelTransaction> {
            self.log.lock().push(Call::Unbind);
            None
        }

        fn statement(&self) -> std::result::Result<Statement, BridgeError> {
            self.log.lock().push(Call::Statement);
            self.statement.clone().ok_or(BridgeError::NotBound)
        }
    }

    /// Registry that fails the test if a query drops out of every registry
    /// while `audit` is set.
    struct RecordingRegistry {
        name: &'static str,
        log: CallLog,
        membership: Membership,
        audit: Arc<AtomicBool>,
    }

    impl QueryRegistryOperations for RecordingRegistry {
        fn register(&self, query: Arc<ExecutingQuery>) {
            self.log.lock().push(Call::Register(self.name, query.id()));
            self.membership.lock().push((self.name, query.id()));
        }

        fn unregister(&self, query: &ExecutingQuery) {
            self.log.lock().push(Call::Unregister(self.name, query.id()));
            let mut membership = self.membership.lock();
            membership.retain(|entry| *entry != (self.name, query.id()));
            assert!(
                !self.audit.load(Ordering::SeqCst)
                    || membership.iter().any(|(_, id)| *id == query.id()),
                "{} is no longer registered anywhere",
                query.id()
            );
        }
    }

    struct RecordingTransaction {
        name: &'static str,
        log: CallLog,
        close_error: Option<TransactionError>,
    }

    impl InternalTransaction for RecordingTransaction {
        fn transaction_type(&self) -> TransactionType {
            TransactionType::Implicit
        }

        fn access_mode(&self) -> AccessMode {
            AccessMode::Write
        }

        fn success(&mut self) {
            self.log.lock().push(Call::Success(self.name));
        }

        fn failure(&mut self) {
            self.log.lock().push(Call::Failure(self.name));
        }

        fn close(self: Box<Self>) -> crate::transaction::Result<()> {
            self.log.lock().push(Call::Close(self.name));
            match self.close_error {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }
    }

    struct ScriptedService {
        begins: AtomicUsize,
        next: Mutex<Option<crate::transaction::Result<Box<dyn InternalTransaction>>>>,
    }

    impl QueryService for ScriptedService {
        fn begin_transaction(
            &self,
            _bridge: &mut dyn TransactionBridge,
            tx_type: TransactionType,
            access_mode: AccessMode,
        ) -> crate::transaction::Result<Box<dyn InternalTransaction>> {
            assert_eq!(tx_type, TransactionType::Implicit);
            assert_eq!(access_mode, AccessMode::Write);
            self.begins.fetch_add(1, Ordering::SeqCst);
            self.next.lock().take().expect("unexpected begin_transaction")
        }
    }

    struct CountingGuard {
        log: CallLog,
        inner: TerminationGuard,
    }

    impl Guard for CountingGuard {
        fn check(&self, statement: &Statement) -> std::result::Result<(), GuardError> {
            self.log.lock().push(Call::Check);
            self.inner.check(statement)
        }
    }

    struct Fixture {
        log: CallLog,
        membership: Membership,
        audit: Arc<AtomicBool>,
        initial: KernelTransaction,
        second: KernelTransaction,
        bridge: RecordingBridge,
        service: Arc<ScriptedService>,
        guard: Arc<CountingGuard>,
        transaction: Option<Box<dyn InternalTransaction>>,
        statement: Statement,
        query: Arc<ExecutingQuery>,
    }

    fn fixture(begin_error: Option<TransactionError>, commit_error: Option<TransactionError>) -> Fixture {
        let log: CallLog = Arc::default();
        let membership: Membership = Arc::default();
        let audit = Arc::new(AtomicBool::new(true));
        let registry = |name| {
            Arc::new(RecordingRegistry {
                name,
                log: Arc::clone(&log),
                membership: Arc::clone(&membership),
                audit: Arc::clone(&audit),
            })
        };

        let initial =
            KernelTransaction::new(TransactionId::new(1), TransactionType::Implicit, AccessMode::Write);
        let second =
            KernelTransaction::new(TransactionId::new(2), TransactionType::Implicit, AccessMode::Write);
        let initial_registry = registry("initial");
        let second_registry = registry("second");

        let next: crate::transaction::Result<Box<dyn InternalTransaction>> = match begin_error {
            Some(err) => Err(err),
            None => Ok(Box::new(RecordingTransaction {
                name: "second",
                log: Arc::clone(&log),
                close_error: None,
            })),
        };

        let query = Arc::new(ExecutingQuery::new(QueryId::new(10), "X", Default::default()));
        initial_registry.register(Arc::clone(&query));
        log.lock().clear();

        Fixture {
            bridge: RecordingBridge {
                log: Arc::clone(&log),
                bound: Mutex::new(VecDeque::from(vec![initial.clone(), second.clone()])),
                statement: Some(Statement::with_registry(second.clone(), second_registry)),
            },
            service: Arc::new(ScriptedService {
                begins: AtomicUsize::new(0),
                next: Mutex::new(Some(next)),
            }),
            guard: Arc::new(CountingGuard {
                log: Arc::clone(&log),
                inner: TerminationGuard::new(),
            }),
            transaction: Some(Box::new(RecordingTransaction {
                name: "initial",
                log: Arc::clone(&log),
                close_error: commit_error,
            })),
            statement: Statement::with_registry(initial.clone(), initial_registry),
            query,
            log,
            membership,
            audit,
            initial,
            second,
        }
    }

    fn context(fx: &mut Fixture) -> TransactionalContext<'_> {
        TransactionalContext::new(
            fx.service.clone(),
            fx.guard.clone(),
            &mut fx.bridge,
            fx.transaction.take().unwrap(),
            fx.statement.clone(),
            Arc::clone(&fx.query),
        )
    }

    fn rotation_calls() -> Vec<Call> {
        let query = QueryId::new(10);
        vec![
            // Unbind old
            Call::BoundTransaction,
            Call::Unbind,
            // Register and unbind new
            Call::Statement,
            Call::Register("second", query),
            Call::BoundTransaction,
            Call::Unbind,
            // Rebind, unregister and close old
            Call::Bind(TransactionId::new(1)),
            Call::Unregister("initial", query),
            Call::Success("initial"),
            Call::Close("initial"),
            Call::Unbind,
            // Rebind new
            Call::Bind(TransactionId::new(2)),
        ]
    }

    #[test]
    fn test_check_delegates_to_guard() {
        let mut fx = fixture(None, None);
        let ctx = context(&mut fx);

        for _ in 0..3 {
            ctx.check().unwrap();
        }
        drop(ctx);

        assert_eq!(*fx.log.lock(), vec![Call::Check, Call::Check, Call::Check]);
        assert_eq!(fx.service.begins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_check_fails_on_terminated_transaction() {
        let mut fx = fixture(None, None);
        fx.initial.mark_for_termination(TerminationReason::Killed);
        let ctx = context(&mut fx);

        assert_eq!(
            ctx.check(),
            Err(ContextError::TransactionTerminated(GuardError::TransactionTerminated(
                TransactionId::new(1),
                TerminationReason::Killed
            )))
        );
        assert!(ctx.is_open());
        assert_eq!(ctx.kernel_transaction().id(), TransactionId::new(1));
        drop(ctx);

        assert_eq!(*fx.log.lock(), vec![Call::Check]);
        assert_eq!(*fx.membership.lock(), vec![("initial", QueryId::new(10))]);
    }

    #[test]
    fn test_never_stops_executing_query_during_commit_and_restart() {
        let mut fx = fixture(None, None);
        let query = Arc::clone(&fx.query);
        let mut ctx = context(&mut fx);

        ctx.commit_and_restart_tx().unwrap();

        assert!(ctx.is_open());
        assert_eq!(ctx.rotations(), 1);
        assert_eq!(ctx.kernel_transaction().id(), TransactionId::new(2));
        assert!(Arc::ptr_eq(ctx.executing_query(), &query));
        assert_eq!(ctx.executing_query().query_text(), "X");
        drop(ctx);

        assert_eq!(*fx.log.lock(), rotation_calls());
        assert_eq!(fx.service.begins.load(Ordering::SeqCst), 1);
        assert_eq!(*fx.membership.lock(), vec![("second", QueryId::new(10))]);
    }

    #[test]
    fn test_check_after_rotation_uses_new_statement() {
        let mut fx = fixture(None, None);
        let second = fx.second.clone();
        let mut ctx = context(&mut fx);
        ctx.commit_and_restart_tx().unwrap();

        second.mark_for_termination(TerminationReason::Timeout);

        assert!(matches!(
            ctx.check(),
            Err(ContextError::TransactionTerminated(GuardError::TransactionTerminated(id, _)))
                if id == TransactionId::new(2)
        ));
    }

    #[test]
    fn test_failed_begin_restores_old_binding() {
        let mut fx = fixture(
            Some(TransactionError::ResourceLimit { active: 1, limit: 1 }),
            None,
        );
        let mut ctx = context(&mut fx);

        let err = ctx.commit_and_restart_tx().unwrap_err();

        assert_eq!(
            err,
            ContextError::TransactionBeginFailed {
                bound: Some(TransactionId::new(1)),
                source: TransactionError::ResourceLimit { active: 1, limit: 1 },
            }
        );
        assert!(err.is_rotation_failure());
        assert!(ctx.is_open());
        assert_eq!(ctx.rotations(), 0);
        assert_eq!(ctx.kernel_transaction().id(), TransactionId::new(1));
        drop(ctx);

        assert_eq!(
            *fx.log.lock(),
            vec![
                Call::BoundTransaction,
                Call::Unbind,
                Call::Bind(TransactionId::new(1)),
            ]
        );
        assert_eq!(*fx.membership.lock(), vec![("initial", QueryId::new(10))]);
    }

    #[test]
    fn test_failed_commit_keeps_new_transaction_bound() {
        let failure = TransactionError::Terminated(TransactionId::new(1), TerminationReason::Killed);
        let mut fx = fixture(None, Some(failure.clone()));
        let mut ctx = context(&mut fx);

        let err = ctx.commit_and_restart_tx().unwrap_err();

        assert_eq!(
            err,
            ContextError::TransactionCommitFailed {
                old: TransactionId::new(1),
                new: TransactionId::new(2),
                source: failure,
            }
        );
        assert!(!err.is_rotation_failure());
        assert!(ctx.is_open());
        assert_eq!(ctx.rotations(), 1);
        assert_eq!(ctx.kernel_transaction().id(), TransactionId::new(2));
        assert!(matches!(
            ctx.check(),
            Err(ContextError::TransactionTerminated(GuardError::TransactionTerminated(
                _,
                TerminationReason::Killed
            )))
        ));
        drop(ctx);

        assert_eq!(fx.second.termination_reason(), Some(TerminationReason::Killed));
        let mut expected = rotation_calls();
        expected.push(Call::Check);
        assert_eq!(*fx.log.lock(), expected);
        assert_eq!(*fx.membership.lock(), vec![("second", QueryId::new(10))]);
    }

    #[test]
    fn test_failed_commit_for_other_reasons_leaves_new_transaction_running() {
        let failure = TransactionError::Terminated(TransactionId::new(1), TerminationReason::Timeout);
        let mut fx = fixture(None, Some(failure));
        let mut ctx = context(&mut fx);

        assert!(matches!(
            ctx.commit_and_restart_tx(),
            Err(ContextError::TransactionCommitFailed { .. })
        ));
        ctx.check().unwrap();
        drop(ctx);

        assert!(fx.second.termination_reason().is_none());
    }

    #[test]
    fn test_missing_binding_poisons_context() {
        let mut fx = fixture(None, None);
        fx.bridge.bound.lock().clear();
        let mut ctx = context(&mut fx);

        assert!(matches!(
            ctx.commit_and_restart_tx(),
            Err(ContextError::BindingInvariantViolation(_))
        ));
        assert!(!ctx.is_open());
        assert!(matches!(
            ctx.check(),
            Err(ContextError::BindingInvariantViolation(_))
        ));
        assert!(matches!(
            ctx.commit_and_restart_tx(),
            Err(ContextError::BindingInvariantViolation(_))
        ));
        drop(ctx);

        assert_eq!(*fx.log.lock(), vec![Call::BoundTransaction]);
        assert_eq!(fx.service.begins.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_close_unregisters_and_unbinds() {
        let mut fx = fixture(None, None);
        fx.audit.store(false, Ordering::SeqCst);
        let ctx = context(&mut fx);

        ctx.close(false).unwrap();

        assert_eq!(
            *fx.log.lock(),
            vec![
                Call::Unregister("initial", QueryId::new(10)),
                Call::Failure("initial"),
                Call::Close("initial"),
                Call::Unbind,
            ]
        );
    }
}
