//! Creation of transactional contexts for incoming queries.

use std::sync::Arc;

use super::error::{ContextError, Result};
use super::service::QueryService;
use super::TransactionalContext;
use crate::bridge::TransactionBridge;
use crate::guard::Guard;
use crate::query::{ExecutingQuery, QueryParameters};
use crate::transaction::{AccessMode, QueryIdGenerator, TransactionType};

/// Opens a transaction for a query, registers the query with it and wraps
/// both in a [`TransactionalContext`].
pub struct TransactionalContextFactory {
    service: Arc<dyn QueryService>,
    guard: Arc<dyn Guard>,
    query_ids: QueryIdGenerator,
}

impl TransactionalContextFactory {
    pub fn new(service: Arc<dyn QueryService>, guard: Arc<dyn Guard>) -> Self {
        Self {
            service,
            guard,
            query_ids: QueryIdGenerator::new(),
        }
    }

    pub fn new_context<'a>(
        &self,
        bridge: &'a mut dyn TransactionBridge,
        tx_type: TransactionType,
        access_mode: AccessMode,
        query_text: &str,
        parameters: QueryParameters,
    ) -> Result<TransactionalContext<'a>> {
        let bound = bridge.bound_transaction().map(|transaction| transaction.id());
        let transaction = self
            .service
            .begin_transaction(&mut *bridge, tx_type, access_mode)
            .map_err(|source| ContextError::TransactionBeginFailed { bound, source })?;

        let statement = match bridge.statement() {
            Ok(statement) => statement,
            Err(err) => {
                bridge.unbind();
                return Err(ContextError::BindingInvariantViolation(format!(
                    "new transaction has no statement: {}",
                    err
                )));
            }
        };

        let query = Arc::new(ExecutingQuery::new(self.query_ids.next(), query_text, parameters));
        statement.query_registration().register(Arc::clone(&query));
        log::debug!("started {} in {}", query.id(), statement.transaction().id());

        Ok(TransactionalContext::new(
            Arc::clone(&self.service),
            Arc::clone(&self.guard),
            bridge,
            transaction,
            statement,
            query,
        ))
    }
}
