//! The descriptor of one running logical query.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::transaction::{QueryId, TransactionId};

/// A query parameter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Integer(i64),
    Float(f64),
    String(String),
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s),
        }
    }
}

pub type QueryParameters = BTreeMap<String, Value>;

/// Identity, text and parameters of a running query.
///
/// Shared as `Arc<ExecutingQuery>`; the same instance is registered with
/// every transaction the query runs under.
#[derive(Debug)]
pub struct ExecutingQuery {
    id: QueryId,
    text: String,
    parameters: QueryParameters,
    start_time: Instant,
}

impl ExecutingQuery {
    pub fn new(id: QueryId, text: impl Into<String>, parameters: QueryParameters) -> Self {
        Self {
            id,
            text: text.into(),
            parameters,
            start_time: Instant::now(),
        }
    }

    pub fn id(&self) -> QueryId {
        self.id
    }

    pub fn query_text(&self) -> &str {
        &self.text
    }

    pub fn query_parameters(&self) -> &QueryParameters {
        &self.parameters
    }

    /// Time since the query started, across all transactions it ran in.
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// A point-in-time view for monitoring, attributed to `transaction_id`.
    pub fn snapshot(&self, transaction_id: TransactionId) -> QuerySnapshot {
        QuerySnapshot {
            query_id: self.id,
            transaction_id,
            query_text: self.text.clone(),
            parameters: self.parameters.clone(),
            elapsed_millis: self.elapsed().as_millis() as u64,
        }
    }
}

/// A row of the "list running queries" view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuerySnapshot {
    pub query_id: QueryId,
    pub transaction_id: TransactionId,
    pub query_text: String,
    pub parameters: QueryParameters,
    pub elapsed_millis: u64,
}
