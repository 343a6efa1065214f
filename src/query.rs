//! Executing queries and the per-transaction live-query registry.

pub mod executing;
pub mod registry;

pub use executing::{ExecutingQuery, QueryParameters, QuerySnapshot, Value};
pub use registry::{QueryRegistry, QueryRegistryOperations};
