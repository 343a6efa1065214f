pub mod bridge;
pub mod config;
pub mod context;
pub mod guard;
pub mod query;
pub mod transaction;
