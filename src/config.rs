//! Kernel configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Limits applied by the transaction manager.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelConfig {
    /// Maximum number of simultaneously active transactions. `None` means unlimited.
    pub max_concurrent_transactions: Option<usize>,
    /// Transactions running longer than this are marked for termination
    /// by `TransactionManager::terminate_expired`.
    pub transaction_timeout: Option<Duration>,
}

impl KernelConfig {
    pub fn with_max_concurrent_transactions(mut self, limit: usize) -> Self {
        self.max_concurrent_transactions = Some(limit);
        self
    }

    pub fn with_transaction_timeout(mut self, timeout: Duration) -> Self {
        self.transaction_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_unlimited() {
        let config = KernelConfig::default();
        assert!(config.max_concurrent_transactions.is_none());
        assert!(config.transaction_timeout.is_none());
    }

    #[test]
    fn test_config_builders() {
        let config = KernelConfig::default()
            .with_max_concurrent_transactions(4)
            .with_transaction_timeout(Duration::from_secs(30));

        assert_eq!(config.max_concurrent_transactions, Some(4));
        assert_eq!(config.transaction_timeout, Some(Duration::from_secs(30)));
    }
}
