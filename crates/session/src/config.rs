use std::time::Duration;

use keel_ledger::BalancePolicy;

/// Schedule for the write-then-poll convergence loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvergenceConfig {
    /// Poll attempts before giving up on a pending write.
    pub max_attempts: u32,
    /// First backoff between polls; doubles per attempt.
    pub initial_backoff: Duration,
    /// Settle delay before the first read-back.
    pub settle_delay: Duration,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            max_attempts: 6,
            initial_backoff: Duration::from_millis(50),
            settle_delay: Duration::from_millis(25),
        }
    }
}

/// Session-wide defaults; supplied by the host application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Default treatment of unbalanced transactions. `Advisory` can be
    /// chosen per call via `post_transaction_with`.
    pub balance_policy: BalancePolicy,
    pub convergence: ConvergenceConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            balance_policy: BalancePolicy::Enforce,
            convergence: ConvergenceConfig::default(),
        }
    }
}

impl SessionConfig {
    pub fn with_balance_policy(mut self, policy: BalancePolicy) -> Self {
        self.balance_policy = policy;
        self
    }

    pub fn with_convergence(mut self, convergence: ConvergenceConfig) -> Self {
        self.convergence = convergence;
        self
    }
}
