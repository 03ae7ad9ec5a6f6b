//! `keel-session` — per-tenant ledger runtime.
//!
//! A `LedgerSession` is the explicit context object for one tenant: it
//! owns the local projection cache (entries, accounts, partners and the
//! balance report derived from them), the store subscriptions that keep
//! that cache converging with remote state, and the write paths (post,
//! reverse, copy). Sessions have an explicit open/close lifecycle; there
//! is no module-level "current tenant" state.

pub mod config;
pub mod context;
pub mod error;
pub mod pending;
pub mod reversal;

pub use config::{ConvergenceConfig, SessionConfig};
pub use context::{collections, LedgerSession, PostReceipt};
pub use error::SessionError;
pub use pending::{PendingWrite, TrackedCollection, Visibility};
pub use reversal::{ReversalOutcome, ReversalReceipt};
