//! Accounting module (double-entry ledger with derived balances).
//!
//! Pure domain logic only: no IO, no store access, no persistence concerns.
//! Balances are never stored fields; they exist only as projector output.

pub mod account;
pub mod archive;
pub mod currency;
pub mod entry;
pub mod log;
pub mod partner;
pub mod posting;
pub mod projector;

pub use account::{Account, AccountKind};
pub use archive::ArchivedTransaction;
pub use currency::{CurrencyResolution, RateTable};
pub use entry::{AccountRef, LedgerEntry, TransactionId, TransactionType};
pub use log::LedgerLog;
pub use partner::{ContactInfo, Partner, PartnerKind};
pub use posting::{
    BalancePolicy, LineDraft, Side, TransactionDraft, balance_gap, check_balanced,
    BALANCE_EPSILON,
};
pub use projector::{AccountBalance, BalanceReport, PartnerBalance, TrialBalance, project};
