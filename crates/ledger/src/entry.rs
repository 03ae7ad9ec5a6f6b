use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{AccountId, EntryId, PartnerId, TenantId};

/// Economic event class a transaction belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    OpeningBalance,
    Purchase,
    Sale,
    Payment,
    Receipt,
    Expense,
    Adjustment,
    Transfer,
}

impl TransactionType {
    /// Domain prefix used when deriving a deterministic transaction id.
    pub fn prefix(&self) -> &'static str {
        match self {
            TransactionType::OpeningBalance => "OB",
            TransactionType::Purchase => "PUR",
            TransactionType::Sale => "SAL",
            TransactionType::Payment => "PAY",
            TransactionType::Receipt => "RCT",
            TransactionType::Expense => "EXP",
            TransactionType::Adjustment => "ADJ",
            TransactionType::Transfer => "TRF",
        }
    }
}

/// Transaction group identifier.
///
/// Built deterministically from a domain prefix plus a natural key
/// (purchase batch number, invoice number, entity code for opening
/// balances). All entries of one economic event share it, which makes
/// later lookup and reversal possible without tracking entry ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransactionId(String);

impl TransactionId {
    pub fn new(transaction_type: TransactionType, natural_key: &str) -> Self {
        Self(format!("TXN-{}-{}", transaction_type.prefix(), natural_key))
    }

    pub fn opening_balance(entity_code: &str) -> Self {
        Self::new(TransactionType::OpeningBalance, entity_code)
    }

    /// Wrap an id that was read back from the store verbatim.
    pub fn from_raw(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// The ledger side an entry posts to: a chart account, or a partner
/// behaving as one (its id doubles as an account id).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum AccountRef {
    Account(AccountId),
    Partner(PartnerId),
}

/// One debit- or credit-tagged line in the ledger log.
///
/// Immutable once posted; only removable wholesale via archival. The
/// functional-currency amounts live in `debit`/`credit`; `fcy_amount`
/// and `exchange_rate` are captured at posting time and never
/// recomputed, so historical entries are immune to later rate changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: EntryId,
    pub transaction_id: TransactionId,
    pub transaction_type: TransactionType,
    pub date: DateTime<Utc>,
    pub account: AccountRef,
    pub account_name: String,
    pub currency: String,
    pub exchange_rate: f64,
    pub fcy_amount: f64,
    pub debit: f64,
    pub credit: f64,
    pub narration: Option<String>,
    pub tenant_id: TenantId,
}

impl LedgerEntry {
    /// Signed functional-currency movement (debit positive).
    pub fn signed_amount(&self) -> f64 {
        self.debit - self.credit
    }
}
