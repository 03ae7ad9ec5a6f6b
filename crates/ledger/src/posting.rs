use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{DomainError, DomainResult, EntryId, TenantId};

use crate::currency::RateTable;
use crate::entry::{AccountRef, LedgerEntry, TransactionId, TransactionType};

/// Tolerance for the balanced-transaction invariant.
pub const BALANCE_EPSILON: f64 = 1e-6;

/// Which side of the ledger a draft line posts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Debit,
    Credit,
}

impl Side {
    /// The opposite side, used when building compensating lines.
    pub fn flipped(&self) -> Side {
        match self {
            Side::Debit => Side::Credit,
            Side::Credit => Side::Debit,
        }
    }
}

/// How the poster treats an unbalanced transaction.
///
/// `Enforce` rejects it outright. `Advisory` logs a warning and posts
/// anyway; it exists for rare deliberate one-sided adjustment flows and
/// must be opted into per call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BalancePolicy {
    Enforce,
    Advisory,
}

/// One line of a not-yet-posted transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineDraft {
    pub account: AccountRef,
    pub account_name: String,
    pub side: Side,
    /// Functional-currency amount, strictly positive.
    pub amount: f64,
    /// Display currency; defaults to the functional currency.
    pub currency: Option<String>,
    pub narration: Option<String>,
}

impl LineDraft {
    pub fn new(account: AccountRef, account_name: impl Into<String>, side: Side, amount: f64) -> Self {
        Self {
            account,
            account_name: account_name.into(),
            side,
            amount,
            currency: None,
            narration: None,
        }
    }

    pub fn with_currency(mut self, currency: impl Into<String>) -> Self {
        self.currency = Some(currency.into());
        self
    }

    pub fn with_narration(mut self, narration: impl Into<String>) -> Self {
        self.narration = Some(narration.into());
        self
    }
}

/// A transaction waiting to be posted: one economic event, many lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionDraft {
    pub transaction_type: TransactionType,
    /// Natural key (batch number, invoice number, entity code, ...).
    pub natural_key: String,
    pub date: DateTime<Utc>,
    pub lines: Vec<LineDraft>,
}

impl TransactionDraft {
    pub fn new(
        transaction_type: TransactionType,
        natural_key: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            transaction_type,
            natural_key: natural_key.into(),
            date,
            lines: Vec::new(),
        }
    }

    pub fn line(mut self, line: LineDraft) -> Self {
        self.lines.push(line);
        self
    }

    pub fn transaction_id(&self) -> TransactionId {
        TransactionId::new(self.transaction_type, &self.natural_key)
    }

    /// Turn the draft into concrete entries for `tenant_id`.
    ///
    /// Assigns fresh entry ids and captures the exchange rate per line.
    /// Does NOT check the balance contract; that is the caller's step,
    /// governed by its `BalancePolicy`.
    pub fn realize(&self, tenant_id: TenantId, rates: &RateTable) -> DomainResult<Vec<LedgerEntry>> {
        if self.lines.is_empty() {
            return Err(DomainError::validation("transaction must have lines"));
        }
        if self.natural_key.trim().is_empty() {
            return Err(DomainError::validation("transaction natural key must not be empty"));
        }

        let transaction_id = self.transaction_id();
        let mut entries = Vec::with_capacity(self.lines.len());

        for line in &self.lines {
            if !line.amount.is_finite() || line.amount <= 0.0 {
                return Err(DomainError::validation(format!(
                    "line amount must be positive, got {}",
                    line.amount
                )));
            }

            let currency = line
                .currency
                .clone()
                .unwrap_or_else(|| rates.functional_code().to_string());
            let resolved = rates.resolve(line.amount, &currency);

            let (debit, credit) = match line.side {
                Side::Debit => (line.amount, 0.0),
                Side::Credit => (0.0, line.amount),
            };

            entries.push(LedgerEntry {
                id: EntryId::new(),
                transaction_id: transaction_id.clone(),
                transaction_type: self.transaction_type,
                date: self.date,
                account: line.account,
                account_name: line.account_name.clone(),
                currency,
                exchange_rate: resolved.exchange_rate,
                fcy_amount: resolved.fcy_amount,
                debit,
                credit,
                narration: line.narration.clone(),
                tenant_id,
            });
        }

        Ok(entries)
    }
}

/// Sum of debits minus sum of credits across a transaction's entries.
pub fn balance_gap(entries: &[LedgerEntry]) -> f64 {
    entries.iter().map(|e| e.debit - e.credit).sum()
}

/// The balanced-transaction contract: sum(debit) == sum(credit) within
/// `BALANCE_EPSILON`.
pub fn check_balanced(entries: &[LedgerEntry]) -> DomainResult<()> {
    let gap = balance_gap(entries);
    if gap.abs() > BALANCE_EPSILON {
        return Err(DomainError::invariant(format!(
            "transaction does not balance: debit - credit = {gap}"
        )));
    }
    Ok(())
}
