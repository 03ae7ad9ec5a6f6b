use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use keel_core::{AccountId, PartnerId};

use crate::account::{Account, AccountKind};
use crate::entry::{AccountRef, LedgerEntry};
use crate::partner::{Partner, PartnerKind};
use crate::posting::BALANCE_EPSILON;

/// Projected balance of one chart account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub debit_total: f64,
    pub credit_total: f64,
    /// debit − credit for Asset/Expense, credit − debit otherwise.
    pub balance: f64,
}

impl AccountBalance {
    fn zero(account: &Account) -> Self {
        Self {
            account_id: account.id,
            code: account.code.clone(),
            name: account.name.clone(),
            kind: account.kind,
            debit_total: 0.0,
            credit_total: 0.0,
            balance: 0.0,
        }
    }

    fn recompute(&mut self) {
        self.balance = if self.kind.debit_normal() {
            self.debit_total - self.credit_total
        } else {
            self.credit_total - self.debit_total
        };
    }
}

/// Projected balance of one partner.
///
/// All partner kinds are debit-normal. The raw signed balance overloads
/// its meaning per kind; use the accessors instead of interpreting the
/// sign at call sites.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartnerBalance {
    pub partner_id: PartnerId,
    pub code: String,
    pub name: String,
    pub kind: PartnerKind,
    pub debit_total: f64,
    pub credit_total: f64,
    /// debit − credit. Customers: positive = owed to us. Suppliers:
    /// positive = advance paid, negative = payable outstanding.
    pub balance: f64,
}

impl PartnerBalance {
    fn zero(partner: &Partner) -> Self {
        Self {
            partner_id: partner.id,
            code: partner.code.clone(),
            name: partner.name.clone(),
            kind: partner.kind,
            debit_total: 0.0,
            credit_total: 0.0,
            balance: 0.0,
        }
    }

    fn recompute(&mut self) {
        self.balance = self.debit_total - self.credit_total;
    }

    /// What this partner owes us (or the advance we hold with them).
    pub fn receivable(&self) -> f64 {
        self.balance.max(0.0)
    }

    /// What we owe this partner.
    pub fn payable(&self) -> f64 {
        (-self.balance).max(0.0)
    }
}

/// Ledger-wide debit/credit totals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub debit_total: f64,
    pub credit_total: f64,
}

impl TrialBalance {
    pub fn difference(&self) -> f64 {
        self.debit_total - self.credit_total
    }

    pub fn is_balanced(&self) -> bool {
        self.difference().abs() <= BALANCE_EPSILON
    }
}

/// Derived account and partner balances: the pure output of folding the
/// entry log. There is no other source of balance truth.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BalanceReport {
    accounts: BTreeMap<AccountId, AccountBalance>,
    partners: BTreeMap<PartnerId, PartnerBalance>,
}

impl BalanceReport {
    /// Zero-balance report covering the given accounts and partners.
    pub fn seed(accounts: &[Account], partners: &[Partner]) -> Self {
        Self {
            accounts: accounts
                .iter()
                .map(|a| (a.id, AccountBalance::zero(a)))
                .collect(),
            partners: partners
                .iter()
                .map(|p| (p.id, PartnerBalance::zero(p)))
                .collect(),
        }
    }

    /// Fold a batch of entries into the report (the incremental path).
    ///
    /// Entries referencing accounts or partners the report does not know
    /// are skipped: referential integrity is enforced where entries are
    /// created, not here, and the projector must stay total.
    pub fn absorb(&mut self, entries: &[LedgerEntry]) {
        for entry in entries {
            match entry.account {
                AccountRef::Account(id) => match self.accounts.get_mut(&id) {
                    Some(balance) => {
                        balance.debit_total += entry.debit;
                        balance.credit_total += entry.credit;
                        balance.recompute();
                    }
                    None => debug!(entry = %entry.id, account = %id, "entry references unknown account, skipped"),
                },
                AccountRef::Partner(id) => match self.partners.get_mut(&id) {
                    Some(balance) => {
                        balance.debit_total += entry.debit;
                        balance.credit_total += entry.credit;
                        balance.recompute();
                    }
                    None => debug!(entry = %entry.id, partner = %id, "entry references unknown partner, skipped"),
                },
            }
        }
    }

    pub fn account(&self, id: AccountId) -> Option<&AccountBalance> {
        self.accounts.get(&id)
    }

    pub fn partner(&self, id: PartnerId) -> Option<&PartnerBalance> {
        self.partners.get(&id)
    }

    pub fn account_by_code(&self, code: &str) -> Option<&AccountBalance> {
        self.accounts.values().find(|a| a.code == code)
    }

    pub fn partner_by_code(&self, code: &str) -> Option<&PartnerBalance> {
        self.partners.values().find(|p| p.code == code)
    }

    pub fn accounts(&self) -> impl Iterator<Item = &AccountBalance> {
        self.accounts.values()
    }

    pub fn partners(&self) -> impl Iterator<Item = &PartnerBalance> {
        self.partners.values()
    }

    /// Debit/credit totals across every account and partner.
    pub fn trial_balance(&self) -> TrialBalance {
        let mut debit_total = 0.0;
        let mut credit_total = 0.0;
        for a in self.accounts.values() {
            debit_total += a.debit_total;
            credit_total += a.credit_total;
        }
        for p in self.partners.values() {
            debit_total += p.debit_total;
            credit_total += p.credit_total;
        }
        TrialBalance {
            debit_total,
            credit_total,
        }
    }
}

/// Full replay: fold the whole entry log into fresh balances.
///
/// Pure and total: the same input always yields the same output, and
/// accounts or partners with no entries project balance 0.
pub fn project(entries: &[LedgerEntry], accounts: &[Account], partners: &[Partner]) -> BalanceReport {
    let mut report = BalanceReport::seed(accounts, partners);
    report.absorb(entries);
    report
}
