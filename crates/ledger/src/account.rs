use serde::{Deserialize, Serialize};

use keel_core::{AccountId, TenantId};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    /// Asset and Expense accounts grow on the debit side; the rest on credit.
    pub fn debit_normal(&self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }
}

/// Chart-of-accounts account.
///
/// Carries no balance field: balances are derived exclusively by the
/// projector from the entry log, which removes the seed-then-post
/// double-counting hazard at the type level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    /// Natural key within a tenant, e.g. "1000".
    pub code: String,
    pub name: String,
    pub kind: AccountKind,
    pub tenant_id: TenantId,
}

impl Account {
    pub fn new(
        tenant_id: TenantId,
        code: impl Into<String>,
        name: impl Into<String>,
        kind: AccountKind,
    ) -> Self {
        Self {
            id: AccountId::new(),
            code: code.into(),
            name: name.into(),
            kind,
            tenant_id,
        }
    }

    /// Re-originate this account in another tenant.
    ///
    /// The copy gets a fresh id and starts with no entry history in the
    /// target tenant, so its projected balance is zero. Lineage to the
    /// source tenant is deliberately severed.
    pub fn copy_to_tenant(&self, target: TenantId) -> Account {
        Account {
            id: AccountId::new(),
            code: self.code.clone(),
            name: self.name.clone(),
            kind: self.kind,
            tenant_id: target,
        }
    }
}
