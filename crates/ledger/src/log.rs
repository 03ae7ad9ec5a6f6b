use tracing::warn;

use keel_core::{DomainError, DomainResult, TenantId};

use crate::entry::{AccountRef, LedgerEntry, TransactionId};

/// Append-only, tenant-scoped collection of ledger entries grouped
/// logically by transaction id.
///
/// The log itself never edits an entry: entries are appended by the
/// poster, replaced wholesale when a store snapshot arrives, and removed
/// wholesale per transaction by the archival path.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerLog {
    tenant_id: TenantId,
    entries: Vec<LedgerEntry>,
}

impl LedgerLog {
    pub fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            entries: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Append a batch of locally posted entries.
    ///
    /// Rejects entries stamped for another tenant; one log serves
    /// exactly one tenant.
    pub fn append(&mut self, entries: Vec<LedgerEntry>) -> DomainResult<()> {
        for e in &entries {
            if e.tenant_id != self.tenant_id {
                return Err(DomainError::invariant(format!(
                    "entry {} belongs to another tenant",
                    e.id
                )));
            }
        }
        self.entries.extend(entries);
        Ok(())
    }

    /// Replace the whole log with a store snapshot (replace, not merge).
    ///
    /// Entries for other tenants are dropped with a warning; the
    /// subscription filter should already have excluded them.
    pub fn replace(&mut self, entries: Vec<LedgerEntry>) {
        let tenant = self.tenant_id;
        let (ours, foreign): (Vec<_>, Vec<_>) =
            entries.into_iter().partition(|e| e.tenant_id == tenant);
        if !foreign.is_empty() {
            warn!(
                count = foreign.len(),
                "snapshot contained entries for another tenant, dropped"
            );
        }
        self.entries = ours;
    }

    pub fn for_transaction(&self, transaction_id: &TransactionId) -> Vec<&LedgerEntry> {
        self.entries
            .iter()
            .filter(|e| &e.transaction_id == transaction_id)
            .collect()
    }

    pub fn for_account(&self, account: AccountRef) -> Vec<&LedgerEntry> {
        self.entries.iter().filter(|e| e.account == account).collect()
    }

    /// Remove every entry of one transaction, returning the removed set.
    ///
    /// An unknown transaction id removes nothing and returns empty.
    pub fn remove_transaction(&mut self, transaction_id: &TransactionId) -> Vec<LedgerEntry> {
        let (removed, kept): (Vec<_>, Vec<_>) = std::mem::take(&mut self.entries)
            .into_iter()
            .partition(|e| &e.transaction_id == transaction_id);
        self.entries = kept;
        removed
    }
}
