use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use keel_core::{ArchiveId, DomainError, DomainResult, TenantId, UserId};

use crate::entry::{LedgerEntry, TransactionId};

/// Immutable audit record of a reversed transaction.
///
/// Written durably before the live entries are deleted; never mutated
/// or deleted afterwards. This is the sole undo record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchivedTransaction {
    pub id: ArchiveId,
    pub original_transaction_id: TransactionId,
    pub deleted_at: DateTime<Utc>,
    pub deleted_by: UserId,
    pub reason: String,
    pub entries: Vec<LedgerEntry>,
    /// Sum of debits across the archived entries.
    pub total_value: f64,
    pub tenant_id: TenantId,
}

impl ArchivedTransaction {
    /// Snapshot the live entries of one transaction for archival.
    ///
    /// Rejects an empty set: the caller treats "no live entries" as an
    /// idempotent no-op and must not write an archive record for it.
    pub fn from_live(
        transaction_id: TransactionId,
        entries: Vec<LedgerEntry>,
        reason: impl Into<String>,
        deleted_by: UserId,
        deleted_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        let first = entries
            .first()
            .ok_or_else(|| DomainError::validation("cannot archive an empty transaction"))?;
        let tenant_id = first.tenant_id;
        let total_value = entries.iter().map(|e| e.debit).sum();

        Ok(Self {
            id: ArchiveId::new(),
            original_transaction_id: transaction_id,
            deleted_at,
            deleted_by,
            reason: reason.into(),
            entries,
            total_value,
            tenant_id,
        })
    }
}
