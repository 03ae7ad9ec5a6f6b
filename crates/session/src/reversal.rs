use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use keel_core::{ArchiveId, UserId};
use keel_ledger::{ArchivedTransaction, LedgerEntry, TransactionId};
use keel_store::{DocumentStore, FieldFilter, to_body};

use crate::context::{LedgerSession, collections};
use crate::error::SessionError;

/// What a reversal did.
#[derive(Debug)]
pub enum ReversalOutcome {
    Reversed(ReversalReceipt),
    /// No live entries carried the transaction id. Reversal is
    /// idempotent: nothing was archived or deleted.
    NothingToReverse,
}

#[derive(Debug)]
pub struct ReversalReceipt {
    pub archive_id: ArchiveId,
    /// The entries moved out of the live log, for best-effort follow-up
    /// cleanup (inventory, partner-level corrections) outside the
    /// ledger core.
    pub entries: Vec<LedgerEntry>,
    /// Remote removal failures; local state is already reduced.
    pub store_errors: Vec<String>,
}

impl<S: DocumentStore> LedgerSession<S> {
    /// Reverse a posted transaction: archive its entries durably, then
    /// remove them from the live log, then recompute balances by full
    /// replay.
    ///
    /// Archival-before-deletion is the safety invariant: if the archive
    /// write fails the reversal aborts with every live entry intact.
    /// Once archived, removal failures are reported but do not
    /// resurrect local state. `LIVE -> ARCHIVED` has no reverse
    /// transition; compensation needs a freshly minted transaction id.
    pub async fn reverse_transaction(
        &self,
        transaction_id: &TransactionId,
        reason: &str,
        actor: UserId,
    ) -> Result<ReversalOutcome, SessionError> {
        let live = self.entries_for_transaction(transaction_id);
        if live.is_empty() {
            info!(transaction = %transaction_id, "no live entries, reversal is a no-op");
            return Ok(ReversalOutcome::NothingToReverse);
        }

        let archived = ArchivedTransaction::from_live(
            transaction_id.clone(),
            live,
            reason,
            actor,
            Utc::now(),
        )?;
        let body = to_body(&archived)?;
        self.store()
            .append(collections::ARCHIVE, self.tenant_id(), body)
            .await
            .map_err(SessionError::Archive)?;

        // Past this point the undo record is durable; deletion proceeds
        // even if individual removals fail.
        let removed = self.remove_transaction_local(transaction_id);

        let mut store_errors = Vec::new();
        let filter = FieldFilter::new("transaction_id", json!(transaction_id.as_str()));
        match self
            .store()
            .query_by_field(collections::ENTRIES, self.tenant_id(), &filter)
            .await
        {
            Ok(docs) => {
                for doc in docs {
                    if let Err(e) = self
                        .store()
                        .remove_document(collections::ENTRIES, &doc.id)
                        .await
                    {
                        warn!(document = %doc.id, error = %e, "remote entry removal failed");
                        store_errors.push(format!("remove {}: {e}", doc.id));
                    }
                }
            }
            Err(e) => {
                warn!(error = %e, "could not query live entries for removal");
                store_errors.push(format!("query entries: {e}"));
            }
        }

        // Full replay, not delta subtraction: repeated reversals must
        // not accumulate rounding drift.
        self.rebuild_report();

        Ok(ReversalOutcome::Reversed(ReversalReceipt {
            archive_id: archived.id,
            entries: removed,
            store_errors,
        }))
    }
}
