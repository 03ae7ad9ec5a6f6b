use std::collections::HashSet;
use std::time::Duration;

use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use thiserror::Error;
use tracing::{info, warn};

use keel_ledger::{
    Account, AccountRef, LineDraft, Partner, Side, TransactionDraft, TransactionType,
};
use keel_session::{LedgerSession, PendingWrite, Visibility, collections};
use keel_store::{BatchOp, DocumentStore, MAX_BATCH_OPS, WriteBatch, to_body};

use crate::record::{EntityKind, RawRecord, TypedRecord, detect_kind_mismatch, validate_record};

/// Importer knobs; defaults fit interactive imports.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    /// Counterpart account for opening-balance transactions. Must
    /// already exist in the projection for records that carry one.
    pub opening_equity_code: String,
    /// Cap on the reported error list; the overflow is counted.
    pub error_cap: usize,
    /// How long to wait for a written sub-batch to become locally
    /// visible before posting its dependent transactions anyway.
    pub convergence_timeout: Duration,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            opening_equity_code: "3900".to_string(),
            error_cap: 25,
            convergence_timeout: Duration::from_secs(2),
        }
    }
}

/// Partial-success report. Bulk imports never roll back: whatever
/// landed stays, and this accounts for every record either way.
#[derive(Debug, Default)]
pub struct ImportResult {
    pub success: usize,
    pub failed: usize,
    pub created: usize,
    pub updated: usize,
    pub sub_batches: usize,
    pub errors: Vec<String>,
    /// Errors beyond the cap, counted instead of listed.
    pub errors_truncated: usize,
    /// Non-fatal observations (convergence timeouts).
    pub warnings: Vec<String>,
}

/// Failures that abort the whole batch before any write.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error(
        "batch declared as {declared} records but {percent:.0}% classify as {detected} records; aborted before any write"
    )]
    KindMismatch {
        declared: EntityKind,
        detected: EntityKind,
        percent: f64,
    },
}

enum PlannedWrite {
    Create,
    Update,
}

struct Planned {
    row: usize,
    code: String,
    name: String,
    target: AccountRef,
    write: PlannedWrite,
    /// Only set on creates: updates must never re-post.
    opening_balance: Option<f64>,
    op: BatchOp,
}

impl Planned {
    fn is_create(&self) -> bool {
        matches!(self.write, PlannedWrite::Create)
    }
}

/// Convergence-aware bulk importer for one open session.
pub struct BulkImporter<'a, S: DocumentStore> {
    session: &'a LedgerSession<S>,
    config: ImportConfig,
}

impl<'a, S: DocumentStore> BulkImporter<'a, S> {
    pub fn new(session: &'a LedgerSession<S>) -> Self {
        Self {
            session,
            config: ImportConfig::default(),
        }
    }

    pub fn with_config(session: &'a LedgerSession<S>, config: ImportConfig) -> Self {
        Self { session, config }
    }

    /// Import a batch of raw records declared to be `kind` entities.
    ///
    /// Validates and partitions every record first, writes in
    /// store-capped sub-batches, then waits for each sub-batch to be
    /// locally observable before posting opening-balance transactions
    /// for the records that resolved to creates. A failed sub-batch is
    /// reported and skipped; earlier sub-batches stay committed.
    pub async fn run(
        &self,
        records: Vec<RawRecord>,
        kind: EntityKind,
    ) -> Result<ImportResult, ImportError> {
        let mut result = ImportResult::default();
        if records.is_empty() {
            return Ok(result);
        }

        if let Some(share) = detect_kind_mismatch(kind, &records) {
            return Err(ImportError::KindMismatch {
                declared: kind,
                detected: kind.other(),
                percent: share * 100.0,
            });
        }

        let equity = self.session.account_by_code(&self.config.opening_equity_code);
        let tenant = self.session.tenant_id();

        let mut errors: Vec<String> = Vec::new();
        let mut warnings: Vec<String> = Vec::new();
        let mut seen_codes: HashSet<String> = HashSet::new();
        let mut planned: Vec<Planned> = Vec::new();

        for (index, raw) in records.iter().enumerate() {
            let row = index + 1;
            let typed = match validate_record(kind, raw) {
                Ok(typed) => typed,
                Err(problems) => {
                    result.failed += 1;
                    errors.push(format!("record {row}: {}", problems.join("; ")));
                    continue;
                }
            };

            let code = typed.code().to_string();
            if !seen_codes.insert(code.clone()) {
                result.failed += 1;
                errors.push(format!(
                    "record {row}: duplicate code {code} within batch, skipped"
                ));
                continue;
            }

            if typed.opening_balance().is_some() && equity.is_none() {
                result.failed += 1;
                errors.push(format!(
                    "record {row}: opening balance needs account {} which does not exist",
                    self.config.opening_equity_code
                ));
                continue;
            }

            match self.plan_record(row, tenant, &typed) {
                Ok(p) => planned.push(p),
                Err(e) => {
                    result.failed += 1;
                    errors.push(format!("record {row}: {e}"));
                }
            }
        }

        let chunks: Vec<&[Planned]> = planned.chunks(MAX_BATCH_OPS).collect();
        result.sub_batches = chunks.len();

        for (k, chunk) in chunks.into_iter().enumerate() {
            let number = k + 1;
            let batch = WriteBatch::from_ops(chunk.iter().map(|p| p.op.clone()).collect());

            if let Err(e) = self.session.store().apply_batch(batch).await {
                warn!(sub_batch = number, error = %e, "sub-batch write failed, moving on");
                result.failed += chunk.len();
                errors.push(format!(
                    "sub-batch {number}: write failed ({} records): {e}",
                    chunk.len()
                ));
                continue;
            }

            result.success += chunk.len();
            let creates: Vec<&Planned> = chunk.iter().filter(|p| p.is_create()).collect();
            result.created += creates.len();
            result.updated += chunk.len() - creates.len();

            if creates.is_empty() {
                continue;
            }

            // The write is acknowledged but not necessarily observable
            // yet; dependent posts wait for the feed to catch up.
            let pending = match kind {
                EntityKind::Account => {
                    PendingWrite::accounts(creates.iter().map(|p| p.code.clone()))
                }
                EntityKind::Partner => {
                    PendingWrite::partners(creates.iter().map(|p| p.code.clone()))
                }
            };
            if let Visibility::TimedOut { missing } = self
                .session
                .await_visible(&pending, self.config.convergence_timeout)
                .await
            {
                warnings.push(format!(
                    "sub-batch {number}: {} written records never became locally visible: {}",
                    missing.len(),
                    missing.join(", ")
                ));
            }

            for p in creates {
                let Some(amount) = p.opening_balance else {
                    continue;
                };
                if amount == 0.0 {
                    continue;
                }
                let Some(equity_account) = equity.as_ref() else {
                    continue;
                };
                let draft = opening_balance_draft(p, equity_account, amount);
                match self.session.post_transaction(&draft).await {
                    Ok(receipt) => {
                        for e in receipt.store_errors {
                            errors.push(format!("record {}: opening balance persist: {e}", p.row));
                        }
                    }
                    Err(e) => {
                        errors.push(format!("record {}: opening balance post failed: {e}", p.row));
                    }
                }
            }
        }

        if errors.len() > self.config.error_cap {
            result.errors_truncated = errors.len() - self.config.error_cap;
            errors.truncate(self.config.error_cap);
        }
        result.errors = errors;
        result.warnings = warnings;

        info!(
            kind = %kind,
            success = result.success,
            failed = result.failed,
            created = result.created,
            updated = result.updated,
            sub_batches = result.sub_batches,
            "bulk import finished"
        );
        Ok(result)
    }

    fn plan_record(
        &self,
        row: usize,
        tenant: keel_core::TenantId,
        typed: &TypedRecord,
    ) -> Result<Planned, String> {
        match typed {
            TypedRecord::Account(rec) => match self.session.account_by_code(&rec.code) {
                Some(existing) => {
                    let doc_id = self.session.account_doc_id(&rec.code).ok_or_else(|| {
                        format!("account {} exists but its document key is unknown", rec.code)
                    })?;
                    let mut fields = serde_json::Map::new();
                    fields.insert("name".to_string(), json!(rec.name));
                    fields.insert(
                        "kind".to_string(),
                        serde_json::to_value(rec.kind).unwrap_or(JsonValue::Null),
                    );
                    Ok(Planned {
                        row,
                        code: rec.code.clone(),
                        name: rec.name.clone(),
                        target: AccountRef::Account(existing.id),
                        write: PlannedWrite::Update,
                        opening_balance: None,
                        op: BatchOp::Update {
                            collection: collections::ACCOUNTS.to_string(),
                            id: doc_id,
                            fields,
                        },
                    })
                }
                None => {
                    let account = Account::new(tenant, &rec.code, &rec.name, rec.kind);
                    let body = to_body(&account).map_err(|e| e.to_string())?;
                    Ok(Planned {
                        row,
                        code: rec.code.clone(),
                        name: rec.name.clone(),
                        target: AccountRef::Account(account.id),
                        write: PlannedWrite::Create,
                        opening_balance: rec.opening_balance,
                        op: BatchOp::Append {
                            collection: collections::ACCOUNTS.to_string(),
                            body,
                        },
                    })
                }
            },
            TypedRecord::Partner(rec) => match self.session.partner_by_code(&rec.code) {
                Some(existing) => {
                    let doc_id = self.session.partner_doc_id(&rec.code).ok_or_else(|| {
                        format!("partner {} exists but its document key is unknown", rec.code)
                    })?;
                    let mut fields = serde_json::Map::new();
                    fields.insert("name".to_string(), json!(rec.name));
                    fields.insert(
                        "kind".to_string(),
                        serde_json::to_value(rec.kind).unwrap_or(JsonValue::Null),
                    );
                    fields.insert("default_currency".to_string(), json!(rec.default_currency));
                    fields.insert(
                        "contact".to_string(),
                        serde_json::to_value(&rec.contact).unwrap_or(JsonValue::Null),
                    );
                    Ok(Planned {
                        row,
                        code: rec.code.clone(),
                        name: rec.name.clone(),
                        target: AccountRef::Partner(existing.id),
                        write: PlannedWrite::Update,
                        opening_balance: None,
                        op: BatchOp::Update {
                            collection: collections::PARTNERS.to_string(),
                            id: doc_id,
                            fields,
                        },
                    })
                }
                None => {
                    let mut partner = Partner::new(tenant, &rec.code, &rec.name, rec.kind);
                    partner.default_currency = rec.default_currency.clone();
                    partner.contact = rec.contact.clone();
                    let body = to_body(&partner).map_err(|e| e.to_string())?;
                    Ok(Planned {
                        row,
                        code: rec.code.clone(),
                        name: rec.name.clone(),
                        target: AccountRef::Partner(partner.id),
                        write: PlannedWrite::Create,
                        opening_balance: rec.opening_balance,
                        op: BatchOp::Append {
                            collection: collections::PARTNERS.to_string(),
                            body,
                        },
                    })
                }
            },
        }
    }
}

/// Opening balance as a regular balanced transaction: the entity on one
/// side, the opening-balances equity account on the other. A positive
/// amount debits the entity.
fn opening_balance_draft(planned: &Planned, equity: &Account, amount: f64) -> TransactionDraft {
    let magnitude = amount.abs();
    let (entity_side, equity_side) = if amount >= 0.0 {
        (Side::Debit, Side::Credit)
    } else {
        (Side::Credit, Side::Debit)
    };
    TransactionDraft::new(TransactionType::OpeningBalance, &planned.code, Utc::now())
        .line(
            LineDraft::new(planned.target, &planned.name, entity_side, magnitude)
                .with_narration("Opening balance"),
        )
        .line(LineDraft::new(
            AccountRef::Account(equity.id),
            &equity.name,
            equity_side,
            magnitude,
        ))
}
