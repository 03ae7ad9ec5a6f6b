use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::time::{Instant, sleep};
use tracing::warn;

use keel_core::{AccountId, DomainError, PartnerId, TenantId};
use keel_ledger::{
    Account, AccountKind, BalancePolicy, BalanceReport, LedgerEntry, LedgerLog, Partner,
    PartnerKind, RateTable, TransactionDraft, TransactionId, balance_gap, check_balanced, project,
};
use keel_store::{
    Document, DocumentId, DocumentStore, FieldFilter, SnapshotHandler, SubscriptionHandle,
    from_body, to_body,
};

use crate::config::SessionConfig;
use crate::error::SessionError;
use crate::pending::{PendingWrite, TrackedCollection, Visibility};

/// Store collection names used by the ledger module.
pub mod collections {
    pub const ENTRIES: &str = "ledger_entries";
    pub const ACCOUNTS: &str = "accounts";
    pub const PARTNERS: &str = "partners";
    pub const ARCHIVE: &str = "archived_transactions";
}

/// Result of a post: the realized entries, plus a visibility token and
/// any store failures accumulated during fan-out.
#[derive(Debug)]
pub struct PostReceipt {
    pub transaction_id: TransactionId,
    pub entries: Vec<LedgerEntry>,
    pub pending: PendingWrite,
    /// Per-entry persist failures. Local state keeps the entries; the
    /// caller decides whether to retry the persists.
    pub store_errors: Vec<String>,
}

/// Shared cache for one tenant: the entry log, the account/partner
/// slices, what the store feed has actually shown us, and the balance
/// report derived from it all.
pub(crate) struct SessionState {
    tenant_id: TenantId,
    log: RwLock<LedgerLog>,
    accounts: RwLock<Vec<Account>>,
    partners: RwLock<Vec<Partner>>,
    account_docs: RwLock<HashMap<String, DocumentId>>,
    partner_docs: RwLock<HashMap<String, DocumentId>>,
    /// Keys observed via remote reads (pre-fetch or snapshot push), per
    /// tracked collection. Local optimistic writes do NOT land here;
    /// convergence polling consults these sets only.
    seen_entries: RwLock<HashSet<String>>,
    seen_accounts: RwLock<HashSet<String>>,
    seen_partners: RwLock<HashSet<String>>,
    report: RwLock<BalanceReport>,
}

impl SessionState {
    fn new(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            log: RwLock::new(LedgerLog::new(tenant_id)),
            accounts: RwLock::new(Vec::new()),
            partners: RwLock::new(Vec::new()),
            account_docs: RwLock::new(HashMap::new()),
            partner_docs: RwLock::new(HashMap::new()),
            seen_entries: RwLock::new(HashSet::new()),
            seen_accounts: RwLock::new(HashSet::new()),
            seen_partners: RwLock::new(HashSet::new()),
            report: RwLock::new(BalanceReport::default()),
        }
    }

    /// Recompute the report by full replay of the cached log.
    fn rebuild_report(&self) {
        let report = {
            let (Ok(log), Ok(accounts), Ok(partners)) =
                (self.log.read(), self.accounts.read(), self.partners.read())
            else {
                warn!("state lock poisoned, projection rebuild skipped");
                return;
            };
            project(log.entries(), &accounts, &partners)
        };
        if let Ok(mut slot) = self.report.write() {
            *slot = report;
        }
    }

    /// Snapshot callback for the entries collection: replace the whole
    /// slice, never merge, then replay in full.
    fn replace_entries(&self, docs: &[Document]) {
        let mut entries = Vec::with_capacity(docs.len());
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            match from_body::<LedgerEntry>(doc) {
                Ok(entry) => {
                    seen.insert(entry.id.to_string());
                    entries.push(entry);
                }
                Err(e) => warn!(error = %e, "undecodable ledger entry skipped"),
            }
        }
        if let Ok(mut log) = self.log.write() {
            log.replace(entries);
        }
        if let Ok(mut slot) = self.seen_entries.write() {
            *slot = seen;
        }
        self.rebuild_report();
    }

    fn replace_accounts(&self, docs: &[Document]) {
        let mut accounts = Vec::with_capacity(docs.len());
        let mut ids = HashMap::with_capacity(docs.len());
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            match from_body::<Account>(doc) {
                Ok(account) if account.tenant_id == self.tenant_id => {
                    ids.insert(account.code.clone(), doc.id.clone());
                    seen.insert(account.code.clone());
                    accounts.push(account);
                }
                Ok(_) => warn!("snapshot delivered an account for another tenant, dropped"),
                Err(e) => warn!(error = %e, "undecodable account document skipped"),
            }
        }
        if let Ok(mut slot) = self.accounts.write() {
            *slot = accounts;
        }
        if let Ok(mut slot) = self.account_docs.write() {
            *slot = ids;
        }
        if let Ok(mut slot) = self.seen_accounts.write() {
            *slot = seen;
        }
        self.rebuild_report();
    }

    fn replace_partners(&self, docs: &[Document]) {
        let mut partners = Vec::with_capacity(docs.len());
        let mut ids = HashMap::with_capacity(docs.len());
        let mut seen = HashSet::with_capacity(docs.len());
        for doc in docs {
            match from_body::<Partner>(doc) {
                Ok(partner) if partner.tenant_id == self.tenant_id => {
                    ids.insert(partner.code.clone(), doc.id.clone());
                    seen.insert(partner.code.clone());
                    partners.push(partner);
                }
                Ok(_) => warn!("snapshot delivered a partner for another tenant, dropped"),
                Err(e) => warn!(error = %e, "undecodable partner document skipped"),
            }
        }
        if let Ok(mut slot) = self.partners.write() {
            *slot = partners;
        }
        if let Ok(mut slot) = self.partner_docs.write() {
            *slot = ids;
        }
        if let Ok(mut slot) = self.seen_partners.write() {
            *slot = seen;
        }
        self.rebuild_report();
    }
}

/// Per-tenant ledger context with an explicit open/close lifecycle.
///
/// Opening a session pre-fetches the tenant's slices and subscribes to
/// their change feeds; closing it unsubscribes. All ledger operations
/// go through a session — there is no ambient tenant state.
pub struct LedgerSession<S: DocumentStore> {
    store: Arc<S>,
    tenant_id: TenantId,
    config: SessionConfig,
    rates: RateTable,
    state: Arc<SessionState>,
    subscriptions: Vec<SubscriptionHandle>,
}

impl<S: DocumentStore> LedgerSession<S> {
    pub async fn open(
        store: Arc<S>,
        tenant_id: TenantId,
        config: SessionConfig,
        rates: RateTable,
    ) -> Result<Self, SessionError> {
        let state = Arc::new(SessionState::new(tenant_id));
        let filter = FieldFilter::tenant(tenant_id);

        // Warm the cache with a direct read so callers do not have to
        // wait out the first snapshot push.
        let docs = store
            .query_by_field(collections::ACCOUNTS, tenant_id, &filter)
            .await?;
        state.replace_accounts(&docs);
        let docs = store
            .query_by_field(collections::PARTNERS, tenant_id, &filter)
            .await?;
        state.replace_partners(&docs);
        let docs = store
            .query_by_field(collections::ENTRIES, tenant_id, &filter)
            .await?;
        state.replace_entries(&docs);

        // Change feeds: each handler replaces exactly its own slice.
        let subscriptions = vec![
            store.subscribe(collections::ACCOUNTS, tenant_id, {
                let state = state.clone();
                Arc::new(move |docs: Vec<Document>| state.replace_accounts(&docs)) as SnapshotHandler
            }),
            store.subscribe(collections::PARTNERS, tenant_id, {
                let state = state.clone();
                Arc::new(move |docs: Vec<Document>| state.replace_partners(&docs)) as SnapshotHandler
            }),
            store.subscribe(collections::ENTRIES, tenant_id, {
                let state = state.clone();
                Arc::new(move |docs: Vec<Document>| state.replace_entries(&docs)) as SnapshotHandler
            }),
        ];

        Ok(Self {
            store,
            tenant_id,
            config,
            rates,
            state,
            subscriptions,
        })
    }

    /// Unsubscribe from all change feeds and drop the cache.
    pub fn close(mut self) {
        for sub in self.subscriptions.drain(..) {
            sub.unsubscribe();
        }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn rate_table(&self) -> &RateTable {
        &self.rates
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Current derived balances (a clone of the cached report).
    pub fn project_balances(&self) -> BalanceReport {
        self.state
            .report
            .read()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.state
            .log
            .read()
            .map(|log| log.entries().to_vec())
            .unwrap_or_default()
    }

    pub fn entries_for_transaction(&self, transaction_id: &TransactionId) -> Vec<LedgerEntry> {
        self.state
            .log
            .read()
            .map(|log| {
                log.for_transaction(transaction_id)
                    .into_iter()
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn accounts(&self) -> Vec<Account> {
        self.state.accounts.read().map(|a| a.clone()).unwrap_or_default()
    }

    pub fn partners(&self) -> Vec<Partner> {
        self.state.partners.read().map(|p| p.clone()).unwrap_or_default()
    }

    pub fn account_by_code(&self, code: &str) -> Option<Account> {
        self.state
            .accounts
            .read()
            .ok()
            .and_then(|a| a.iter().find(|acc| acc.code == code).cloned())
    }

    pub fn partner_by_code(&self, code: &str) -> Option<Partner> {
        self.state
            .partners
            .read()
            .ok()
            .and_then(|p| p.iter().find(|par| par.code == code).cloned())
    }

    /// Store key of an account document, as last observed remotely.
    pub fn account_doc_id(&self, code: &str) -> Option<DocumentId> {
        self.state
            .account_docs
            .read()
            .ok()
            .and_then(|m| m.get(code).cloned())
    }

    pub fn partner_doc_id(&self, code: &str) -> Option<DocumentId> {
        self.state
            .partner_docs
            .read()
            .ok()
            .and_then(|m| m.get(code).cloned())
    }

    /// Post with the session's default balance policy.
    pub async fn post_transaction(
        &self,
        draft: &TransactionDraft,
    ) -> Result<PostReceipt, SessionError> {
        self.post_transaction_with(self.config.balance_policy, draft)
            .await
    }

    /// Post a transaction under an explicit balance policy.
    ///
    /// Realizes the draft into entries, applies the balance contract,
    /// appends to the local log, folds the delta into the cached report
    /// (the O(new entries) path), then fans the entries out to the
    /// store. Entries are acknowledged independently; per-entry
    /// failures are accumulated on the receipt, never dropped.
    pub async fn post_transaction_with(
        &self,
        policy: BalancePolicy,
        draft: &TransactionDraft,
    ) -> Result<PostReceipt, SessionError> {
        let entries = draft.realize(self.tenant_id, &self.rates)?;
        let transaction_id = draft.transaction_id();

        if let Err(violation) = check_balanced(&entries) {
            match policy {
                BalancePolicy::Enforce => return Err(violation.into()),
                BalancePolicy::Advisory => warn!(
                    transaction = %transaction_id,
                    gap = balance_gap(&entries),
                    "posting unbalanced transaction under advisory policy"
                ),
            }
        }

        {
            let mut log = self
                .state
                .log
                .write()
                .map_err(|_| SessionError::Internal("state lock poisoned".to_string()))?;
            log.append(entries.clone())?;
        }
        if let Ok(mut report) = self.state.report.write() {
            report.absorb(&entries);
        }

        let mut store_errors = Vec::new();
        for entry in &entries {
            let persisted = to_body(entry)
                .map_err(SessionError::from)
                .map(|body| (entry, body));
            match persisted {
                Ok((entry, body)) => {
                    if let Err(e) = self
                        .store
                        .append(collections::ENTRIES, self.tenant_id, body)
                        .await
                    {
                        warn!(entry = %entry.id, error = %e, "ledger entry persist failed");
                        store_errors.push(format!("entry {}: {e}", entry.id));
                    }
                }
                Err(e) => store_errors.push(e.to_string()),
            }
        }

        let pending = PendingWrite::entries(entries.iter().map(|e| e.id.to_string()));
        Ok(PostReceipt {
            transaction_id,
            entries,
            pending,
            store_errors,
        })
    }

    /// Create an account and register it in the local cache.
    pub async fn create_account(
        &self,
        code: &str,
        name: &str,
        kind: AccountKind,
    ) -> Result<Account, SessionError> {
        if self.account_by_code(code).is_some() {
            return Err(DomainError::conflict(format!("account {code} already exists")).into());
        }
        let account = Account::new(self.tenant_id, code, name, kind);
        let body = to_body(&account)?;
        let doc_id = self
            .store
            .append(collections::ACCOUNTS, self.tenant_id, body)
            .await?;

        if let Ok(mut accounts) = self.state.accounts.write() {
            accounts.push(account.clone());
        }
        if let Ok(mut docs) = self.state.account_docs.write() {
            docs.insert(account.code.clone(), doc_id);
        }
        self.state.rebuild_report();
        Ok(account)
    }

    /// Create a partner and register it in the local cache.
    pub async fn create_partner(
        &self,
        code: &str,
        name: &str,
        kind: PartnerKind,
    ) -> Result<Partner, SessionError> {
        if self.partner_by_code(code).is_some() {
            return Err(DomainError::conflict(format!("partner {code} already exists")).into());
        }
        let partner = Partner::new(self.tenant_id, code, name, kind);
        let body = to_body(&partner)?;
        let doc_id = self
            .store
            .append(collections::PARTNERS, self.tenant_id, body)
            .await?;

        if let Ok(mut partners) = self.state.partners.write() {
            partners.push(partner.clone());
        }
        if let Ok(mut docs) = self.state.partner_docs.write() {
            docs.insert(partner.code.clone(), doc_id);
        }
        self.state.rebuild_report();
        Ok(partner)
    }

    /// Copy an account into another tenant: fresh id, zero history, no
    /// lineage. The target tenant's own sessions pick it up via their
    /// subscriptions.
    pub async fn copy_account_to_tenant(
        &self,
        account_id: AccountId,
        target: TenantId,
    ) -> Result<Account, SessionError> {
        let source = self
            .state
            .accounts
            .read()
            .ok()
            .and_then(|a| a.iter().find(|acc| acc.id == account_id).cloned())
            .ok_or(DomainError::NotFound)?;
        let copy = source.copy_to_tenant(target);
        let body = to_body(&copy)?;
        self.store
            .append(collections::ACCOUNTS, target, body)
            .await?;
        Ok(copy)
    }

    /// Copy a partner into another tenant; see `copy_account_to_tenant`.
    pub async fn copy_partner_to_tenant(
        &self,
        partner_id: PartnerId,
        target: TenantId,
    ) -> Result<Partner, SessionError> {
        let source = self
            .state
            .partners
            .read()
            .ok()
            .and_then(|p| p.iter().find(|par| par.id == partner_id).cloned())
            .ok_or(DomainError::NotFound)?;
        let copy = source.copy_to_tenant(target);
        let body = to_body(&copy)?;
        self.store
            .append(collections::PARTNERS, target, body)
            .await?;
        Ok(copy)
    }

    /// Poll until a pending write is observable in the snapshot-fed
    /// cache, with a settle delay and doubling backoff.
    ///
    /// Timing out is not an error: the caller reports it and proceeds.
    pub async fn await_visible(&self, pending: &PendingWrite, timeout: Duration) -> Visibility {
        if pending.is_empty() {
            return Visibility::Converged;
        }
        let convergence = self.config.convergence;
        let started = Instant::now();
        sleep(convergence.settle_delay.min(timeout)).await;

        let mut backoff = convergence.initial_backoff;
        for attempt in 1..=convergence.max_attempts {
            let missing = self.missing_keys(pending);
            if missing.is_empty() {
                return Visibility::Converged;
            }
            if attempt == convergence.max_attempts || started.elapsed() >= timeout {
                warn!(
                    collection = ?pending.collection,
                    missing = missing.len(),
                    "pending write never became locally visible"
                );
                return Visibility::TimedOut { missing };
            }
            let remaining = timeout.saturating_sub(started.elapsed());
            sleep(backoff.min(remaining)).await;
            backoff = backoff.saturating_mul(2);
        }

        Visibility::TimedOut {
            missing: self.missing_keys(pending),
        }
    }

    fn missing_keys(&self, pending: &PendingWrite) -> Vec<String> {
        let seen = match pending.collection {
            TrackedCollection::Entries => &self.state.seen_entries,
            TrackedCollection::Accounts => &self.state.seen_accounts,
            TrackedCollection::Partners => &self.state.seen_partners,
        };
        match seen.read() {
            Ok(seen) => pending
                .keys
                .iter()
                .filter(|k| !seen.contains(*k))
                .cloned()
                .collect(),
            Err(_) => pending.keys.clone(),
        }
    }

    pub(crate) fn rebuild_report(&self) {
        self.state.rebuild_report();
    }

    pub(crate) fn remove_transaction_local(&self, transaction_id: &TransactionId) -> Vec<LedgerEntry> {
        match self.state.log.write() {
            Ok(mut log) => log.remove_transaction(transaction_id),
            Err(_) => Vec::new(),
        }
    }
}
