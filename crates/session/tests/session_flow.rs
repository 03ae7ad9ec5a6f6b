//! End-to-end tests for the per-tenant session: post → project →
//! reverse against the in-memory document store, including the
//! eventual-consistency paths (snapshot lag, convergence polling).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use keel_core::{TenantId, UserId};
use keel_ledger::{
    AccountKind, AccountRef, BalancePolicy, LineDraft, PartnerKind, RateTable, Side,
    TransactionDraft, TransactionType,
};
use keel_session::{
    ConvergenceConfig, LedgerSession, ReversalOutcome, SessionConfig, SessionError, Visibility,
    collections,
};
use keel_store::{DocumentStore, FieldFilter, InMemoryDocumentStore};

fn fast_config() -> SessionConfig {
    SessionConfig::default().with_convergence(ConvergenceConfig {
        max_attempts: 8,
        initial_backoff: Duration::from_millis(10),
        settle_delay: Duration::from_millis(5),
    })
}

async fn open_session(
    store: Arc<InMemoryDocumentStore>,
    tenant: TenantId,
) -> LedgerSession<InMemoryDocumentStore> {
    LedgerSession::open(store, tenant, fast_config(), RateTable::new("USD"))
        .await
        .expect("session opens")
}

fn balanced_draft(
    key: &str,
    debit: (AccountRef, &str),
    credit: (AccountRef, &str),
    amount: f64,
) -> TransactionDraft {
    TransactionDraft::new(TransactionType::Adjustment, key, Utc::now())
        .line(LineDraft::new(debit.0, debit.1, Side::Debit, amount))
        .line(LineDraft::new(credit.0, credit.1, Side::Credit, amount))
}

#[tokio::test]
async fn post_projects_and_converges() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant = TenantId::new();
    let session = open_session(store.clone(), tenant).await;

    let cash = session.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let loan = session.create_account("2100", "Bank Loan", AccountKind::Liability).await.unwrap();

    let receipt = session
        .post_transaction(&balanced_draft(
            "T1",
            (AccountRef::Account(cash.id), "Cash"),
            (AccountRef::Account(loan.id), "Bank Loan"),
            100.0,
        ))
        .await
        .unwrap();
    assert!(receipt.store_errors.is_empty());
    assert_eq!(receipt.entries.len(), 2);

    // Optimistic projection is immediate.
    let report = session.project_balances();
    assert_eq!(report.account(cash.id).unwrap().balance, 100.0);
    assert_eq!(report.account(loan.id).unwrap().balance, 100.0);

    // The write acknowledgment does not imply local observability; the
    // pending-write token does.
    let visibility = session.await_visible(&receipt.pending, Duration::from_secs(2)).await;
    assert_eq!(visibility, Visibility::Converged);

    // After the snapshot replaced the log, balances are unchanged.
    let report = session.project_balances();
    assert_eq!(report.account(cash.id).unwrap().balance, 100.0);
    assert_eq!(session.entries().len(), 2);
}

#[tokio::test]
async fn unbalanced_posts_respect_the_policy() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantId::new();
    let session = open_session(store, tenant).await;

    let cash = session.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let one_sided = TransactionDraft::new(TransactionType::Adjustment, "ADJ-1", Utc::now()).line(
        LineDraft::new(AccountRef::Account(cash.id), "Cash", Side::Debit, 25.0),
    );

    // Session default is Enforce.
    let err = session.post_transaction(&one_sided).await.unwrap_err();
    assert!(matches!(err, SessionError::Domain(_)));
    assert!(session.entries().is_empty());

    // Advisory is an explicit per-call opt-in for one-sided flows.
    let receipt = session
        .post_transaction_with(BalancePolicy::Advisory, &one_sided)
        .await
        .unwrap();
    assert_eq!(receipt.entries.len(), 1);
    session.await_visible(&receipt.pending, Duration::from_secs(2)).await;
    assert_eq!(session.project_balances().account(cash.id).unwrap().balance, 25.0);
}

#[tokio::test]
async fn reversal_restores_balances_and_is_idempotent() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant = TenantId::new();
    let session = open_session(store.clone(), tenant).await;

    let cash = session.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let rent = session.create_account("5100", "Rent", AccountKind::Expense).await.unwrap();

    let keep = session
        .post_transaction(&balanced_draft(
            "KEEP",
            (AccountRef::Account(cash.id), "Cash"),
            (AccountRef::Account(rent.id), "Rent"),
            300.0,
        ))
        .await
        .unwrap();
    let doomed = session
        .post_transaction(&balanced_draft(
            "DOOMED",
            (AccountRef::Account(rent.id), "Rent"),
            (AccountRef::Account(cash.id), "Cash"),
            55.0,
        ))
        .await
        .unwrap();
    session.await_visible(&keep.pending, Duration::from_secs(2)).await;
    session.await_visible(&doomed.pending, Duration::from_secs(2)).await;

    let before = session.project_balances();
    assert_eq!(before.account(cash.id).unwrap().balance, 300.0 - 55.0);

    let actor = UserId::new();
    let outcome = session
        .reverse_transaction(&doomed.transaction_id, "posted in error", actor)
        .await
        .unwrap();
    let receipt = match outcome {
        ReversalOutcome::Reversed(r) => r,
        ReversalOutcome::NothingToReverse => panic!("expected a reversal"),
    };
    assert_eq!(receipt.entries.len(), 2);
    assert!(receipt.store_errors.is_empty());

    // Balances match "DOOMED was never posted".
    let after = session.project_balances();
    assert_eq!(after.account(cash.id).unwrap().balance, 300.0);
    assert_eq!(after.account(rent.id).unwrap().balance, -300.0);

    // Exactly one archive record, durable before deletion.
    let archives = store
        .query_by_field(collections::ARCHIVE, tenant, &FieldFilter::tenant(tenant))
        .await
        .unwrap();
    assert_eq!(archives.len(), 1);

    // Reversing again is a no-op, not a second archive.
    let again = session
        .reverse_transaction(&doomed.transaction_id, "double click", actor)
        .await
        .unwrap();
    assert!(matches!(again, ReversalOutcome::NothingToReverse));
    let archives = store
        .query_by_field(collections::ARCHIVE, tenant, &FieldFilter::tenant(tenant))
        .await
        .unwrap();
    assert_eq!(archives.len(), 1);
}

#[tokio::test]
async fn reversing_an_unknown_transaction_is_a_quiet_no_op() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantId::new();
    let session = open_session(store.clone(), tenant).await;

    let ghost = TransactionDraft::new(TransactionType::Sale, "NEVER", Utc::now()).transaction_id();
    let outcome = session
        .reverse_transaction(&ghost, "nothing here", UserId::new())
        .await
        .unwrap();
    assert!(matches!(outcome, ReversalOutcome::NothingToReverse));

    let archives = store
        .query_by_field(collections::ARCHIVE, tenant, &FieldFilter::tenant(tenant))
        .await
        .unwrap();
    assert!(archives.is_empty());
}

#[tokio::test]
async fn another_session_observes_posts_through_its_subscription() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant = TenantId::new();

    let writer = open_session(store.clone(), tenant).await;
    let cash = writer.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let sales = writer.create_account("4000", "Sales", AccountKind::Revenue).await.unwrap();

    let reader = open_session(store.clone(), tenant).await;

    let receipt = writer
        .post_transaction(&balanced_draft(
            "S1",
            (AccountRef::Account(cash.id), "Cash"),
            (AccountRef::Account(sales.id), "Sales"),
            80.0,
        ))
        .await
        .unwrap();
    assert!(receipt.store_errors.is_empty());

    // The reader session's cache converges via snapshot push alone.
    tokio::time::sleep(Duration::from_millis(100)).await;
    let report = reader.project_balances();
    assert_eq!(report.account(cash.id).unwrap().balance, 80.0);
    assert_eq!(report.account(sales.id).unwrap().balance, 80.0);

    reader.close();
    writer.close();
}

#[tokio::test]
async fn slow_snapshots_time_out_but_do_not_fail_the_post() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_secs(30)));
    let tenant = TenantId::new();
    let config = SessionConfig::default().with_convergence(ConvergenceConfig {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(10),
        settle_delay: Duration::from_millis(5),
    });
    let session = LedgerSession::open(store, tenant, config, RateTable::new("USD"))
        .await
        .unwrap();

    let cash = session.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let loan = session.create_account("2100", "Loan", AccountKind::Liability).await.unwrap();

    let receipt = session
        .post_transaction(&balanced_draft(
            "T1",
            (AccountRef::Account(cash.id), "Cash"),
            (AccountRef::Account(loan.id), "Loan"),
            10.0,
        ))
        .await
        .unwrap();
    assert!(receipt.store_errors.is_empty());

    match session.await_visible(&receipt.pending, Duration::from_millis(120)).await {
        Visibility::TimedOut { missing } => assert_eq!(missing.len(), 2),
        Visibility::Converged => panic!("snapshot cannot have arrived yet"),
    }

    // The write itself stands; local projection already reflects it.
    assert_eq!(session.project_balances().account(cash.id).unwrap().balance, 10.0);
}

#[tokio::test]
async fn copying_to_another_tenant_resets_history() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant_a = TenantId::new();
    let tenant_b = TenantId::new();

    let session_a = open_session(store.clone(), tenant_a).await;
    let cash = session_a.create_account("1000", "Cash", AccountKind::Asset).await.unwrap();
    let sales = session_a.create_account("4000", "Sales", AccountKind::Revenue).await.unwrap();
    let acme = session_a
        .create_partner("CUST-1", "Acme", PartnerKind::Customer)
        .await
        .unwrap();

    let receipt = session_a
        .post_transaction(&balanced_draft(
            "S1",
            (AccountRef::Account(cash.id), "Cash"),
            (AccountRef::Account(sales.id), "Sales"),
            500.0,
        ))
        .await
        .unwrap();
    session_a.await_visible(&receipt.pending, Duration::from_secs(2)).await;

    let cash_copy = session_a.copy_account_to_tenant(cash.id, tenant_b).await.unwrap();
    let acme_copy = session_a.copy_partner_to_tenant(acme.id, tenant_b).await.unwrap();
    assert_ne!(cash_copy.id, cash.id);
    assert_ne!(acme_copy.id, acme.id);

    let session_b = open_session(store.clone(), tenant_b).await;
    let copied = session_b.account_by_code("1000").expect("copy visible in target tenant");
    assert_eq!(copied.id, cash_copy.id);

    // Zero history in the target tenant: balance starts at zero and the
    // source tenant's entries never leak across.
    let report = session_b.project_balances();
    assert_eq!(report.account(cash_copy.id).unwrap().balance, 0.0);
    assert_eq!(report.partner(acme_copy.id).unwrap().balance, 0.0);
    assert!(session_b.entries().is_empty());
}
