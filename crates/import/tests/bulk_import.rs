//! End-to-end importer tests against the in-memory store: duplicate
//! handling, kind-mismatch aborts, sub-batch isolation, and the
//! write-then-wait-then-post convergence path.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use keel_core::TenantId;
use keel_import::{BulkImporter, EntityKind, ImportError, RawRecord};
use keel_ledger::{AccountKind, RateTable};
use keel_session::{ConvergenceConfig, LedgerSession, SessionConfig, collections};
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

fn partner_record(code: &str, name: &str, kind: &str) -> RawRecord {
    json!({ "code": code, "name": name, "kind": kind })
        .as_object()
        .unwrap()
        .clone()
}

fn account_record(code: &str, name: &str, kind: &str) -> RawRecord {
    json!({ "code": code, "name": name, "kind": kind })
        .as_object()
        .unwrap()
        .clone()
}

#[tokio::test]
async fn duplicate_natural_keys_are_skipped_and_reported() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant = TenantId::new();
    let session = open_session(store, tenant).await;

    let records = vec![
        partner_record("CUST-1", "Acme", "customer"),
        partner_record("CUST-1", "Acme again", "customer"),
        partner_record("CUST-2", "Globex", "customer"),
    ];

    let result = BulkImporter::new(&session)
        .run(records, EntityKind::Partner)
        .await
        .unwrap();

    assert_eq!(result.success, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.created, 2);
    assert_eq!(result.updated, 0);
    assert_eq!(result.errors.len(), 1);
    assert!(result.errors[0].contains("duplicate"));
    assert!(result.errors[0].contains("CUST-1"));
}

#[tokio::test]
async fn a_batch_of_partners_declared_as_accounts_aborts_before_writing() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantId::new();
    let session = open_session(store.clone(), tenant).await;

    let records: Vec<RawRecord> = (0..10)
        .map(|i| partner_record(&format!("SUP-{i}"), "Supplier", "supplier"))
        .collect();

    let err = BulkImporter::new(&session)
        .run(records, EntityKind::Account)
        .await
        .unwrap_err();
    assert!(matches!(err, ImportError::KindMismatch { .. }));

    // Nothing was written anywhere.
    let filter = FieldFilter::tenant(tenant);
    assert!(store.query_by_field(collections::ACCOUNTS, tenant, &filter).await.unwrap().is_empty());
    assert!(store.query_by_field(collections::PARTNERS, tenant, &filter).await.unwrap().is_empty());
}

#[tokio::test]
async fn non_numeric_opening_balance_is_a_validation_error() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantId::new();
    let session = open_session(store, tenant).await;
    session
        .create_account("3900", "Opening Balances", AccountKind::Equity)
        .await
        .unwrap();

    let mut record = partner_record("CUST-1", "Acme", "customer");
    record.insert("opening_balance".to_string(), json!("a lot"));

    let result = BulkImporter::new(&session)
        .run(vec![record], EntityKind::Partner)
        .await
        .unwrap();
    assert_eq!(result.success, 0);
    assert_eq!(result.failed, 1);
    assert!(result.errors[0].contains("opening_balance"));
}

#[tokio::test]
async fn opening_balances_post_once_and_updates_never_repost() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5)));
    let tenant = TenantId::new();
    let session = open_session(store, tenant).await;
    session
        .create_account("3900", "Opening Balances", AccountKind::Equity)
        .await
        .unwrap();

    let mut customer = partner_record("CUST-1", "Acme", "customer");
    customer.insert("opening_balance".to_string(), json!(150.0));
    let mut supplier = partner_record("SUP-1", "Globex", "supplier");
    supplier.insert("opening_balance".to_string(), json!(-60.0));

    let result = BulkImporter::new(&session)
        .run(vec![customer, supplier], EntityKind::Partner)
        .await
        .unwrap();
    assert_eq!(result.success, 2);
    assert_eq!(result.created, 2);
    assert!(result.errors.is_empty(), "unexpected errors: {:?}", result.errors);

    // Two balanced opening transactions, four entries.
    assert_eq!(session.entries().len(), 4);

    let report = session.project_balances();
    let acme = report.partner_by_code("CUST-1").expect("customer projected");
    assert_eq!(acme.receivable(), 150.0);
    let globex = report.partner_by_code("SUP-1").expect("supplier projected");
    assert_eq!(globex.payable(), 60.0);
    // Equity absorbs the net: 150 credit against 60 debit.
    let equity = report.account_by_code("3900").unwrap();
    assert_eq!(equity.balance, 90.0);

    // Re-import the same rows with a changed name: both resolve to
    // updates, nothing is posted again.
    let mut customer = partner_record("CUST-1", "Acme Holdings", "customer");
    customer.insert("opening_balance".to_string(), json!(150.0));
    let mut supplier = partner_record("SUP-1", "Globex", "supplier");
    supplier.insert("opening_balance".to_string(), json!(-60.0));

    let result = BulkImporter::new(&session)
        .run(vec![customer, supplier], EntityKind::Partner)
        .await
        .unwrap();
    assert_eq!(result.success, 2);
    assert_eq!(result.updated, 2);
    assert_eq!(result.created, 0);
    assert_eq!(session.entries().len(), 4, "updates must not double-post");

    // The field update flows back through the subscription.
    tokio::time::sleep(Duration::from_millis(60)).await;
    let renamed = session.partner_by_code("CUST-1").unwrap();
    assert_eq!(renamed.name, "Acme Holdings");
    assert_eq!(session.project_balances().partner_by_code("CUST-1").unwrap().receivable(), 150.0);
}

#[tokio::test]
async fn large_imports_split_into_capped_sub_batches_with_failure_isolation() {
    let store = Arc::new(InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(2)));
    let tenant = TenantId::new();
    let session = open_session(store.clone(), tenant).await;

    // 1200 creates -> ceil(1200/500) = 3 sub-batches.
    let records: Vec<RawRecord> = (0..1200)
        .map(|i| account_record(&format!("A{i:04}"), &format!("Account {i}"), "asset"))
        .collect();

    // The second grouped write fails; its neighbors must not care.
    store.fail_batch_call(2);

    let result = BulkImporter::new(&session)
        .run(records, EntityKind::Account)
        .await
        .unwrap();

    assert_eq!(result.sub_batches, 3);
    assert_eq!(result.success, 700);
    assert_eq!(result.failed, 500);
    assert_eq!(result.created, 700);
    assert!(result.errors.iter().any(|e| e.contains("sub-batch 2")));

    // Sub-batches 1 and 3 stayed committed.
    let filter = FieldFilter::tenant(tenant);
    let docs = store.query_by_field(collections::ACCOUNTS, tenant, &filter).await.unwrap();
    assert_eq!(docs.len(), 700);
}

#[tokio::test]
async fn empty_batches_are_a_no_op() {
    let store = Arc::new(InMemoryDocumentStore::new());
    let tenant = TenantId::new();
    let session = open_session(store, tenant).await;

    let result = BulkImporter::new(&session)
        .run(Vec::new(), EntityKind::Partner)
        .await
        .unwrap();
    assert_eq!(result.success, 0);
    assert_eq!(result.failed, 0);
    assert_eq!(result.sub_batches, 0);
}
