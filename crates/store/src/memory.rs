use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::debug;

use keel_core::TenantId;

use crate::adapter::{DocumentStore, FieldFilter, SnapshotHandler, StoreError, SubscriptionHandle};
use crate::batch::{BatchOp, WriteBatch, MAX_BATCH_OPS};
use crate::document::{Document, DocumentId, TENANT_FIELD};

struct Subscriber {
    id: u64,
    collection: String,
    tenant_id: TenantId,
    handler: SnapshotHandler,
    active: Arc<AtomicBool>,
}

/// In-memory document store for tests and development.
///
/// Reproduces the semantics the real store is assumed to have: snapshot
/// pushes delivered after an artificial delay (never synchronously with
/// the write acknowledgment), a hard batch cap, rejection of malformed
/// bodies, and tenant-filtered reads. Not optimized for performance.
pub struct InMemoryDocumentStore {
    collections: RwLock<HashMap<String, Vec<Document>>>,
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    next_subscriber_id: AtomicU64,
    snapshot_delay: Duration,
    batch_calls: AtomicU64,
    failing_batch_calls: Mutex<Vec<u64>>,
    failing_writes: Mutex<HashMap<String, usize>>,
}

impl Default for InMemoryDocumentStore {
    fn default() -> Self {
        Self {
            collections: RwLock::new(HashMap::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            next_subscriber_id: AtomicU64::new(1),
            snapshot_delay: Duration::from_millis(10),
            batch_calls: AtomicU64::new(0),
            failing_batch_calls: Mutex::new(Vec::new()),
            failing_writes: Mutex::new(HashMap::new()),
        }
    }
}

impl InMemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the artificial delay between a write and the snapshot
    /// push that makes it observable.
    pub fn with_snapshot_delay(mut self, delay: Duration) -> Self {
        self.snapshot_delay = delay;
        self
    }

    /// Test hook: make the n-th `apply_batch` call (1-based) fail with
    /// `Unavailable`, leaving the store untouched.
    pub fn fail_batch_call(&self, nth: u64) {
        if let Ok(mut calls) = self.failing_batch_calls.lock() {
            calls.push(nth);
        }
    }

    /// Test hook: fail the next `count` single-document writes against
    /// `collection`.
    pub fn fail_next_writes(&self, collection: &str, count: usize) {
        if let Ok(mut failing) = self.failing_writes.lock() {
            *failing.entry(collection.to_string()).or_insert(0) += count;
        }
    }

    fn consume_write_failure(&self, collection: &str) -> bool {
        let Ok(mut failing) = self.failing_writes.lock() else {
            return false;
        };
        match failing.get_mut(collection) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                true
            }
            _ => false,
        }
    }

    fn validate_body(body: &JsonValue, tenant_id: TenantId) -> Result<(), StoreError> {
        let Some(object) = body.as_object() else {
            return Err(StoreError::Malformed(
                "document body must be a JSON object".to_string(),
            ));
        };
        let expected = serde_json::to_value(tenant_id)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        match object.get(TENANT_FIELD) {
            Some(found) if *found == expected => Ok(()),
            Some(_) => Err(StoreError::Malformed(
                "document tenant_id does not match the write's tenant scope".to_string(),
            )),
            None => Err(StoreError::Malformed(format!(
                "document body is missing the {TENANT_FIELD} field"
            ))),
        }
    }

    /// Push the current filtered snapshot to each matching subscriber,
    /// after the artificial delay. Snapshots are computed at notify time
    /// and replace the subscriber's whole slice on arrival.
    fn notify(&self, collection: &str) {
        let snapshot_source = {
            let collections = match self.collections.read() {
                Ok(c) => c,
                Err(_) => return,
            };
            collections.get(collection).cloned().unwrap_or_default()
        };

        let Ok(subscribers) = self.subscribers.lock() else {
            return;
        };
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            debug!(collection, "no runtime, snapshot push skipped");
            return;
        };

        for sub in subscribers.iter().filter(|s| s.collection == collection) {
            let tenant_value = match serde_json::to_value(sub.tenant_id) {
                Ok(v) => v,
                Err(_) => continue,
            };
            let snapshot: Vec<Document> = snapshot_source
                .iter()
                .filter(|d| d.body.get(TENANT_FIELD) == Some(&tenant_value))
                .cloned()
                .collect();

            let handler = sub.handler.clone();
            let active = sub.active.clone();
            let delay = self.snapshot_delay;
            handle.spawn(async move {
                tokio::time::sleep(delay).await;
                if active.load(Ordering::SeqCst) {
                    handler(snapshot);
                }
            });
        }
    }
}

#[async_trait::async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn append(
        &self,
        collection: &str,
        tenant_id: TenantId,
        body: JsonValue,
    ) -> Result<DocumentId, StoreError> {
        if self.consume_write_failure(collection) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure on {collection}"
            )));
        }
        Self::validate_body(&body, tenant_id)?;

        let id = DocumentId::generate();
        {
            let mut collections = self
                .collections
                .write()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            collections
                .entry(collection.to_string())
                .or_default()
                .push(Document {
                    id: id.clone(),
                    body,
                });
        }
        self.notify(collection);
        Ok(id)
    }

    async fn update_fields(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: serde_json::Map<String, JsonValue>,
    ) -> Result<(), StoreError> {
        if self.consume_write_failure(collection) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure on {collection}"
            )));
        }
        {
            let mut collections = self
                .collections
                .write()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            let docs = collections
                .get_mut(collection)
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.clone(),
                })?;
            let doc = docs
                .iter_mut()
                .find(|d| &d.id == id)
                .ok_or_else(|| StoreError::NotFound {
                    collection: collection.to_string(),
                    id: id.clone(),
                })?;
            let Some(object) = doc.body.as_object_mut() else {
                return Err(StoreError::Malformed(format!(
                    "document {id} body is not an object"
                )));
            };
            for (key, value) in fields {
                object.insert(key, value);
            }
        }
        self.notify(collection);
        Ok(())
    }

    async fn remove_document(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError> {
        if self.consume_write_failure(collection) {
            return Err(StoreError::Unavailable(format!(
                "injected write failure on {collection}"
            )));
        }
        let removed = {
            let mut collections = self
                .collections
                .write()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            match collections.get_mut(collection) {
                Some(docs) => {
                    let before = docs.len();
                    docs.retain(|d| &d.id != id);
                    docs.len() != before
                }
                None => false,
            }
        };
        if removed {
            self.notify(collection);
        } else {
            debug!(collection, %id, "remove of absent document is a no-op");
        }
        Ok(())
    }

    async fn query_by_field(
        &self,
        collection: &str,
        tenant_id: TenantId,
        filter: &FieldFilter,
    ) -> Result<Vec<Document>, StoreError> {
        let tenant_value = serde_json::to_value(tenant_id)
            .map_err(|e| StoreError::Serialize(e.to_string()))?;
        let collections = self
            .collections
            .read()
            .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
        Ok(collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|d| d.body.get(TENANT_FIELD) == Some(&tenant_value))
                    .filter(|d| filter.matches(&d.body))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn apply_batch(&self, batch: WriteBatch) -> Result<Vec<DocumentId>, StoreError> {
        let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Ok(calls) = self.failing_batch_calls.lock() {
            if calls.contains(&call) {
                return Err(StoreError::Unavailable(format!(
                    "injected failure for batch call {call}"
                )));
            }
        }

        if batch.len() > MAX_BATCH_OPS {
            return Err(StoreError::BatchTooLarge(batch.len()));
        }
        if batch.is_empty() {
            return Ok(vec![]);
        }

        let ops = batch.into_ops();

        // Validation pass: the grouped call is atomic, so nothing may be
        // applied unless everything will succeed. All appended documents
        // must target one tenant.
        let mut batch_tenant: Option<JsonValue> = None;
        {
            let collections = self
                .collections
                .read()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            for op in &ops {
                match op {
                    BatchOp::Append { body, .. } => {
                        let Some(object) = body.as_object() else {
                            return Err(StoreError::Malformed(
                                "document body must be a JSON object".to_string(),
                            ));
                        };
                        let Some(tenant) = object.get(TENANT_FIELD) else {
                            return Err(StoreError::Malformed(format!(
                                "document body is missing the {TENANT_FIELD} field"
                            )));
                        };
                        match &batch_tenant {
                            None => batch_tenant = Some(tenant.clone()),
                            Some(expected) if expected == tenant => {}
                            Some(_) => {
                                return Err(StoreError::Malformed(
                                    "batch contains documents for multiple tenants".to_string(),
                                ));
                            }
                        }
                    }
                    BatchOp::Update { collection, id, .. } => {
                        let exists = collections
                            .get(collection)
                            .is_some_and(|docs| docs.iter().any(|d| &d.id == id));
                        if !exists {
                            return Err(StoreError::NotFound {
                                collection: collection.clone(),
                                id: id.clone(),
                            });
                        }
                    }
                    BatchOp::Remove { .. } => {}
                }
            }
        }

        // Mutation pass.
        let mut appended = Vec::new();
        let mut touched: Vec<String> = Vec::new();
        {
            let mut collections = self
                .collections
                .write()
                .map_err(|_| StoreError::Unavailable("store lock poisoned".to_string()))?;
            for op in ops {
                if !touched.contains(&op.collection().to_string()) {
                    touched.push(op.collection().to_string());
                }
                match op {
                    BatchOp::Append { collection, body } => {
                        let id = DocumentId::generate();
                        collections.entry(collection).or_default().push(Document {
                            id: id.clone(),
                            body,
                        });
                        appended.push(id);
                    }
                    BatchOp::Update {
                        collection,
                        id,
                        fields,
                    } => {
                        if let Some(doc) = collections
                            .get_mut(&collection)
                            .and_then(|docs| docs.iter_mut().find(|d| d.id == id))
                        {
                            if let Some(object) = doc.body.as_object_mut() {
                                for (key, value) in fields {
                                    object.insert(key, value);
                                }
                            }
                        }
                    }
                    BatchOp::Remove { collection, id } => {
                        if let Some(docs) = collections.get_mut(&collection) {
                            docs.retain(|d| d.id != id);
                        }
                    }
                }
            }
        }

        for collection in touched {
            self.notify(&collection);
        }
        Ok(appended)
    }

    fn subscribe(
        &self,
        collection: &str,
        tenant_id: TenantId,
        handler: SnapshotHandler,
    ) -> SubscriptionHandle {
        let id = self.next_subscriber_id.fetch_add(1, Ordering::SeqCst);
        let active = Arc::new(AtomicBool::new(true));

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.push(Subscriber {
                id,
                collection: collection.to_string(),
                tenant_id,
                handler,
                active: active.clone(),
            });
        }

        // Initial snapshot, delivered with the same lag as any other.
        self.notify(collection);

        let subscribers = self.subscribers.clone();
        SubscriptionHandle::new(move || {
            active.store(false, Ordering::SeqCst);
            if let Ok(mut subscribers) = subscribers.lock() {
                subscribers.retain(|s| s.id != id);
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn body_for(tenant: TenantId, code: &str) -> JsonValue {
        json!({ "tenant_id": tenant, "code": code })
    }

    #[tokio::test]
    async fn append_and_query_are_tenant_scoped() {
        let store = InMemoryDocumentStore::new();
        let us = TenantId::new();
        let them = TenantId::new();

        store.append("accounts", us, body_for(us, "1000")).await.unwrap();
        store.append("accounts", them, body_for(them, "1000")).await.unwrap();

        let filter = FieldFilter::new("code", json!("1000"));
        let ours = store.query_by_field("accounts", us, &filter).await.unwrap();
        assert_eq!(ours.len(), 1);
    }

    #[tokio::test]
    async fn mismatched_tenant_body_is_rejected() {
        let store = InMemoryDocumentStore::new();
        let us = TenantId::new();
        let them = TenantId::new();
        let err = store.append("accounts", us, body_for(them, "1000")).await.unwrap_err();
        assert!(matches!(err, StoreError::Malformed(_)));
    }

    #[tokio::test]
    async fn update_merges_and_remove_is_idempotent() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();
        let id = store.append("accounts", tenant, body_for(tenant, "1000")).await.unwrap();

        let mut fields = serde_json::Map::new();
        fields.insert("name".to_string(), json!("Cash"));
        store.update_fields("accounts", &id, fields).await.unwrap();

        let filter = FieldFilter::new("name", json!("Cash"));
        assert_eq!(store.query_by_field("accounts", tenant, &filter).await.unwrap().len(), 1);

        store.remove_document("accounts", &id).await.unwrap();
        store.remove_document("accounts", &id).await.unwrap();
        assert!(store.query_by_field("accounts", tenant, &filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn snapshots_arrive_after_the_write_acknowledgment() {
        let store = InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(20));
        let tenant = TenantId::new();

        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let _sub = store.subscribe(
            "accounts",
            tenant,
            Arc::new(move |snapshot: Vec<Document>| sink.lock().unwrap().push(snapshot.len())),
        );

        store.append("accounts", tenant, body_for(tenant, "1000")).await.unwrap();
        // Acknowledged, but not yet observable.
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(60)).await;
        let delivered = seen.lock().unwrap().clone();
        assert_eq!(delivered.last(), Some(&1));
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let store = InMemoryDocumentStore::new().with_snapshot_delay(Duration::from_millis(5));
        let tenant = TenantId::new();

        let seen: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let sub = store.subscribe(
            "accounts",
            tenant,
            Arc::new(move |snapshot: Vec<Document>| sink.lock().unwrap().push(snapshot.len())),
        );
        sub.unsubscribe();

        store.append("accounts", tenant, body_for(tenant, "1000")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn oversized_batches_are_rejected_whole() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();

        let mut batch = WriteBatch::new();
        for i in 0..(MAX_BATCH_OPS + 1) {
            batch.append("accounts", body_for(tenant, &format!("{i}")));
        }
        let err = store.apply_batch(batch).await.unwrap_err();
        assert!(matches!(err, StoreError::BatchTooLarge(_)));

        let filter = FieldFilter::new("code", json!("0"));
        assert!(store.query_by_field("accounts", tenant, &filter).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn injected_batch_failure_leaves_store_untouched() {
        let store = InMemoryDocumentStore::new();
        let tenant = TenantId::new();
        store.fail_batch_call(1);

        let mut batch = WriteBatch::new();
        batch.append("accounts", body_for(tenant, "1000"));
        assert!(matches!(
            store.apply_batch(batch.clone()).await,
            Err(StoreError::Unavailable(_))
        ));

        // Second call succeeds.
        let ids = store.apply_batch(batch).await.unwrap();
        assert_eq!(ids.len(), 1);
    }
}
