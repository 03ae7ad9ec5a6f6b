use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use thiserror::Error;

use keel_core::TenantId;

use crate::batch::WriteBatch;
use crate::document::{Document, DocumentId};

/// Store operation error.
///
/// These are infrastructure failures, caught at call sites and
/// accumulated into user-facing reports rather than propagated as
/// panics or silent drops.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: DocumentId },

    #[error("malformed document: {0}")]
    Malformed(String),

    #[error("batch exceeds the store operation cap: {0} operations")]
    BatchTooLarge(usize),

    #[error("backing store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialize(String),
}

/// Equality filter on a single document field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: JsonValue,
}

impl FieldFilter {
    pub fn new(field: impl Into<String>, value: JsonValue) -> Self {
        Self {
            field: field.into(),
            value,
        }
    }

    /// The mandatory tenant scoping filter.
    pub fn tenant(tenant_id: TenantId) -> Self {
        let value = serde_json::to_value(tenant_id).unwrap_or(JsonValue::Null);
        Self::new(crate::document::TENANT_FIELD, value)
    }

    pub fn matches(&self, body: &JsonValue) -> bool {
        body.get(&self.field) == Some(&self.value)
    }
}

/// Callback receiving a full filtered snapshot of a collection.
///
/// Snapshot semantics are replace, not merge: each delivery is the
/// complete current slice for the subscription's tenant, and handlers
/// must be idempotent because deliveries lag writes by an unspecified,
/// variable delay.
pub type SnapshotHandler = Arc<dyn Fn(Vec<Document>) + Send + Sync>;

/// Handle returned by `subscribe`; dropping it (or calling
/// `unsubscribe`) cancels delivery.
pub struct SubscriptionHandle {
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl SubscriptionHandle {
    pub fn new(cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            cancel: Some(Box::new(cancel)),
        }
    }

    pub fn unsubscribe(mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
    }
}

impl core::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("active", &self.cancel.is_some())
            .finish()
    }
}

/// Thin interface to the externally supplied document store.
///
/// Every read and subscription carries the mandatory tenant scoping
/// filter; writes carry the tenant inside the document body
/// (`TENANT_FIELD`). The store offers no cross-document transactions
/// beyond `apply_batch`, which groups at most `MAX_BATCH_OPS`
/// operations into one atomic call.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Append a new document; the store assigns and returns its key.
    async fn append(
        &self,
        collection: &str,
        tenant_id: TenantId,
        body: JsonValue,
    ) -> Result<DocumentId, StoreError>;

    /// Merge the given fields into an existing document.
    async fn update_fields(
        &self,
        collection: &str,
        id: &DocumentId,
        fields: serde_json::Map<String, JsonValue>,
    ) -> Result<(), StoreError>;

    /// Remove a document. Removing an already-absent document is a no-op.
    async fn remove_document(&self, collection: &str, id: &DocumentId) -> Result<(), StoreError>;

    /// All documents in `collection` for `tenant_id` matching `filter`.
    async fn query_by_field(
        &self,
        collection: &str,
        tenant_id: TenantId,
        filter: &FieldFilter,
    ) -> Result<Vec<Document>, StoreError>;

    /// Apply one grouped batch atomically. Fails without side effects if
    /// the batch exceeds the operation cap or any operation is invalid.
    /// Returns the keys assigned to appended documents, in order.
    async fn apply_batch(&self, batch: WriteBatch) -> Result<Vec<DocumentId>, StoreError>;

    /// Subscribe to snapshot pushes for one tenant's slice of a
    /// collection. Delivery lags writes by an unspecified non-zero
    /// delay; write acknowledgment and snapshot arrival are not
    /// causally linked on the client.
    fn subscribe(
        &self,
        collection: &str,
        tenant_id: TenantId,
        handler: SnapshotHandler,
    ) -> SubscriptionHandle;
}
