use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::adapter::StoreError;

/// Field every persisted document must carry; the mandatory scoping
/// filter on queries and subscriptions rides on it.
pub const TENANT_FIELD: &str = "tenant_id";

/// Store-generated document key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DocumentId(String);

impl DocumentId {
    /// Generate a fresh key (UUIDv7, time-ordered).
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for DocumentId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// A stored document: generated key plus JSON object body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: DocumentId,
    pub body: JsonValue,
}

/// Serialize a domain value into a document body.
///
/// The store rejects undefined-like sentinel values; serialization
/// through the JSON model substitutes explicit null for anything the
/// model cannot represent (absent optionals, non-finite floats), so a
/// body produced here is always store-acceptable. Non-object bodies are
/// rejected up front.
pub fn to_body<T: Serialize>(value: &T) -> Result<JsonValue, StoreError> {
    let body = serde_json::to_value(value).map_err(|e| StoreError::Serialize(e.to_string()))?;
    if !body.is_object() {
        return Err(StoreError::Malformed(
            "document body must be a JSON object".to_string(),
        ));
    }
    Ok(body)
}

/// Deserialize a document body back into a domain value.
pub fn from_body<T: DeserializeOwned>(doc: &Document) -> Result<T, StoreError> {
    serde_json::from_value(doc.body.clone()).map_err(|e| {
        StoreError::Malformed(format!("document {}: {}", doc.id, e))
    })
}
