use serde_json::Value as JsonValue;

use crate::document::DocumentId;

/// Hard cap the store enforces on grouped operations per atomic call.
pub const MAX_BATCH_OPS: usize = 500;

/// One operation inside a grouped write.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Append {
        collection: String,
        body: JsonValue,
    },
    Update {
        collection: String,
        id: DocumentId,
        fields: serde_json::Map<String, JsonValue>,
    },
    Remove {
        collection: String,
        id: DocumentId,
    },
}

impl BatchOp {
    pub fn collection(&self) -> &str {
        match self {
            BatchOp::Append { collection, .. }
            | BatchOp::Update { collection, .. }
            | BatchOp::Remove { collection, .. } => collection,
        }
    }
}

/// A grouped write of at most `MAX_BATCH_OPS` operations.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, collection: impl Into<String>, body: JsonValue) -> &mut Self {
        self.ops.push(BatchOp::Append {
            collection: collection.into(),
            body,
        });
        self
    }

    pub fn update(
        &mut self,
        collection: impl Into<String>,
        id: DocumentId,
        fields: serde_json::Map<String, JsonValue>,
    ) -> &mut Self {
        self.ops.push(BatchOp::Update {
            collection: collection.into(),
            id,
            fields,
        });
        self
    }

    pub fn remove(&mut self, collection: impl Into<String>, id: DocumentId) -> &mut Self {
        self.ops.push(BatchOp::Remove {
            collection: collection.into(),
            id,
        });
        self
    }

    pub fn from_ops(ops: Vec<BatchOp>) -> Self {
        Self { ops }
    }

    pub fn ops(&self) -> &[BatchOp] {
        &self.ops
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Split an arbitrarily long operation list into store-acceptable
    /// sub-batches: ceil(N / MAX_BATCH_OPS) batches, order preserved.
    pub fn chunked(ops: Vec<BatchOp>) -> Vec<WriteBatch> {
        let mut batches = Vec::with_capacity(ops.len().div_ceil(MAX_BATCH_OPS));
        let mut ops = ops;
        while !ops.is_empty() {
            let rest = ops.split_off(ops.len().min(MAX_BATCH_OPS));
            batches.push(WriteBatch { ops });
            ops = rest;
        }
        batches
    }
}
