//! `keel-store` — adapter boundary to the backing document store.
//!
//! The backing store is externally supplied: a replicated, eventually
//! consistent document database with a change-feed subscription model,
//! no cross-document transactions beyond a capped batch call, and
//! snapshot delivery that lags same-client writes by an unbounded,
//! variable delay. This crate defines the thin `DocumentStore` trait the
//! rest of the system consumes, plus an in-memory implementation for
//! tests and development that reproduces those semantics.

pub mod adapter;
pub mod batch;
pub mod document;
pub mod memory;

pub use adapter::{DocumentStore, FieldFilter, SnapshotHandler, StoreError, SubscriptionHandle};
pub use batch::{BatchOp, WriteBatch, MAX_BATCH_OPS};
pub use document::{Document, DocumentId, from_body, to_body, TENANT_FIELD};
pub use memory::InMemoryDocumentStore;
