//! `keel-import` — convergence-aware bulk import.
//!
//! Takes externally supplied raw records (spreadsheet rows, migration
//! dumps), validates them through a schema per entity kind, partitions
//! them into creates and updates against the session's projection,
//! writes them in store-capped sub-batches, and waits for its own
//! writes to become locally observable before posting the dependent
//! opening-balance transactions. Partial success is the normal outcome:
//! the result reports per-record errors instead of rolling back.

pub mod importer;
pub mod record;

pub use importer::{BulkImporter, ImportConfig, ImportError, ImportResult};
pub use record::{
    AccountRecord, EntityKind, PartnerRecord, RawRecord, TypedRecord, detect_kind_mismatch,
    validate_record, KIND_MISMATCH_THRESHOLD,
};
