use thiserror::Error;

use keel_core::DomainError;
use keel_store::StoreError;

/// Session-layer error.
///
/// Domain failures propagate synchronously; store failures on fan-out
/// paths are caught and accumulated into receipts instead of surfacing
/// here. The variants below are the failures a caller must handle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("store operation failed: {0}")]
    Store(#[from] StoreError),

    /// The archival snapshot could not be written; the reversal was
    /// aborted before touching any live entry.
    #[error("archival write failed, reversal aborted: {0}")]
    Archive(StoreError),

    #[error("session state corrupted: {0}")]
    Internal(String),
}
