use serde::{Deserialize, Serialize};

/// Which cached slice a pending write will eventually appear in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackedCollection {
    /// Keys are entry ids.
    Entries,
    /// Keys are account codes.
    Accounts,
    /// Keys are partner codes.
    Partners,
}

/// Token for a fan-out of writes whose local visibility is not implied
/// by the write acknowledgment.
///
/// The store acknowledges writes before the subscription feed reflects
/// them; dependent logic holds one of these and awaits visibility
/// explicitly instead of scattering sleep/retry loops across call
/// sites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingWrite {
    pub collection: TrackedCollection,
    pub keys: Vec<String>,
}

impl PendingWrite {
    pub fn new(collection: TrackedCollection, keys: Vec<String>) -> Self {
        Self { collection, keys }
    }

    pub fn entries(keys: impl IntoIterator<Item = String>) -> Self {
        Self::new(TrackedCollection::Entries, keys.into_iter().collect())
    }

    pub fn accounts(keys: impl IntoIterator<Item = String>) -> Self {
        Self::new(TrackedCollection::Accounts, keys.into_iter().collect())
    }

    pub fn partners(keys: impl IntoIterator<Item = String>) -> Self {
        Self::new(TrackedCollection::Partners, keys.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Outcome of awaiting a pending write.
///
/// Timing out is an observable, reportable state — not an error. The
/// write itself was already acknowledged; only local observability is
/// in question.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Visibility {
    Converged,
    TimedOut { missing: Vec<String> },
}

impl Visibility {
    pub fn converged(&self) -> bool {
        matches!(self, Visibility::Converged)
    }
}
