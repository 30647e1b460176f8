//! Hexagonal ports for the remote store.
//!
//! The core never talks HTTP directly; each remote capability is a narrow
//! trait implemented by an adapter crate (and by fakes in tests). Conditional
//! writes return `WriteOutcome` so a lost version-token race is a value, not
//! an error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    domain::{DocumentId, DocumentSnapshot, ItemId, ItemStatus, ListRef, QueueItem, VersionToken},
    Result,
};

/// Outcome of a conditional (If-Match) write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The write was applied; the supplied token matched.
    Applied,
    /// The resource moved on since the token was observed (HTTP 412).
    VersionMismatch,
}

/// Filter for querying the remote list: status equality, optionally narrowed
/// to items whose heartbeat is older than a cutoff.
#[derive(Clone, Debug)]
pub struct ItemFilter {
    pub status: ItemStatus,
    pub heartbeat_before: Option<DateTime<Utc>>,
}

impl ItemFilter {
    pub fn with_status(status: ItemStatus) -> Self {
        Self {
            status,
            heartbeat_before: None,
        }
    }

    pub fn stale_processing(cutoff: DateTime<Utc>) -> Self {
        Self {
            status: ItemStatus::Processing,
            heartbeat_before: Some(cutoff),
        }
    }
}

/// Canonical field names the coordinator writes. Adapters map these onto the
/// remote column names.
pub mod fields {
    pub const STATUS: &str = "status";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const NOTES: &str = "notes";
    pub const COMPLETED_AT: &str = "completed_at";
}

/// Port for the shared remote task list.
#[async_trait]
pub trait ListStore: Send + Sync {
    /// Query items matching `filter`, each tagged with its version token.
    async fn query_items(&self, list: &ListRef, filter: &ItemFilter) -> Result<Vec<QueueItem>>;

    /// Re-read a single item (used to pick up a fresh token after a write).
    async fn get_item(&self, list: &ListRef, id: &ItemId) -> Result<QueueItem>;

    /// Partial update of an item's fields. With `etag` the write is
    /// conditional and a token mismatch yields `VersionMismatch`; without it
    /// the write is unconditional and always `Applied` on success.
    async fn update_item(
        &self,
        list: &ListRef,
        id: &ItemId,
        etag: Option<&VersionToken>,
        fields: &serde_json::Value,
    ) -> Result<WriteOutcome>;
}

/// Port for a single versioned remote document.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn read(&self, doc: &DocumentId) -> Result<DocumentSnapshot>;

    /// Conditional replace of the document body.
    async fn write(
        &self,
        doc: &DocumentId,
        etag: &VersionToken,
        content: &str,
    ) -> Result<WriteOutcome>;
}

/// Port for downloading binary content from one store.
///
/// Throttling must surface as `Error::Remote { status: 429, .. }` so the
/// fetcher can open its circuit immediately.
#[async_trait]
pub trait BinaryFetcher: Send + Sync {
    async fn download(&self, reference: &str) -> Result<Vec<u8>>;
}

/// Port for the business work done on a claimed item.
///
/// `Ok(notes)` marks the item Complete with those notes; `Err` marks it
/// Failed with the error text.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, item: &QueueItem) -> Result<String>;
}
