use chrono::{DateTime, Utc};

/// Opaque id of a row in the remote task list.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ItemId(pub String);

/// Opaque id of a single versioned remote document (e.g. a page).
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DocumentId(pub String);

/// Server-issued version token (etag). Changes on every write; a stale token
/// must never silently overwrite.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct VersionToken(pub String);

/// Reference to the shared remote list (site + list name).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListRef {
    pub site: String,
    pub list: String,
}

/// Task lifecycle status. Pending → Processing → {Complete, Failed}, with
/// Processing → Pending permitted only as crash recovery.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ItemStatus {
    Pending,
    Processing,
    Complete,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "Pending",
            ItemStatus::Processing => "Processing",
            ItemStatus::Complete => "Complete",
            ItemStatus::Failed => "Failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pending" => Some(ItemStatus::Pending),
            "Processing" => Some(ItemStatus::Processing),
            "Complete" => Some(ItemStatus::Complete),
            "Failed" => Some(ItemStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ItemStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A row of the remote task list as observed at query time.
///
/// The version token is good for exactly one conditional write; after any
/// successful write the item must be re-read to act on it again.
#[derive(Clone, Debug)]
pub struct QueueItem {
    pub id: ItemId,
    pub status: ItemStatus,
    pub etag: VersionToken,
    pub heartbeat: Option<DateTime<Utc>>,
    pub notes: Option<String>,
    /// Arbitrary task payload fields, untouched by the coordinator.
    pub payload: serde_json::Value,
}

impl QueueItem {
    /// Whether this Processing item's heartbeat is older than `cutoff`.
    /// A Processing item with no heartbeat at all is treated as stale.
    pub fn is_stale(&self, cutoff: DateTime<Utc>) -> bool {
        if self.status != ItemStatus::Processing {
            return false;
        }
        match self.heartbeat {
            Some(hb) => hb < cutoff,
            None => true,
        }
    }
}

/// Names the sources a binary file can be fetched from. At least one of the
/// two identifiers should be present for the fetch to have a chance.
#[derive(Clone, Debug, Default)]
pub struct FileRef {
    pub primary: Option<String>,
    pub secondary: Option<String>,
}

/// A remote document's content together with the token observed at read time.
#[derive(Clone, Debug)]
pub struct DocumentSnapshot {
    pub content: String,
    pub etag: VersionToken,
}
