//! Task lifecycle against the shared remote list.
//!
//! Conditional writes on the item's version token are the only concurrency
//! control: there is no lock service. Two workers may poll the same Pending
//! item; exactly one claim succeeds and the loser re-polls. Crash recovery is
//! derived state: a Processing item whose heartbeat is older than the stale
//! threshold is presumed abandoned and reset to Pending.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;

use crate::{
    domain::{ItemId, ItemStatus, ListRef, QueueItem, VersionToken},
    ports::{fields, ItemFilter, ListStore, WriteOutcome},
    Result,
};

pub struct TaskCoordinator {
    store: Arc<dyn ListStore>,
    list: ListRef,
    stale_threshold: Duration,
}

impl TaskCoordinator {
    pub fn new(store: Arc<dyn ListStore>, list: ListRef, stale_threshold: Duration) -> Self {
        Self {
            store,
            list,
            stale_threshold,
        }
    }

    pub fn stale_threshold(&self) -> Duration {
        self.stale_threshold
    }

    /// Query actionable items: everything Pending, plus stale Processing
    /// items recovered back to Pending.
    ///
    /// A stale reset that loses its conditional write (another worker got
    /// there first) or fails outright skips the item for this cycle; the
    /// next poll will see it again. After a successful reset the item is
    /// re-read so the caller holds its fresh version token.
    pub async fn poll(&self) -> Result<Vec<QueueItem>> {
        let mut actionable = self
            .store
            .query_items(&self.list, &ItemFilter::with_status(ItemStatus::Pending))
            .await?;

        let cutoff = Utc::now() - chrono::Duration::milliseconds(self.stale_threshold.as_millis() as i64);
        let stale = self
            .store
            .query_items(&self.list, &ItemFilter::stale_processing(cutoff))
            .await?;

        for item in stale {
            if !item.is_stale(cutoff) {
                continue;
            }
            match self.reset_stale(&item).await {
                Ok(Some(fresh)) => {
                    println!("[POLL] recovered stale item {}", item.id.0);
                    actionable.push(fresh);
                }
                Ok(None) => {
                    println!(
                        "[POLL] item {} already touched by another worker, skipping",
                        item.id.0
                    );
                }
                Err(e) => {
                    eprintln!(
                        "[POLL] stale reset failed for {}: {e} (will retry next poll)",
                        item.id.0
                    );
                }
            }
        }

        Ok(actionable)
    }

    async fn reset_stale(&self, item: &QueueItem) -> Result<Option<QueueItem>> {
        let note = recovery_note(item.notes.as_deref());
        let fields = json!({
            fields::STATUS: ItemStatus::Pending.as_str(),
            fields::NOTES: note,
        });

        let outcome = self
            .store
            .update_item(&self.list, &item.id, Some(&item.etag), &fields)
            .await?;

        match outcome {
            WriteOutcome::Applied => {
                let fresh = self.store.get_item(&self.list, &item.id).await?;
                // Another worker can claim in the reset → re-read window;
                // only a still-Pending item is ours to hand out.
                if fresh.status == ItemStatus::Pending {
                    Ok(Some(fresh))
                } else {
                    Ok(None)
                }
            }
            WriteOutcome::VersionMismatch => Ok(None),
        }
    }

    /// Atomically claim an item using the version token observed at poll
    /// time. `false` on a lost race is the expected outcome of two workers
    /// seeing the same item; any other failure is also `false`, logged.
    pub async fn claim(&self, id: &ItemId, token: &VersionToken) -> bool {
        let fields = json!({
            fields::STATUS: ItemStatus::Processing.as_str(),
            fields::HEARTBEAT: Utc::now().to_rfc3339(),
        });

        match self
            .store
            .update_item(&self.list, id, Some(token), &fields)
            .await
        {
            Ok(WriteOutcome::Applied) => {
                println!("[CLAIM] claimed {}", id.0);
                true
            }
            Ok(WriteOutcome::VersionMismatch) => {
                println!("[CLAIM] lost claim race for {}", id.0);
                false
            }
            Err(e) => {
                eprintln!("[CLAIM] claim failed for {}: {e}", id.0);
                false
            }
        }
    }

    /// Best-effort liveness signal. A missed heartbeat only means the item
    /// may look stale sooner than ideal, which the stale reset self-heals.
    pub async fn heartbeat(&self, id: &ItemId) {
        let fields = json!({ fields::HEARTBEAT: Utc::now().to_rfc3339() });
        if let Err(e) = self
            .store
            .update_item(&self.list, id, None, &fields)
            .await
        {
            eprintln!("[HEARTBEAT] heartbeat failed for {}: {e}", id.0);
        }
    }

    /// Mark the item Complete. Failure propagates: a dropped completion
    /// would make the item look abandoned and be re-run.
    pub async fn complete(&self, id: &ItemId, notes: &str) -> Result<()> {
        self.finish(id, ItemStatus::Complete, notes).await
    }

    /// Mark the item Failed with the failure notes.
    pub async fn fail(&self, id: &ItemId, notes: &str) -> Result<()> {
        self.finish(id, ItemStatus::Failed, notes).await
    }

    async fn finish(&self, id: &ItemId, status: ItemStatus, notes: &str) -> Result<()> {
        let fields = json!({
            fields::STATUS: status.as_str(),
            fields::NOTES: notes,
            fields::COMPLETED_AT: Utc::now().to_rfc3339(),
        });
        self.store
            .update_item(&self.list, id, None, &fields)
            .await?;
        Ok(())
    }
}

fn recovery_note(previous: Option<&str>) -> String {
    let line = format!(
        "Reset to Pending after stale heartbeat at {}",
        Utc::now().to_rfc3339()
    );
    match previous {
        Some(prev) if !prev.trim().is_empty() => format!("{prev}\n{line}"),
        _ => line,
    }
}
