//! The worker loop: poll → claim → handle → heartbeat → complete.
//!
//! Each worker is an independent process; everything it shares with other
//! workers lives in the remote list. Losing a claim, seeing an empty poll,
//! or a failed poll cycle are all normal — the loop just waits for the next
//! interval.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use crate::{
    coordinator::TaskCoordinator,
    domain::QueueItem,
    ports::TaskHandler,
    Result,
};

pub struct Worker {
    coordinator: Arc<TaskCoordinator>,
    handler: Arc<dyn TaskHandler>,
    poll_interval: Duration,
}

impl Worker {
    pub fn new(
        coordinator: Arc<TaskCoordinator>,
        handler: Arc<dyn TaskHandler>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            coordinator,
            handler,
            poll_interval,
        }
    }

    /// Run poll cycles until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        println!("[WORKER] starting, polling every {:?}", self.poll_interval);
        loop {
            if cancel.is_cancelled() {
                break;
            }

            match self.run_cycle().await {
                Ok(0) => {}
                Ok(n) => println!("[WORKER] processed {n} items"),
                Err(e) => eprintln!("[WORKER] poll cycle failed: {e}"),
            }

            tokio::select! {
              _ = cancel.cancelled() => break,
              _ = sleep(self.poll_interval) => {}
            }
        }
        println!("[WORKER] stopped");
    }

    /// One poll cycle: claim and process every actionable item we win.
    /// Returns how many items were processed.
    pub async fn run_cycle(&self) -> Result<usize> {
        let items = self.coordinator.poll().await?;
        let mut processed = 0usize;

        for item in items {
            if !self.coordinator.claim(&item.id, &item.etag).await {
                continue;
            }
            self.process(&item).await;
            processed += 1;
        }

        Ok(processed)
    }

    /// Run the handler while heartbeating at a third of the stale threshold,
    /// then record the terminal status. A failed completion write is logged
    /// loudly; the item will be recovered as stale and re-run.
    async fn process(&self, item: &QueueItem) {
        let hb_interval = self.coordinator.stale_threshold() / 3;
        let mut tick = tokio::time::interval(hb_interval);
        tick.tick().await; // the first tick fires immediately

        let work = self.handler.handle(item);
        tokio::pin!(work);

        let outcome = loop {
            tokio::select! {
              res = &mut work => break res,
              _ = tick.tick() => {
                self.coordinator.heartbeat(&item.id).await;
              }
            }
        };

        let finish = match outcome {
            Ok(notes) => self.coordinator.complete(&item.id, &notes).await,
            Err(e) => self.coordinator.fail(&item.id, &format!("{e}")).await,
        };
        if let Err(e) = finish {
            eprintln!(
                "[WORKER] failed to record terminal status for {}: {e}",
                item.id.0
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ItemId, ItemStatus, ListRef, VersionToken};
    use crate::ports::{fields, ItemFilter, ListStore, WriteOutcome};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    #[derive(Clone, Debug)]
    struct Row {
        status: ItemStatus,
        version: u64,
        notes: Option<String>,
    }

    #[derive(Default)]
    struct FakeStore {
        rows: Mutex<HashMap<String, Row>>,
        heartbeats: AtomicUsize,
    }

    impl FakeStore {
        async fn insert_pending(&self, id: &str) {
            self.rows.lock().await.insert(
                id.to_string(),
                Row {
                    status: ItemStatus::Pending,
                    version: 1,
                    notes: None,
                },
            );
        }

        async fn status_of(&self, id: &str) -> ItemStatus {
            self.rows.lock().await.get(id).unwrap().status
        }
    }

    #[async_trait]
    impl ListStore for FakeStore {
        async fn query_items(
            &self,
            _list: &ListRef,
            filter: &ItemFilter,
        ) -> Result<Vec<QueueItem>> {
            let rows = self.rows.lock().await;
            let mut out: Vec<QueueItem> = rows
                .iter()
                .filter(|(_, r)| r.status == filter.status)
                .map(|(id, r)| QueueItem {
                    id: ItemId(id.clone()),
                    status: r.status,
                    etag: VersionToken(format!("v{}", r.version)),
                    heartbeat: None,
                    notes: r.notes.clone(),
                    payload: serde_json::Value::Null,
                })
                .collect();
            out.sort_by(|a, b| a.id.0.cmp(&b.id.0));
            Ok(out)
        }

        async fn get_item(&self, _list: &ListRef, id: &ItemId) -> Result<QueueItem> {
            let rows = self.rows.lock().await;
            let r = rows.get(&id.0).unwrap();
            Ok(QueueItem {
                id: id.clone(),
                status: r.status,
                etag: VersionToken(format!("v{}", r.version)),
                heartbeat: None,
                notes: r.notes.clone(),
                payload: serde_json::Value::Null,
            })
        }

        async fn update_item(
            &self,
            _list: &ListRef,
            id: &ItemId,
            etag: Option<&VersionToken>,
            fields_json: &serde_json::Value,
        ) -> Result<WriteOutcome> {
            let mut rows = self.rows.lock().await;
            let r = rows.get_mut(&id.0).unwrap();
            if let Some(token) = etag {
                if token.0 != format!("v{}", r.version) {
                    return Ok(WriteOutcome::VersionMismatch);
                }
            }
            if let Some(s) = fields_json.get(fields::STATUS).and_then(|v| v.as_str()) {
                r.status = ItemStatus::parse(s).unwrap();
            }
            if let Some(n) = fields_json.get(fields::NOTES).and_then(|v| v.as_str()) {
                r.notes = Some(n.to_string());
            }
            if fields_json.get(fields::HEARTBEAT).is_some() && etag.is_none() {
                self.heartbeats.fetch_add(1, Ordering::SeqCst);
            }
            r.version += 1;
            Ok(WriteOutcome::Applied)
        }
    }

    struct OkHandler;

    #[async_trait]
    impl TaskHandler for OkHandler {
        async fn handle(&self, _item: &QueueItem) -> Result<String> {
            Ok("all done".to_string())
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl TaskHandler for FailingHandler {
        async fn handle(&self, _item: &QueueItem) -> Result<String> {
            Err(crate::Error::Transport("upstream unavailable".to_string()))
        }
    }

    struct SlowHandler;

    #[async_trait]
    impl TaskHandler for SlowHandler {
        async fn handle(&self, _item: &QueueItem) -> Result<String> {
            sleep(Duration::from_secs(40)).await;
            Ok("slow but done".to_string())
        }
    }

    fn worker(store: Arc<FakeStore>, handler: Arc<dyn TaskHandler>) -> Worker {
        let coordinator = Arc::new(TaskCoordinator::new(
            store,
            ListRef {
                site: "s".to_string(),
                list: "l".to_string(),
            },
            Duration::from_secs(30),
        ));
        Worker::new(coordinator, handler, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn cycle_claims_and_completes_pending_items() {
        let store = Arc::new(FakeStore::default());
        store.insert_pending("t1").await;
        store.insert_pending("t2").await;

        let w = worker(store.clone(), Arc::new(OkHandler));
        let n = w.run_cycle().await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.status_of("t1").await, ItemStatus::Complete);
        assert_eq!(store.status_of("t2").await, ItemStatus::Complete);
        let rows = store.rows.lock().await;
        assert_eq!(rows.get("t1").unwrap().notes.as_deref(), Some("all done"));
    }

    #[tokio::test]
    async fn handler_error_marks_item_failed() {
        let store = Arc::new(FakeStore::default());
        store.insert_pending("t1").await;

        let w = worker(store.clone(), Arc::new(FailingHandler));
        w.run_cycle().await.unwrap();
        assert_eq!(store.status_of("t1").await, ItemStatus::Failed);
        let rows = store.rows.lock().await;
        assert!(rows
            .get("t1")
            .unwrap()
            .notes
            .as_deref()
            .unwrap()
            .contains("upstream unavailable"));
    }

    #[tokio::test(start_paused = true)]
    async fn long_handler_gets_heartbeats() {
        let store = Arc::new(FakeStore::default());
        store.insert_pending("t1").await;

        // stale threshold 30s → heartbeat every 10s; the handler takes 40s.
        let w = worker(store.clone(), Arc::new(SlowHandler));
        w.run_cycle().await.unwrap();
        assert_eq!(store.status_of("t1").await, ItemStatus::Complete);
        assert!(
            store.heartbeats.load(Ordering::SeqCst) >= 3,
            "expected periodic heartbeats during slow work, got {}",
            store.heartbeats.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn run_exits_on_cancellation() {
        let store = Arc::new(FakeStore::default());
        let w = worker(store, Arc::new(OkHandler));

        let cancel = CancellationToken::new();
        cancel.cancel();
        // Pre-cancelled token: run must return without waiting a poll interval.
        tokio::time::timeout(Duration::from_secs(1), w.run(cancel))
            .await
            .expect("run did not exit after cancellation");
    }
}
