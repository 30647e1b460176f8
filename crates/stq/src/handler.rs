//! The work performed on a claimed item: fetch its attachment (if any) and
//! append a line to the shared digest page (if the item names one).

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};

use stq_core::{
    breaker::CircuitState,
    domain::{DocumentId, FileRef, QueueItem},
    editor::DocumentEditor,
    fetcher::FileFetcher,
    ports::TaskHandler,
    Result,
};

// Digest entries are inserted right after this marker so repeated edits keep
// appending at the top instead of rewriting the page.
const DIGEST_ANCHOR: &str = "<!-- digest -->";

pub struct QueueTaskHandler {
    files: Arc<FileFetcher>,
    editor: Arc<DocumentEditor>,
}

impl QueueTaskHandler {
    pub fn new(files: Arc<FileFetcher>, editor: Arc<DocumentEditor>) -> Self {
        Self { files, editor }
    }
}

#[async_trait]
impl TaskHandler for QueueTaskHandler {
    async fn handle(&self, item: &QueueItem) -> Result<String> {
        let mut notes = Vec::new();

        let file = FileRef {
            primary: payload_str(item, "FileId"),
            secondary: payload_str(item, "FallbackFileId"),
        };
        if file.primary.is_some() || file.secondary.is_some() {
            let bytes = self.files.fetch(&file).await?;
            notes.push(format!("fetched attachment ({} bytes)", bytes.len()));

            let health = self.files.health().await;
            if health.state != CircuitState::Closed {
                println!(
                    "[FETCH] primary circuit {} ({} consecutive failures)",
                    health.state, health.consecutive_failures
                );
            }
        } else {
            notes.push("no attachment".to_string());
        }

        if let Some(page) = payload_str(item, "DigestPageId") {
            let entry = format!(
                "<li>item {} processed at {}</li>",
                item.id.0,
                Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
            );
            self.editor
                .apply_edit(&DocumentId(page), |old| {
                    insert_after_anchor(old, DIGEST_ANCHOR, &entry)
                })
                .await?;
            notes.push("digest updated".to_string());
        }

        Ok(notes.join("; "))
    }
}

fn payload_str(item: &QueueItem, key: &str) -> Option<String> {
    item.payload
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn insert_after_anchor(content: &str, anchor: &str, entry: &str) -> String {
    match content.find(anchor) {
        Some(pos) => {
            let split = pos + anchor.len();
            format!("{}\n{}{}", &content[..split], entry, &content[split..])
        }
        // No anchor yet: seed one at the top of the page.
        None => format!("{anchor}\n{entry}\n{content}"),
    }
}
