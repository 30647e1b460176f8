//! Optimistic read-modify-write against a single versioned remote document.
//!
//! One conflict gets one retry against freshly read content; a second
//! conflict surfaces as `Error::ConcurrentEdit` so latency stays bounded
//! under contention. Transforms must be anchor-safe: reapplying them to
//! already-transformed content must not corrupt structure — the editor
//! treats content as an opaque string.

use std::sync::Arc;

use crate::{
    domain::DocumentId,
    errors::Error,
    ports::{DocumentStore, WriteOutcome},
    Result,
};

pub struct DocumentEditor {
    store: Arc<dyn DocumentStore>,
}

impl DocumentEditor {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Read the document, apply `transform`, and write back conditionally on
    /// the observed version token. On a version conflict: re-read, re-apply,
    /// try exactly once more. Non-conflict failures propagate immediately.
    pub async fn apply_edit<F>(&self, doc: &DocumentId, transform: F) -> Result<()>
    where
        F: Fn(&str) -> String,
    {
        match self.attempt(doc, &transform).await? {
            WriteOutcome::Applied => return Ok(()),
            WriteOutcome::VersionMismatch => {
                println!("[EDIT] document {} changed under us, retrying once", doc.0);
            }
        }

        match self.attempt(doc, &transform).await? {
            WriteOutcome::Applied => Ok(()),
            WriteOutcome::VersionMismatch => Err(Error::ConcurrentEdit {
                doc_id: doc.0.clone(),
            }),
        }
    }

    async fn attempt<F>(&self, doc: &DocumentId, transform: &F) -> Result<WriteOutcome>
    where
        F: Fn(&str) -> String,
    {
        let snapshot = self.store.read(doc).await?;
        let updated = transform(&snapshot.content);
        self.store.write(doc, &snapshot.etag, &updated).await
    }
}
