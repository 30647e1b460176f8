//! `DocumentStore` adapter: a single versioned document (page) read and
//! conditionally replaced via `If-Match`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use stq_core::{
    domain::{DocumentId, DocumentSnapshot, VersionToken},
    errors::Error,
    ports::{DocumentStore, WriteOutcome},
    Result,
};

use crate::auth::{malformed_payload, AuthSession};

pub struct GraphDocumentStore {
    auth: Arc<AuthSession>,
    http: reqwest::Client,
    base_url: String,
}

impl GraphDocumentStore {
    pub fn new(
        auth: Arc<AuthSession>,
        base_url: impl Into<String>,
        timeout: std::time::Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build: {e}")))?;
        Ok(Self {
            auth,
            http,
            base_url: base_url.into(),
        })
    }

    fn doc_url(&self, doc: &DocumentId) -> String {
        format!("{}/documents/{}", self.base_url, doc.0)
    }
}

#[async_trait]
impl DocumentStore for GraphDocumentStore {
    async fn read(&self, doc: &DocumentId) -> Result<DocumentSnapshot> {
        let req = self.http.get(self.doc_url(doc));
        let resp = self.auth.execute(req).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("document response body: {e}")))?;

        parse_snapshot(&body).ok_or_else(|| malformed_payload(format!("document {}", doc.0)))
    }

    async fn write(
        &self,
        doc: &DocumentId,
        etag: &VersionToken,
        content: &str,
    ) -> Result<WriteOutcome> {
        let req = self
            .http
            .patch(self.doc_url(doc))
            .header(reqwest::header::IF_MATCH, etag.0.clone())
            .json(&json!({ "content": content }));

        match self.auth.execute(req).await {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(Error::Remote { status: 412, .. }) => Ok(WriteOutcome::VersionMismatch),
            Err(e) => Err(e),
        }
    }
}

fn parse_snapshot(body: &Value) -> Option<DocumentSnapshot> {
    let content = body.get("content").and_then(|v| v.as_str())?.to_string();
    let etag = body
        .get("@odata.etag")
        .or_else(|| body.get("eTag"))
        .and_then(|v| v.as_str())?
        .to_string();
    Some(DocumentSnapshot {
        content,
        etag: VersionToken(etag),
    })
}
