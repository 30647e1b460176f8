//! `ListStore` adapter for a Graph-style list API.
//!
//! Items arrive as `{ id, "@odata.etag", fields: {...} }`; updates are PATCH
//! calls against `/items/{id}/fields` with an optional `If-Match` header.
//! HTTP 412 is translated into `WriteOutcome::VersionMismatch` — the core
//! treats lost version races as values, not errors.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

use stq_core::{
    domain::{ItemId, ItemStatus, ListRef, QueueItem, VersionToken},
    errors::Error,
    ports::{fields, ItemFilter, ListStore, WriteOutcome},
    Result,
};

use crate::auth::{malformed_payload, AuthSession};

// Remote column names behind the canonical field keys.
const COL_STATUS: &str = "Status";
const COL_HEARTBEAT: &str = "HeartbeatAt";
const COL_NOTES: &str = "Notes";
const COL_COMPLETED_AT: &str = "CompletedAt";

pub struct GraphListStore {
    auth: Arc<AuthSession>,
    http: reqwest::Client,
    base_url: String,
}

impl GraphListStore {
    pub fn new(auth: Arc<AuthSession>, base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
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

    fn items_url(&self, list: &ListRef) -> String {
        format!(
            "{}/sites/{}/lists/{}/items",
            self.base_url, list.site, list.list
        )
    }
}

#[async_trait]
impl ListStore for GraphListStore {
    async fn query_items(&self, list: &ListRef, filter: &ItemFilter) -> Result<Vec<QueueItem>> {
        let req = self.http.get(self.items_url(list)).query(&[
            ("$expand", "fields".to_string()),
            ("$filter", filter_expression(filter)),
        ]);

        let resp = self.auth.execute(req).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("list response body: {e}")))?;

        let rows = body
            .get("value")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();

        let mut out = Vec::with_capacity(rows.len());
        for row in &rows {
            match parse_item(row) {
                Some(item) => out.push(item),
                None => eprintln!("[LIST] skipping malformed list row: {row}"),
            }
        }
        Ok(out)
    }

    async fn get_item(&self, list: &ListRef, id: &ItemId) -> Result<QueueItem> {
        let req = self
            .http
            .get(format!("{}/{}", self.items_url(list), id.0))
            .query(&[("$expand", "fields")]);

        let resp = self.auth.execute(req).await?;
        let body: Value = resp
            .json()
            .await
            .map_err(|e| Error::Transport(format!("item response body: {e}")))?;

        parse_item(&body).ok_or_else(|| malformed_payload(format!("item {}", id.0)))
    }

    async fn update_item(
        &self,
        list: &ListRef,
        id: &ItemId,
        etag: Option<&VersionToken>,
        field_values: &Value,
    ) -> Result<WriteOutcome> {
        let mut req = self
            .http
            .patch(format!("{}/{}/fields", self.items_url(list), id.0))
            .json(&to_remote_columns(field_values));
        if let Some(token) = etag {
            req = req.header(reqwest::header::IF_MATCH, token.0.clone());
        }

        match self.auth.execute(req).await {
            Ok(_) => Ok(WriteOutcome::Applied),
            Err(Error::Remote { status: 412, .. }) => Ok(WriteOutcome::VersionMismatch),
            Err(e) => Err(e),
        }
    }
}

fn filter_expression(filter: &ItemFilter) -> String {
    let mut expr = format!("fields/{COL_STATUS} eq '{}'", filter.status.as_str());
    if let Some(cutoff) = filter.heartbeat_before {
        expr.push_str(&format!(
            " and fields/{COL_HEARTBEAT} lt '{}'",
            cutoff.to_rfc3339_opts(SecondsFormat::Secs, true)
        ));
    }
    expr
}

fn to_remote_columns(field_values: &Value) -> Value {
    let mut out = serde_json::Map::new();
    let Some(obj) = field_values.as_object() else {
        return Value::Object(out);
    };
    for (key, value) in obj {
        let column = match key.as_str() {
            fields::STATUS => COL_STATUS,
            fields::HEARTBEAT => COL_HEARTBEAT,
            fields::NOTES => COL_NOTES,
            fields::COMPLETED_AT => COL_COMPLETED_AT,
            other => other,
        };
        out.insert(column.to_string(), value.clone());
    }
    Value::Object(out)
}

fn parse_item(row: &Value) -> Option<QueueItem> {
    let id = match row.get("id") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => return None,
    };

    let etag = row
        .get("@odata.etag")
        .or_else(|| row.get("eTag"))
        .and_then(|v| v.as_str())?
        .to_string();

    let row_fields = row.get("fields").cloned().unwrap_or(json!({}));
    let status = row_fields
        .get(COL_STATUS)
        .and_then(|v| v.as_str())
        .and_then(ItemStatus::parse)?;

    let heartbeat = row_fields
        .get(COL_HEARTBEAT)
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|d| d.with_timezone(&Utc));

    let notes = row_fields
        .get(COL_NOTES)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    Some(QueueItem {
        id: ItemId(id),
        status,
        etag: VersionToken(etag),
        heartbeat,
        notes,
        payload: row_fields,
    })
}
