//! `BinaryFetcher` adapters.
//!
//! The primary store is the authenticated drive behind the Graph-style API
//! (long-timeout client — downloads are allowed to take minutes). The
//! secondary is a plain HTTP store used as fallback when the primary is
//! throttled or down; it carries no bearer credential and is not paced.

use std::sync::Arc;

use async_trait::async_trait;

use stq_core::{errors::Error, ports::BinaryFetcher, Result};

use crate::auth::AuthSession;

pub struct GraphBinaryFetcher {
    auth: Arc<AuthSession>,
    http: reqwest::Client,
    base_url: String,
}

impl GraphBinaryFetcher {
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
}

#[async_trait]
impl BinaryFetcher for GraphBinaryFetcher {
    async fn download(&self, reference: &str) -> Result<Vec<u8>> {
        let url = format!("{}/drive/items/{}/content", self.base_url, reference);
        let resp = self.auth.execute(self.http.get(url)).await?;
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("download body: {e}")))?;
        Ok(bytes.to_vec())
    }
}

pub struct HttpBinaryFetcher {
    http: reqwest::Client,
    base_url: String,
}

impl HttpBinaryFetcher {
    pub fn new(base_url: impl Into<String>, timeout: std::time::Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build: {e}")))?;
        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl BinaryFetcher for HttpBinaryFetcher {
    async fn download(&self, reference: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.base_url.trim_end_matches('/'), reference);
        let resp = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request error: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Remote {
                status: status.as_u16(),
                message: body.chars().take(200).collect(),
            });
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| Error::Transport(format!("download body: {e}")))?;
        Ok(bytes.to_vec())
    }
}
