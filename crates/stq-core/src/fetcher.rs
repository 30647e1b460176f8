//! Binary content retrieval with transparent primary → secondary fallback.
//!
//! The primary store sits behind a circuit breaker. A 429 from the primary
//! opens the circuit immediately (throttling is an unambiguous signal, unlike
//! a generic error which might be a transient blip) and the current fetch
//! falls through to the secondary without waiting for three strikes.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::time::Duration;

use crate::{
    breaker::{CircuitBreaker, HealthStatus},
    domain::FileRef,
    errors::Error,
    ports::BinaryFetcher,
    Result,
};

pub struct FileFetcher {
    primary: Arc<dyn BinaryFetcher>,
    secondary: Option<Arc<dyn BinaryFetcher>>,
    breaker: Mutex<CircuitBreaker>,
    max_bytes: usize,
}

impl FileFetcher {
    pub fn new(
        primary: Arc<dyn BinaryFetcher>,
        secondary: Option<Arc<dyn BinaryFetcher>>,
        max_bytes: usize,
        failure_threshold: u32,
        cooldown: Duration,
    ) -> Self {
        Self {
            primary,
            secondary,
            breaker: Mutex::new(CircuitBreaker::new(failure_threshold, cooldown)),
            max_bytes,
        }
    }

    /// Fetch the referenced content, trying primary then secondary.
    ///
    /// Over-ceiling content is fatal to the whole fetch: partial oversized
    /// buffers must not be retained, and the same bytes would just be
    /// re-downloaded from the other source.
    pub async fn fetch(&self, file: &FileRef) -> Result<Vec<u8>> {
        let mut primary_reason = "no primary reference".to_string();

        if let Some(reference) = &file.primary {
            if self.breaker.lock().await.allow_request() {
                match self.primary.download(reference).await {
                    Ok(bytes) => {
                        self.breaker.lock().await.record_success();
                        return self.enforce_ceiling(bytes);
                    }
                    Err(e) if e.is_throttled() => {
                        eprintln!("[FETCH] primary throttled (429), opening circuit");
                        self.breaker.lock().await.trip();
                        primary_reason = e.to_string();
                    }
                    Err(e) => {
                        eprintln!("[FETCH] primary fetch failed: {e}");
                        self.breaker.lock().await.record_failure();
                        primary_reason = e.to_string();
                    }
                }
            } else {
                primary_reason = "circuit open".to_string();
            }
        }

        let mut secondary_reason = "no secondary source configured".to_string();
        if let Some(store) = &self.secondary {
            if let Some(reference) = &file.secondary {
                match store.download(reference).await {
                    Ok(bytes) => return self.enforce_ceiling(bytes),
                    Err(e) => {
                        eprintln!("[FETCH] secondary fetch failed: {e}");
                        secondary_reason = e.to_string();
                    }
                }
            } else {
                secondary_reason = "no secondary reference".to_string();
            }
        }

        Err(Error::FileResolution {
            primary: primary_reason,
            secondary: secondary_reason,
        })
    }

    /// Circuit health for operational visibility.
    pub async fn health(&self) -> HealthStatus {
        self.breaker.lock().await.health()
    }

    // Enforced after download completes; no pre-flight length header is
    // trusted.
    fn enforce_ceiling(&self, bytes: Vec<u8>) -> Result<Vec<u8>> {
        if bytes.len() > self.max_bytes {
            return Err(Error::FileTooLarge {
                size: bytes.len(),
                limit: self.max_bytes,
            });
        }
        Ok(bytes)
    }
}
