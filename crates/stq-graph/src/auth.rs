//! Bearer credential lifecycle + paced, auto-retrying request primitive.
//!
//! The credential never leaves this module except as an `Authorization`
//! header. Acquisition order: in-memory cache, then the persisted cache file
//! (warm start), then a full client-credentials exchange. Every outbound
//! call waits out a minimum gap (plus random jitter) measured from the end
//! of the previous call, so sequential bursts don't hammer the remote API.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};

use stq_core::{errors::Error, Result};

/// Refuse to use a cached credential within this margin of its expiry.
const EXPIRY_MARGIN_SECS: i64 = 60;

const ERROR_BODY_SNIPPET: usize = 200;

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub token_url: String,
    pub client_id: String,
    pub client_secret: String,
    pub scope: Option<String>,
    /// Credential cache file; `None` disables persistence (cold start every
    /// process).
    pub cache_file: Option<PathBuf>,
    pub request_gap: Duration,
    pub request_jitter: Duration,
    pub http_timeout: Duration,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
struct CachedCredential {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedCredential {
    fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - chrono::Duration::seconds(EXPIRY_MARGIN_SECS) > now
    }
}

#[derive(Default)]
struct AuthState {
    credential: Option<CachedCredential>,
    last_finished: Option<Instant>,
}

pub struct AuthSession {
    cfg: AuthConfig,
    http: reqwest::Client,
    state: Mutex<AuthState>,
}

impl AuthSession {
    pub fn new(cfg: AuthConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(cfg.http_timeout)
            .build()
            .map_err(|e| Error::Config(format!("http client build: {e}")))?;

        // Warm start: a stale or unreadable cache file just means a cold
        // acquisition on first use.
        let credential = match cfg.cache_file.as_deref() {
            Some(path) => match load_credential_cache(path) {
                Ok(c) => c,
                Err(e) => {
                    eprintln!("[AUTH] ignoring unreadable credential cache: {e}");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            cfg,
            http,
            state: Mutex::new(AuthState {
                credential,
                last_finished: None,
            }),
        })
    }

    /// Ready-to-use auth headers for callers that build their own requests.
    pub async fn auth_headers(&self) -> Result<reqwest::header::HeaderMap> {
        let token = self.bearer().await?;
        let mut headers = reqwest::header::HeaderMap::new();
        let value = reqwest::header::HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|e| Error::Auth(format!("token not header-safe: {e}")))?;
        headers.insert(reqwest::header::AUTHORIZATION, value);
        Ok(headers)
    }

    /// Pace, authenticate, and send the request.
    ///
    /// On 401 the cached credential is invalidated and the call retried
    /// exactly once with a fresh one; a second 401 is fatal. Any other ≥400
    /// becomes `Error::Remote` carrying the status code so callers can
    /// pattern-match 412/429.
    pub async fn execute(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        let retry = req.try_clone();

        let resp = self.send_once(req).await?;
        if resp.status().as_u16() != 401 {
            return check_status(resp).await;
        }

        let Some(retry) = retry else {
            return Err(Error::Auth("401 on a non-replayable request".to_string()));
        };

        println!("[AUTH] got 401, refreshing credential and retrying once");
        self.invalidate().await;
        let resp = self.send_once(retry).await?;
        if resp.status().as_u16() == 401 {
            return Err(Error::Auth(
                "request rejected with 401 twice, credential refresh did not help".to_string(),
            ));
        }
        check_status(resp).await
    }

    async fn send_once(&self, req: reqwest::RequestBuilder) -> Result<reqwest::Response> {
        self.pace().await;
        let token = self.bearer().await?;
        let result = req
            .bearer_auth(&token)
            .send()
            .await
            .map_err(|e| Error::Transport(format!("request error: {e}")));
        self.state.lock().await.last_finished = Some(Instant::now());
        result
    }

    async fn pace(&self) {
        let wait = {
            let st = self.state.lock().await;
            match st.last_finished {
                None => Duration::ZERO,
                Some(end) => pace_wait(
                    end,
                    Instant::now(),
                    self.cfg.request_gap,
                    jitter_sample(self.cfg.request_jitter),
                ),
            }
        };
        if wait > Duration::ZERO {
            sleep(wait).await;
        }
    }

    async fn bearer(&self) -> Result<String> {
        {
            let st = self.state.lock().await;
            if let Some(c) = &st.credential {
                if c.is_usable(Utc::now()) {
                    return Ok(c.access_token.clone());
                }
            }
        }
        self.refresh().await
    }

    async fn refresh(&self) -> Result<String> {
        let cred = self.acquire().await?;

        // Persist best-effort: a failed write only costs the next process a
        // cold start.
        if let Some(path) = &self.cfg.cache_file {
            if let Err(e) = save_credential_cache(path, &cred) {
                eprintln!("[AUTH] failed to persist credential cache: {e}");
            }
        }

        let token = cred.access_token.clone();
        self.state.lock().await.credential = Some(cred);
        Ok(token)
    }

    async fn invalidate(&self) {
        self.state.lock().await.credential = None;
    }

    async fn acquire(&self) -> Result<CachedCredential> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", self.cfg.client_id.clone()),
            ("client_secret", self.cfg.client_secret.clone()),
        ];
        if let Some(scope) = &self.cfg.scope {
            form.push(("scope", scope.clone()));
        }

        let resp = self
            .http
            .post(&self.cfg.token_url)
            .form(&form)
            .send()
            .await
            .map_err(|e| Error::Auth(format!("token request error: {e}")))?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::Auth(format!(
                "token exchange failed: {status} {}",
                body.chars().take(ERROR_BODY_SNIPPET).collect::<String>()
            )));
        }

        let v: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| Error::Auth(format!("token json error: {e}")))?;

        let access_token = v
            .get("access_token")
            .and_then(|t| t.as_str())
            .unwrap_or("")
            .to_string();
        if access_token.is_empty() {
            return Err(Error::Auth(
                "token response missing access_token".to_string(),
            ));
        }

        let expires_in = v.get("expires_in").and_then(|t| t.as_i64()).unwrap_or(3600);
        Ok(CachedCredential {
            access_token,
            expires_at: Utc::now() + chrono::Duration::seconds(expires_in),
        })
    }
}

/// A 2xx response whose body does not have the expected shape. Mapped to
/// `Error::Transport` so it never masquerades as a remote status code.
pub(crate) fn malformed_payload(what: impl std::fmt::Display) -> Error {
    Error::Transport(format!("malformed response payload: {what}"))
}

/// Map a response to `Ok` for 2xx, `Error::Remote` otherwise, keeping a
/// snippet of the body for the log.
async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(Error::Remote {
        status: status.as_u16(),
        message: body.chars().take(ERROR_BODY_SNIPPET).collect(),
    })
}

fn pace_wait(last_end: Instant, now: Instant, gap: Duration, jitter: Duration) -> Duration {
    (last_end + gap + jitter).saturating_duration_since(now)
}

fn jitter_sample(max: Duration) -> Duration {
    let max_ms = max.as_millis() as u64;
    if max_ms == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=max_ms))
}

fn load_credential_cache(path: &Path) -> Result<Option<CachedCredential>> {
    if !path.exists() {
        return Ok(None);
    }
    let txt = std::fs::read_to_string(path)?;
    if txt.trim().is_empty() {
        return Ok(None);
    }
    let cred: CachedCredential = serde_json::from_str(&txt)?;
    Ok(Some(cred))
}

fn save_credential_cache(path: &Path, cred: &CachedCredential) -> Result<()> {
    let txt = serde_json::to_string(cred)?;
    std::fs::write(path, txt)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    fn tmp_file(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or(std::time::Duration::from_secs(0))
            .as_millis();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    #[test]
    fn credential_cache_round_trips() {
        let path = tmp_file("stq-auth-test");
        let cred = CachedCredential {
            access_token: "tok-123".to_string(),
            expires_at: Utc::now() + chrono::Duration::hours(1),
        };
        save_credential_cache(&path, &cred).unwrap();

        let loaded = load_credential_cache(&path).unwrap().unwrap();
        assert_eq!(loaded.access_token, "tok-123");
        assert_eq!(loaded.expires_at, cred.expires_at);
    }

    #[test]
    fn missing_or_empty_cache_is_cold_start() {
        assert!(load_credential_cache(Path::new("/tmp/stq-no-such-cache.json"))
            .unwrap()
            .is_none());

        let path = tmp_file("stq-auth-empty");
        std::fs::write(&path, "  \n").unwrap();
        assert!(load_credential_cache(&path).unwrap().is_none());
    }

    #[test]
    fn credential_expiry_margin() {
        let now = Utc::now();
        let fresh = CachedCredential {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS + 5),
        };
        assert!(fresh.is_usable(now));

        let nearly_expired = CachedCredential {
            access_token: "t".to_string(),
            expires_at: now + chrono::Duration::seconds(EXPIRY_MARGIN_SECS - 5),
        };
        assert!(!nearly_expired.is_usable(now));
    }

    #[tokio::test(start_paused = true)]
    async fn pace_wait_counts_from_request_end() {
        let gap = Duration::from_millis(100);
        let end = Instant::now();

        // Immediately after the previous request: full gap plus jitter.
        assert_eq!(
            pace_wait(end, end, gap, Duration::from_millis(30)),
            Duration::from_millis(130)
        );

        // Well past the gap: no wait.
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(pace_wait(end, Instant::now(), gap, Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let max = Duration::from_millis(50);
        for _ in 0..100 {
            assert!(jitter_sample(max) <= max);
        }
        assert_eq!(jitter_sample(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn malformed_payload_is_not_a_remote_status() {
        let e = malformed_payload("item 7");
        assert_eq!(e.status(), None);
        assert!(e.to_string().contains("malformed response payload: item 7"));
    }

    /// Minimal HTTP/1.1 stub. `POST /token` always succeeds with a fresh
    /// bearer; every other request is answered with the next status in
    /// `api_statuses` (then 200). Returns the base url and the api hit count.
    async fn spawn_api_stub(api_statuses: Vec<u16>) -> (String, Arc<AtomicUsize>) {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let api_hits = Arc::new(AtomicUsize::new(0));
        let hits = api_hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let mut head = Vec::new();
                let mut buf = [0u8; 1024];
                while !head.windows(4).any(|w| w == b"\r\n\r\n") {
                    match sock.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => head.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&head);

                let (status, body) = if request.starts_with("POST /token") {
                    (200, r#"{"access_token":"tok-fresh","expires_in":3600}"#)
                } else {
                    let i = hits.fetch_add(1, Ordering::SeqCst);
                    match api_statuses.get(i).copied().unwrap_or(200) {
                        200 => (200, r#"{"ok":true}"#),
                        401 => (401, r#"{"error":"token expired"}"#),
                        s => (s, "{}"),
                    }
                };
                let reason = match status {
                    200 => "OK",
                    401 => "Unauthorized",
                    _ => "Error",
                };
                let resp = format!(
                    "HTTP/1.1 {status} {reason}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = sock.write_all(resp.as_bytes()).await;
                let _ = sock.shutdown().await;
            }
        });

        (format!("http://{addr}"), api_hits)
    }

    fn session_for(base: &str) -> AuthSession {
        AuthSession::new(AuthConfig {
            token_url: format!("{base}/token"),
            client_id: "cid".to_string(),
            client_secret: "secret".to_string(),
            scope: None,
            cache_file: None,
            request_gap: Duration::ZERO,
            request_jitter: Duration::ZERO,
            http_timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn rejected_bearer_is_refreshed_and_retried_once() {
        let (base, api_hits) = spawn_api_stub(vec![401, 200]).await;
        let session = session_for(&base);

        let resp = session
            .execute(reqwest::Client::new().get(format!("{base}/items")))
            .await
            .unwrap();
        assert_eq!(resp.status().as_u16(), 200);
        assert_eq!(api_hits.load(Ordering::SeqCst), 2, "exactly one retry");
    }

    #[tokio::test]
    async fn second_401_is_fatal() {
        let (base, api_hits) = spawn_api_stub(vec![401, 401, 200]).await;
        let session = session_for(&base);

        let err = session
            .execute(reqwest::Client::new().get(format!("{base}/items")))
            .await
            .unwrap_err();
        match err {
            Error::Auth(msg) => assert!(msg.contains("401"), "got: {msg}"),
            other => panic!("expected Auth, got {other:?}"),
        }
        assert_eq!(api_hits.load(Ordering::SeqCst), 2, "no third attempt");
    }
}
