use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{breaker::CircuitBreaker, domain::ListRef, errors::Error, Result};

/// Typed configuration for a worker process.
///
/// Loaded once at startup and passed by `Arc` into every component; there is
/// no config-resolver indirection anywhere below this struct.
#[derive(Clone, Debug)]
pub struct Config {
    // Remote API
    pub api_base_url: String,
    pub site_ref: String,
    pub task_list: String,

    // Credential exchange
    pub auth_token_url: String,
    pub auth_client_id: String,
    pub auth_client_secret: String,
    pub auth_scope: Option<String>,
    pub token_cache_file: PathBuf,

    // File fetch
    pub max_file_size_bytes: usize,
    pub secondary_file_base_url: Option<String>,

    // Failure-mode tuning
    pub failure_threshold: u32,
    pub circuit_cooldown: Duration,
    pub stale_threshold: Duration,

    // Request pacing (local, per-process)
    pub request_gap: Duration,
    pub request_jitter: Duration,

    // HTTP timeout profiles
    pub short_timeout: Duration,
    pub long_timeout: Duration,

    // Worker loop
    pub poll_interval: Duration,
}

impl Config {
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));

        let auth_token_url = require("AUTH_TOKEN_URL")?;
        let auth_client_id = require("AUTH_CLIENT_ID")?;
        let auth_client_secret = require("AUTH_CLIENT_SECRET")?;
        let api_base_url = require("API_BASE_URL")?;
        let site_ref = require("SITE_REF")?;
        let task_list = require("TASK_LIST")?;

        let auth_scope = env_str("AUTH_SCOPE").and_then(non_empty);
        let token_cache_file = PathBuf::from(
            env_str("TOKEN_CACHE_FILE").unwrap_or("/tmp/stq-token-cache.json".to_string()),
        );

        let max_file_size_bytes = env_usize("MAX_FILE_SIZE_BYTES").unwrap_or(10 * 1024 * 1024);
        let secondary_file_base_url = env_str("SECONDARY_FILE_BASE_URL").and_then(non_empty);

        let failure_threshold =
            env_u32("FAILURE_THRESHOLD").unwrap_or(CircuitBreaker::DEFAULT_FAILURE_THRESHOLD);
        let circuit_cooldown = env_u64("CIRCUIT_COOLDOWN_SECONDS")
            .map(Duration::from_secs)
            .unwrap_or(CircuitBreaker::DEFAULT_COOLDOWN);
        let stale_threshold = Duration::from_secs(env_u64("STALE_THRESHOLD_SECONDS").unwrap_or(900));

        let request_gap = Duration::from_millis(env_u64("REQUEST_GAP_MS").unwrap_or(100));
        let request_jitter = Duration::from_millis(env_u64("REQUEST_JITTER_MS").unwrap_or(50));

        let short_timeout = Duration::from_secs(env_u64("SHORT_TIMEOUT_SECONDS").unwrap_or(30));
        let long_timeout = Duration::from_secs(env_u64("LONG_TIMEOUT_SECONDS").unwrap_or(300));

        let poll_interval = Duration::from_secs(env_u64("POLL_INTERVAL_SECONDS").unwrap_or(60));

        Ok(Self {
            api_base_url,
            site_ref,
            task_list,
            auth_token_url,
            auth_client_id,
            auth_client_secret,
            auth_scope,
            token_cache_file,
            max_file_size_bytes,
            secondary_file_base_url,
            failure_threshold,
            circuit_cooldown,
            stale_threshold,
            request_gap,
            request_jitter,
            short_timeout,
            long_timeout,
            poll_interval,
        })
    }

    pub fn list_ref(&self) -> ListRef {
        ListRef {
            site: self.site_ref.clone(),
            list: self.task_list.clone(),
        }
    }
}

fn require(key: &str) -> Result<String> {
    env_str(key)
        .and_then(non_empty)
        .ok_or_else(|| Error::Config(format!("{key} environment variable is required")))
}

fn env_str(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        let mut val = v.trim().to_string();
        // Strip optional surrounding quotes.
        if val.len() >= 2
            && ((val.starts_with('"') && val.ends_with('"'))
                || (val.starts_with('\'') && val.ends_with('\'')))
        {
            val = val[1..val.len() - 1].to_string();
        }

        env::set_var(key, val);
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env_str(key).and_then(|s| s.trim().parse::<u64>().ok())
}

fn env_u32(key: &str) -> Option<u32> {
    env_str(key).and_then(|s| s.trim().parse::<u32>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    env_str(key).and_then(|s| s.trim().parse::<usize>().ok())
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
