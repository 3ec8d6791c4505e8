use std::{net::SocketAddr, time::Duration};

use anyhow::Context;
use businessmap_client::RetryConfig;

const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:8088";
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 1800;

pub struct Config {
    pub listen_addr: SocketAddr,
    pub api_key: String,
    pub base_url: String,
    pub cors_allow: Vec<String>,
    /// Upper bound on one tool call, after which in-flight retries are canceled.
    pub request_timeout: Duration,
    /// Retry parameters used when a request sends no overrides.
    pub retry: RetryConfig,
}

impl Config {
    /// Configuration for talking to `base_url`, with defaults everywhere else.
    pub fn new(base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 8088)),
            api_key: api_key.into(),
            base_url: base_url.into(),
            cors_allow: vec!["*".to_string()],
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            retry: RetryConfig::default(),
        }
    }

    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let api_key = required("KANBANIZE_API_KEY")?;
        let base_url = required("KANBANIZE_BASE_URL")?;

        let listen_addr: SocketAddr = std::env::var("BM_LISTEN_ADDR")
            .unwrap_or_else(|_| DEFAULT_LISTEN_ADDR.to_string())
            .parse()
            .context("Invalid BM_LISTEN_ADDR")?;
        let cors_allow = std::env::var("BM_CORS_ALLOW_ORIGINS")
            .unwrap_or_else(|_| "*".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        let timeout_secs: u64 = std::env::var("BM_REQUEST_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);

        Ok(Self {
            listen_addr,
            cors_allow,
            request_timeout: Duration::from_secs(timeout_secs),
            ..Self::new(base_url, api_key)
        })
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .with_context(|| format!("{} environment variable is required", key))
}
