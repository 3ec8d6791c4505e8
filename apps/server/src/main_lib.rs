use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use businessmap_client::{BusinessmapClient, CancellationToken, RetryConfig};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Config;

pub struct AppState {
    pub client: BusinessmapClient,
    pub retry_defaults: RetryConfig,
    pub request_timeout: Duration,
}

impl AppState {
    /// Run `f` with a token that fires once the request timeout elapses.
    pub async fn with_deadline<F, Fut, T>(&self, f: F) -> T
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = T>,
    {
        let cancel = CancellationToken::new();
        let deadline = cancel.clone();
        let timeout = self.request_timeout;
        let timer = tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            tracing::warn!("Request exceeded {:?}, canceling outstanding fetches", timeout);
            deadline.cancel();
        });

        let output = f(cancel).await;
        timer.abort();
        output
    }
}

pub fn init_tracing() {
    let log_format = std::env::var("BM_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);

    if log_format.eq_ignore_ascii_case("json") {
        registry
            .with(fmt::layer().json().with_current_span(false))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }
}

pub fn build_state(config: &Config) -> anyhow::Result<Arc<AppState>> {
    config
        .retry
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid default retry configuration: {}", e))?;

    let client = BusinessmapClient::new(config.base_url.clone(), config.api_key.clone());
    tracing::info!("Businessmap API base URL: {}", client.base_url());

    Ok(Arc::new(AppState {
        client,
        retry_defaults: config.retry,
        request_timeout: config.request_timeout,
    }))
}
