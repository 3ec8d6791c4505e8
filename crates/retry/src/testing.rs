//! Scripted fetchers shared by unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::classify::{AttemptOutcome, RateLimitSignal};
use crate::endpoint::Fetcher;

pub(crate) fn success(body: &'static [u8]) -> AttemptOutcome {
    AttemptOutcome::Success(Bytes::from_static(body))
}

pub(crate) fn rate_limited(retry_after_secs: u64) -> AttemptOutcome {
    AttemptOutcome::RateLimited(RateLimitSignal::new(Duration::from_secs(retry_after_secs)))
}

/// Plays back a fixed script, then repeats `fallback` forever.
pub(crate) struct ScriptedFetcher {
    script: Mutex<VecDeque<AttemptOutcome>>,
    fallback: AttemptOutcome,
    latency: Duration,
    calls: AtomicU32,
}

impl ScriptedFetcher {
    pub(crate) fn new(script: Vec<AttemptOutcome>, fallback: AttemptOutcome) -> Self {
        Self {
            script: Mutex::new(script.into()),
            fallback,
            latency: Duration::ZERO,
            calls: AtomicU32::new(0),
        }
    }

    pub(crate) fn repeating(outcome: AttemptOutcome) -> Self {
        Self::new(Vec::new(), outcome)
    }

    pub(crate) fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub(crate) fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn fetch(&self) -> AttemptOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let next = self.script.lock().unwrap().pop_front();
        next.unwrap_or_else(|| self.fallback.clone())
    }
}
