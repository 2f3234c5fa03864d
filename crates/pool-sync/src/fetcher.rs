use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anchor_lang::prelude::Pubkey;
use backoff::ExponentialBackoffBuilder;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::config::RpcSettings;
use crate::errors::{FetchError, RpcError};
use crate::rpc::LedgerRpc;

/// Sliding-window limiter shared by every caller of one RPC provider.
/// `acquire` waits for a free slot instead of failing.
pub struct RateLimiter {
    requests: Mutex<VecDeque<Instant>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            requests: Mutex::new(VecDeque::new()),
            max_requests: max_requests.max(1),
            window,
        }
    }

    pub fn per_second(max_requests: u32) -> Self {
        Self::new(max_requests, Duration::from_secs(1))
    }

    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut requests = self.requests.lock().await;
                let now = Instant::now();
                while let Some(&front) = requests.front() {
                    if now.duration_since(front) >= self.window {
                        requests.pop_front();
                    } else {
                        break;
                    }
                }
                if requests.len() < self.max_requests as usize {
                    requests.push_back(now);
                    return;
                }
                match requests.front() {
                    Some(&front) => self.window.saturating_sub(now.duration_since(front)),
                    None => Duration::ZERO,
                }
            };
            debug!(wait_ms = wait.as_millis() as u64, "rate limiter full");
            sleep(wait).await;
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl RetryPolicy {
    pub fn from_settings(settings: &RpcSettings) -> Self {
        Self {
            max_attempts: settings.max_retries.saturating_add(1),
            initial_interval: Duration::from_millis(settings.retry_initial_ms),
            max_interval: Duration::from_millis(settings.retry_max_ms),
        }
    }
}

/// Order-preserving, chunked, rate-limited getMultipleAccounts.
#[derive(Clone)]
pub struct AccountFetcher {
    rpc: Arc<dyn LedgerRpc>,
    limiter: Arc<RateLimiter>,
    chunk_size: usize,
    retry: RetryPolicy,
}

impl AccountFetcher {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        limiter: Arc<RateLimiter>,
        chunk_size: usize,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            rpc,
            limiter,
            chunk_size: chunk_size.max(1),
            retry,
        }
    }

    pub fn from_settings(rpc: Arc<dyn LedgerRpc>, settings: &RpcSettings) -> Self {
        Self::new(
            rpc,
            Arc::new(RateLimiter::per_second(settings.max_requests_per_second)),
            settings.max_accounts_per_request,
            RetryPolicy::from_settings(settings),
        )
    }

    pub fn rpc(&self) -> &Arc<dyn LedgerRpc> {
        &self.rpc
    }

    /// Output has exactly `addresses.len()` entries in input order. Any chunk
    /// failing (after retries) fails the whole call.
    pub async fn fetch_multiple(
        &self,
        addresses: &[Pubkey],
    ) -> Result<Vec<Option<Vec<u8>>>, FetchError> {
        if addresses.is_empty() {
            return Ok(Vec::new());
        }
        let chunks: Vec<&[Pubkey]> = addresses.chunks(self.chunk_size).collect();
        let total_chunks = chunks.len();
        debug!(accounts = addresses.len(), chunks = total_chunks, "fetching accounts");

        let results = join_all(chunks.into_iter().map(|chunk| self.fetch_chunk(chunk))).await;

        let mut accounts = Vec::with_capacity(addresses.len());
        let mut errors = Vec::new();
        for result in results {
            match result {
                Ok(chunk) => accounts.extend(chunk),
                Err(e) => errors.push(e),
            }
        }
        if !errors.is_empty() {
            warn!(failed = errors.len(), total_chunks, "batch fetch failed");
            return Err(FetchError::Batch {
                failed_chunks: errors.len(),
                total_chunks,
                errors,
            });
        }
        Ok(accounts)
    }

    async fn fetch_chunk(&self, chunk: &[Pubkey]) -> Result<Vec<Option<Vec<u8>>>, RpcError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.retry.initial_interval)
            .with_max_interval(self.retry.max_interval)
            .with_max_elapsed_time(None)
            .build();
        let attempts = &AtomicU32::new(0);
        let max_attempts = self.retry.max_attempts.max(1);
        let this = self;

        backoff::future::retry(backoff, || async move {
            let attempt = attempts.fetch_add(1, Ordering::Relaxed) + 1;
            this.limiter.acquire().await;
            match this.rpc.get_multiple_accounts(chunk).await {
                Ok(accounts) if accounts.len() == chunk.len() => Ok(accounts),
                Ok(accounts) => Err(backoff::Error::permanent(RpcError::Transport(format!(
                    "provider returned {} accounts for {} addresses",
                    accounts.len(),
                    chunk.len()
                )))),
                Err(RpcError::Closed) => Err(backoff::Error::permanent(RpcError::Closed)),
                Err(e) if attempt >= max_attempts => Err(backoff::Error::permanent(e)),
                Err(e) => {
                    debug!(attempt, error = %e, "chunk fetch failed; retrying");
                    Err(backoff::Error::transient(e))
                }
            }
        })
        .await
    }
}
