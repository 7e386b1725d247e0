//! History provider boundary
//!
//! The ledger/indexing client lives outside this crate; executors reach it
//! through the `HistoryProvider` trait. Fetches are paged, may be
//! rate-limited, and may fail; transient failures are retried with
//! exponential backoff before the executor counts the address as errored.

use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

use crate::types::{Address, TransferRecord};

/// Error from the external history provider
#[derive(Debug)]
pub struct ProviderError {
    pub message: String,

    /// Whether a retry could plausibly succeed (rate limit, timeout)
    pub retryable: bool,
}

impl ProviderError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

impl std::fmt::Display for ProviderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "provider error: {}", self.message)
    }
}

impl std::error::Error for ProviderError {}

/// Paged transfer-history source for one address
///
/// `fetch_page` returns `Ok(None)` at end of data. Implementations are
/// supplied by the embedding process (RPC client, indexer, fixture).
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn fetch_page(
        &self,
        address: &Address,
        page: u32,
    ) -> Result<Option<Vec<TransferRecord>>, ProviderError>;
}

/// Retry pacing for provider fetch failures
///
/// Owns the whole retry decision: a non-retryable error or a spent budget
/// comes straight back to the caller; anything transient is absorbed with a
/// doubling, capped delay and the fetch loop tries again.
#[derive(Debug)]
pub struct RetryPolicy {
    initial_delay_ms: u64,
    max_delay_ms: u64,
    max_attempts: u32,
    attempt: u32,
}

impl RetryPolicy {
    pub fn new(initial_ms: u64, max_ms: u64, attempts: u32) -> Self {
        Self {
            initial_delay_ms: initial_ms,
            max_delay_ms: max_ms,
            max_attempts: attempts,
            attempt: 0,
        }
    }

    /// Absorb a fetch failure; `Ok` means try again now
    ///
    /// The error comes back unchanged when it is not retryable, and marked
    /// fatal when the retry budget runs out.
    pub async fn absorb(&mut self, error: ProviderError) -> Result<(), ProviderError> {
        if !error.retryable {
            return Err(error);
        }
        if self.attempt >= self.max_attempts {
            return Err(ProviderError::fatal(format!(
                "retries exhausted: {}",
                error.message
            )));
        }

        let delay = std::cmp::min(
            self.initial_delay_ms << self.attempt,
            self.max_delay_ms,
        );

        log::debug!(
            "⏳ Provider retry {} of {} in {}ms: {}",
            self.attempt + 1,
            self.max_attempts,
            delay,
            error.message
        );

        sleep(Duration::from_millis(delay)).await;
        self.attempt += 1;
        Ok(())
    }

    /// A successful fetch restores the full budget for later pages
    pub fn reset(&mut self) {
        self.attempt = 0;
    }
}

/// Drain an address's full transfer history, page by page
///
/// Retries transient page failures with backoff; a non-retryable error or
/// retry exhaustion surfaces to the caller, which counts it against the
/// address without aborting the batch.
pub async fn drain_history(
    provider: &dyn HistoryProvider,
    address: &Address,
    max_pages: u32,
) -> Result<Vec<TransferRecord>, ProviderError> {
    let mut transfers = Vec::new();
    let mut retry = RetryPolicy::new(50, 2_000, 3);

    let mut page = 0;
    while page < max_pages {
        match provider.fetch_page(address, page).await {
            Ok(Some(batch)) => {
                if batch.is_empty() {
                    break;
                }
                transfers.extend(batch);
                page += 1;
                retry.reset();
            }
            Ok(None) => break,
            Err(e) => {
                if let Err(final_error) = retry.absorb(e).await {
                    return Err(ProviderError::fatal(format!(
                        "{} page {}: {}",
                        address, page, final_error.message
                    )));
                }
            }
        }
    }

    Ok(transfers)
}
