//! Caller-side retry for classifier transports.
//!
//! The enrichment client never retries on its own; an orchestrator that wants
//! retries wraps its transport in [`RetryTransport`]. Only errors for which
//! [`EnrichError::is_transient`] holds are retried.
//!
//! # Backoff
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=250ms)
//! ```

use super::{ClassifierReply, ClassifierTransport, EnrichError, GenerationParams};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Wraps a [`ClassifierTransport`] with exponential backoff.
pub struct RetryTransport<T> {
    /// The underlying transport to wrap.
    inner: T,
    /// Maximum number of retry attempts before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    /// Maximum delay cap to prevent excessive waiting.
    max_delay: Duration,
    /// Upper bound of the random jitter added to each delay.
    max_jitter_ms: u64,
}

impl<T> RetryTransport<T>
where
    T: ClassifierTransport,
{
    /// Create a retrying wrapper around `inner`.
    ///
    /// # Arguments
    ///
    /// * `inner` - The transport to retry
    /// * `max_retries` - Attempts after the first; zero disables retrying
    /// * `base_delay` - Delay before the first retry
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter_ms: 250,
        }
    }

    #[cfg(test)]
    fn without_jitter(mut self) -> Self {
        self.max_jitter_ms = 0;
        self
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let shift = (attempt.saturating_sub(1)).min(31) as u32;
        let delay = self
            .base_delay
            .saturating_mul(1u32 << shift)
            .min(self.max_delay);
        let jitter_ms: u64 = if self.max_jitter_ms == 0 {
            0
        } else {
            rng().random_range(0..=self.max_jitter_ms)
        };
        delay + Duration::from_millis(jitter_ms)
    }
}

impl<T> fmt::Debug for RetryTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryTransport")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .finish()
    }
}

impl<T> ClassifierTransport for RetryTransport<T>
where
    T: ClassifierTransport + fmt::Debug,
{
    #[instrument(level = "info", skip_all)]
    async fn send(
        &self,
        prompt: &str,
        params: &GenerationParams,
    ) -> Result<ClassifierReply, EnrichError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.send(prompt, params).await {
                Ok(reply) => return Ok(reply),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let attempt_dt = attempt_t0.elapsed();
                    let total_dt = total_t0.elapsed();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                            elapsed_ms_total = total_dt.as_millis() as u64,
                            error = %e,
                            "send() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt = attempt_dt.as_millis() as u64,
                        elapsed_ms_total = total_dt.as_millis() as u64,
                        ?delay,
                        error = %e,
                        "send() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}
