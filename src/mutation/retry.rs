//! Jittered retry around a read-modify-write of the shared document.

use rand::Rng;
use std::time::Duration;
use tracing::{info, warn};

use super::{MutationError, MutationResult};
use crate::model::SharedDocument;
use crate::remote::{RemoteError, RemoteErrorKind, RemoteStore};

/// How many times, and how patiently, a write path retries
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Linear backoff step added per retry
    pub base_backoff_ms: u64,
    /// Upper bound of the uniform random delay added per retry
    pub jitter_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff_ms: 150,
            jitter_ms: 400,
        }
    }
}

impl RetryPolicy {
    /// Registration races hardest, so it gets the larger budget
    pub fn registration() -> Self {
        Self {
            max_attempts: 5,
            ..Default::default()
        }
    }

    /// No waiting between attempts
    pub fn immediate(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            base_backoff_ms: 0,
            jitter_ms: 0,
        }
    }

    pub fn with_backoff(mut self, base_backoff_ms: u64, jitter_ms: u64) -> Self {
        self.base_backoff_ms = base_backoff_ms;
        self.jitter_ms = jitter_ms;
        self
    }

    /// Delay before the zero-based `attempt`; the first attempt never waits
    pub fn delay_for_attempt(&self, attempt: usize) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let backoff = self.base_backoff_ms.saturating_mul(attempt as u64);
        let jitter = if self.jitter_ms > 0 {
            rand::thread_rng().gen_range(0..=self.jitter_ms)
        } else {
            0
        };
        Duration::from_millis(backoff.saturating_add(jitter))
    }
}

/// Fetch the document fresh, apply `mutate`, write it back; repeat on remote
/// failure until the policy is exhausted.
///
/// Errors returned by `mutate` end the loop immediately. A missing document
/// row is treated as an empty document.
pub async fn read_modify_write<T, F>(
    remote: &dyn RemoteStore,
    policy: &RetryPolicy,
    operation: &'static str,
    mut mutate: F,
) -> MutationResult<(SharedDocument, T)>
where
    F: FnMut(&mut SharedDocument) -> MutationResult<T>,
{
    let mut last_error = None;

    for attempt in 0..policy.max_attempts {
        let delay = policy.delay_for_attempt(attempt);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut doc = match remote.fetch().await {
            Ok(doc) => doc.unwrap_or_default(),
            Err(e) => {
                warn!(operation, attempt, error = %e, "Fetch failed, retrying");
                last_error = Some(e);
                continue;
            }
        };

        let value = mutate(&mut doc)?;

        match remote.upsert(&doc).await {
            Ok(()) => {
                if attempt > 0 {
                    info!(operation, attempt, "Write succeeded after retry");
                }
                return Ok((doc, value));
            }
            Err(e) => {
                warn!(operation, attempt, error = %e, "Write failed, retrying");
                last_error = Some(e);
            }
        }
    }

    Err(MutationError::RetriesExhausted {
        operation,
        attempts: policy.max_attempts,
        source: last_error
            .unwrap_or_else(|| RemoteError::new(RemoteErrorKind::Unknown, "no attempts allowed")),
    })
}
