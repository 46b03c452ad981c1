//! Classification-aware retry with exponential backoff.

use crate::{
    classifier::classify,
    error::{GenError, Result},
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

/// How often, and how patiently, a single candidate is retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries allowed after the first call.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub multiplier: f64,
    /// No single backoff sleep grows past this.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(4000),
            multiplier: 1.5,
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_initial_delay(mut self, initial_delay: Duration) -> Self {
        self.initial_delay = initial_delay;
        self
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(GenError::Config(format!(
                "retry multiplier must be a finite number >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.initial_delay > self.max_delay {
            return Err(GenError::Config(format!(
                "initial retry delay {:?} exceeds max delay {:?}",
                self.initial_delay, self.max_delay
            )));
        }
        Ok(())
    }

    /// The sleep after `delay`, capped at `max_delay`. Never panics, even
    /// for a policy that fails [`RetryPolicy::validate`].
    pub fn next_delay(&self, delay: Duration) -> Duration {
        Duration::try_from_secs_f64(delay.as_secs_f64() * self.multiplier)
            .map_or(self.max_delay, |next| next.min(self.max_delay))
    }

    /// Never retries; the operation runs exactly once.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// The sleeps a fully exhausted sequence goes through, in order.
    pub fn delays(&self) -> impl Iterator<Item = Duration> + '_ {
        let first = self.initial_delay.min(self.max_delay);
        std::iter::successors(Some(first), move |delay| Some(self.next_delay(*delay)))
            .take(self.max_attempts as usize)
    }

    /// Upper bound on the time spent sleeping before giving up.
    pub fn worst_case_delay(&self) -> Duration {
        self.delays().sum()
    }
}

/// Optional point in time after which no more backend work is started.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Deadline(Option<Instant>);

impl Deadline {
    pub fn none() -> Self {
        Self(None)
    }

    pub fn at(instant: Instant) -> Self {
        Self(Some(instant))
    }

    pub fn after(timeout: Duration) -> Self {
        Self(Some(Instant::now() + timeout))
    }

    pub fn instant(&self) -> Option<Instant> {
        self.0
    }

    pub fn is_expired(&self) -> bool {
        self.0.map_or(false, |at| Instant::now() >= at)
    }

    /// Drives `future` to completion unless the deadline passes first.
    pub async fn run<F, T>(&self, future: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.0 {
            None => future.await,
            Some(at) => tokio::time::timeout_at(at, future)
                .await
                .unwrap_or(Err(GenError::DeadlineExceeded)),
        }
    }

    pub async fn sleep(&self, delay: Duration) -> Result<()> {
        self.run(async {
            tokio::time::sleep(delay).await;
            Ok(())
        })
        .await
    }
}

/// Runs `operation`, retrying quota and server-busy failures per `policy`.
///
/// Any other failure, or the last transient one, is returned unchanged.
pub async fn retry<T, F, Fut>(
    policy: &RetryPolicy,
    deadline: Deadline,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut remaining = policy.max_attempts;
    let mut delay = policy.initial_delay.min(policy.max_delay);

    loop {
        let err = match deadline.run(operation()).await {
            Ok(value) => return Ok(value),
            Err(err) => err,
        };

        if matches!(err, GenError::DeadlineExceeded) {
            return Err(err);
        }

        let classification = classify(&err);
        if !classification.is_transient() || remaining == 0 {
            log::debug!(
                "Not retrying {} failure ({} retries left): {}",
                classification,
                remaining,
                err.diagnostic()
            );
            return Err(err);
        }

        log::warn!(
            "Transient {} failure, retrying in {}ms ({} retries left)",
            classification,
            delay.as_millis(),
            remaining
        );
        deadline.sleep(delay).await?;
        delay = policy.next_delay(delay);
        remaining -= 1;
    }
}
