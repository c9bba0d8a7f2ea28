//! Retry policies with fixed waits, optional jitter, and per-call-site predicates.
//!
//! A [`RetryPolicy`] bundles an attempt ceiling, a [`Wait`] strategy, and a predicate deciding
//! which errors earn another attempt. The same policy drives async operations
//! ([`RetryPolicy::run`]) and blocking ones ([`RetryPolicy::run_blocking`]). Every failed
//! attempt is logged, including the final one and those the predicate declines to retry.

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, warn};

/// Delay applied between attempts: a fixed component plus uniform random jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Wait {
    fixed: Duration,
    jitter: Duration,
}

impl Wait {
    /// Retry immediately.
    pub const fn none() -> Self {
        Self {
            fixed: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    /// Wait the same amount before every retry.
    pub const fn fixed(fixed: Duration) -> Self {
        Self {
            fixed,
            jitter: Duration::ZERO,
        }
    }

    /// Wait `fixed` plus a uniformly drawn value in `[0, jitter]`.
    pub const fn fixed_with_jitter(fixed: Duration, jitter: Duration) -> Self {
        Self { fixed, jitter }
    }

    /// Draw the delay preceding the next attempt.
    pub fn next_delay(&self) -> Duration {
        let jitter_ms = self.jitter.as_millis() as u64;
        if jitter_ms == 0 {
            return self.fixed;
        }
        let extra = rand::thread_rng().gen_range(0..=jitter_ms);
        self.fixed + Duration::from_millis(extra)
    }
}

/// Per-call bookkeeping carried across attempts.
#[derive(Debug, Clone, Default)]
pub struct RetryState {
    /// Number of attempts started so far (1-based once the first attempt runs).
    pub attempt: u32,
    /// Rendered error of the most recent failed attempt.
    pub last_outcome: Option<String>,
}

/// Retry policy: attempt ceiling, wait strategy, and retry predicate.
pub struct RetryPolicy<E> {
    label: &'static str,
    max_attempts: u32,
    wait: Wait,
    predicate: fn(&E) -> bool,
}

impl<E> Clone for RetryPolicy<E> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<E> Copy for RetryPolicy<E> {}

impl<E> fmt::Debug for RetryPolicy<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("label", &self.label)
            .field("max_attempts", &self.max_attempts)
            .field("wait", &self.wait)
            .finish_non_exhaustive()
    }
}

impl<E: fmt::Display> RetryPolicy<E> {
    /// Build a policy. `max_attempts` counts the initial attempt and is clamped to at least one.
    pub fn new(
        label: &'static str,
        max_attempts: u32,
        wait: Wait,
        predicate: fn(&E) -> bool,
    ) -> Self {
        Self {
            label,
            max_attempts: max_attempts.max(1),
            wait,
            predicate,
        }
    }

    /// Maximum number of attempts, including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Wait strategy applied between attempts.
    pub fn wait(&self) -> Wait {
        self.wait
    }

    /// Whether `error` would be retried (ignoring the attempt ceiling).
    pub fn should_retry(&self, error: &E) -> bool {
        (self.predicate)(error)
    }

    /// Replace the wait strategy, keeping everything else.
    pub fn with_wait(mut self, wait: Wait) -> Self {
        self.wait = wait;
        self
    }

    /// Execute an async operation under this policy.
    pub async fn run<F, Fut, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut state = RetryState::default();
        loop {
            state.attempt += 1;
            match operation().await {
                Ok(value) => return Ok(value),
                Err(error) => match self.after_failure(&mut state, &error) {
                    Some(delay) => {
                        if !delay.is_zero() {
                            tokio::time::sleep(delay).await;
                        }
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Execute a blocking operation under this policy, sleeping the current thread between
    /// attempts.
    pub fn run_blocking<F, T>(&self, mut operation: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
    {
        let mut state = RetryState::default();
        loop {
            state.attempt += 1;
            match operation() {
                Ok(value) => return Ok(value),
                Err(error) => match self.after_failure(&mut state, &error) {
                    Some(delay) => {
                        if !delay.is_zero() {
                            std::thread::sleep(delay);
                        }
                    }
                    None => return Err(error),
                },
            }
        }
    }

    /// Log the failed attempt and decide whether another one follows, returning its delay.
    fn after_failure(&self, state: &mut RetryState, error: &E) -> Option<Duration> {
        state.last_outcome = Some(error.to_string());
        let retryable = (self.predicate)(error);
        let exhausted = state.attempt >= self.max_attempts;

        if retryable && !exhausted {
            let delay = self.wait.next_delay();
            warn!(
                operation = self.label,
                attempt = state.attempt,
                max_attempts = self.max_attempts,
                ?delay,
                error = %error,
                "Attempt failed; retrying"
            );
            Some(delay)
        } else {
            debug!(
                operation = self.label,
                attempt = state.attempt,
                max_attempts = self.max_attempts,
                retryable,
                last_outcome = ?state.last_outcome,
                "Attempt failed; giving up"
            );
            None
        }
    }
}
