//! Condition polling
//!
//! Repeatedly evaluates a readiness check against live state until it is
//! satisfied, reports a fatal error, the ceiling passes, or the run is
//! cancelled. Checks classify their own failures: anything that may resolve
//! by waiting is [`Readiness::NotReady`], anything that never will is
//! [`Readiness::Fatal`].

use std::future::Future;
use std::time::Duration;

use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::common::Error;

/// Outcome of one readiness check
#[derive(Debug)]
pub enum Readiness<T> {
    /// Condition satisfied; polling stops and yields the value
    Ready(T),
    /// Not satisfied yet; the reason is kept for timeout reporting
    NotReady(String),
    /// Waiting cannot help; polling stops and propagates the error
    Fatal(Error),
}

impl<T> Readiness<T> {
    pub fn not_ready(reason: impl Into<String>) -> Self {
        Self::NotReady(reason.into())
    }
}

/// Interval, ceiling and first-check behaviour of a poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollOptions {
    /// Time between the starts of two consecutive checks
    pub interval: Duration,
    /// Total time after which the poll reports a timeout
    pub timeout: Duration,
    /// Run the first check right away instead of after one interval
    pub immediate: bool,
}

impl PollOptions {
    /// Options with the first check after one interval
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            immediate: false,
        }
    }

    /// Run the first check immediately
    pub fn immediate(mut self) -> Self {
        self.immediate = true;
        self
    }
}

/// Why a poll ended without the condition being satisfied
#[derive(Debug)]
pub enum PollError {
    /// The ceiling passed
    Timeout {
        waited: Duration,
        last_observed: Option<String>,
    },
    /// The cancellation token fired
    Cancelled { waited: Duration },
    /// A check reported a fatal error
    Fatal(Error),
}

impl PollError {
    /// Convert into the crate error, letting the caller describe timeouts
    ///
    /// `activity` completes the sentence "Run cancelled while ..." for
    /// cancellations.
    pub fn into_error<F>(self, activity: &str, on_timeout: F) -> Error
    where
        F: FnOnce(Duration, Option<String>) -> Error,
    {
        match self {
            PollError::Timeout {
                waited,
                last_observed,
            } => on_timeout(waited, last_observed),
            PollError::Cancelled { .. } => Error::Cancelled(activity.to_string()),
            PollError::Fatal(e) => e,
        }
    }
}

/// Poll `check` until it yields [`Readiness::Ready`]
///
/// Checks start on a fixed cadence of `options.interval`. After each
/// unsatisfied check the elapsed time is compared with `options.timeout`, so
/// a timeout is never reported before the ceiling. A check still running when
/// the ceiling passes is abandoned. Cancellation is observed both while
/// waiting for the next tick and while a check is running. A zero interval is
/// rejected as a configuration error.
pub async fn poll_until<T, F, Fut>(
    options: PollOptions,
    cancel: &CancellationToken,
    mut check: F,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Readiness<T>>,
{
    if options.interval.is_zero() {
        return Err(PollError::Fatal(Error::Config(
            "poll interval must be positive".to_string(),
        )));
    }

    let start = Instant::now();
    let deadline = start + options.timeout;
    let first_tick = if options.immediate {
        start
    } else {
        start + options.interval
    };

    let mut ticker = tokio::time::interval_at(first_tick, options.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_observed: Option<String> = None;
    let mut attempt: u32 = 0;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { waited: start.elapsed() });
            }
            _ = ticker.tick() => {}
        }

        attempt += 1;
        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                return Err(PollError::Cancelled { waited: start.elapsed() });
            }
            outcome = tokio::time::timeout_at(deadline, check()) => outcome,
        };

        match outcome {
            Ok(Readiness::Ready(value)) => {
                tracing::debug!(attempt, elapsed_ms = start.elapsed().as_millis() as u64, "Condition satisfied");
                return Ok(value);
            }
            Ok(Readiness::Fatal(e)) => {
                tracing::debug!(attempt, error = %e, "Condition check failed fatally");
                return Err(PollError::Fatal(e));
            }
            Ok(Readiness::NotReady(reason)) => {
                tracing::trace!(attempt, %reason, "Condition not satisfied yet");
                last_observed = Some(reason);
            }
            Err(_) => {
                return Err(PollError::Timeout {
                    waited: start.elapsed(),
                    last_observed: Some(match last_observed {
                        Some(last) => format!("{last}; a later check was still running at the deadline"),
                        None => "the first check was still running at the deadline".to_string(),
                    }),
                });
            }
        }

        if Instant::now() >= deadline {
            return Err(PollError::Timeout {
                waited: start.elapsed(),
                last_observed,
            });
        }
    }
}
