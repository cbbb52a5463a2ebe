//! Fixed-interval polling for things that converge outside our control.
//!
//! Port-forwards opening, namespaces finishing deletion and services becoming
//! reachable are all the same shape: ask a question every `interval`, give up
//! after `max_attempts`, and stop early when the thing we are waiting on can
//! no longer succeed (for example the tunnel process exited).

use std::future::Future;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::time::sleep;
use tracing::{debug, trace};

/// Answer from a single poll attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollVerdict {
    /// Condition holds; stop polling.
    Ready,
    /// Not yet; try again after the interval.
    Pending,
    /// Condition can never hold; stop polling and fail.
    Abort(String),
}

/// Errors returned by [`poll_until`].
#[derive(Debug, Error)]
pub enum PollError {
    #[error("{what} not ready after {attempts} attempts ({elapsed:?})")]
    Exhausted {
        what: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("{what} aborted: {reason}")]
    Aborted { what: String, reason: String },
}

/// How often and how many times to poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
        }
    }

    /// Upper bound on time spent sleeping between attempts.
    #[must_use]
    pub fn ceiling(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// Things devloop waits on, each with its documented bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitCategory {
    /// Local tunnel accepting connections (30 x 500ms = 15s)
    PortForward,

    /// Namespace gone after a delete (60 x 2s = 2min)
    NamespaceDeletion,

    /// Deployed service answering HTTP (10 x 2s)
    Reachability,
}

impl WaitCategory {
    /// Polling policy for this category.
    #[must_use]
    pub fn policy(&self) -> PollPolicy {
        match self {
            WaitCategory::PortForward => PollPolicy::new(Duration::from_millis(500), 30),
            WaitCategory::NamespaceDeletion => PollPolicy::new(Duration::from_secs(2), 60),
            WaitCategory::Reachability => PollPolicy::new(Duration::from_secs(2), 10),
        }
    }
}

/// Poll `check` until it reports [`PollVerdict::Ready`].
///
/// `check` receives the 1-based attempt number. There is no sleep after the
/// final attempt. Returns the attempt number that succeeded.
///
/// # Errors
///
/// `PollError::Aborted` as soon as `check` returns [`PollVerdict::Abort`];
/// `PollError::Exhausted` once every attempt came back pending.
pub async fn poll_until<F, Fut>(what: &str, policy: PollPolicy, mut check: F) -> Result<u32, PollError>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = PollVerdict>,
{
    let start = Instant::now();

    for attempt in 1..=policy.max_attempts {
        match check(attempt).await {
            PollVerdict::Ready => {
                debug!(what, attempt, "ready");
                return Ok(attempt);
            }
            PollVerdict::Abort(reason) => {
                return Err(PollError::Aborted {
                    what: what.to_string(),
                    reason,
                });
            }
            PollVerdict::Pending => {
                trace!(what, attempt, max = policy.max_attempts, "pending");
            }
        }

        if attempt < policy.max_attempts {
            sleep(policy.interval).await;
        }
    }

    Err(PollError::Exhausted {
        what: what.to_string(),
        attempts: policy.max_attempts,
        elapsed: start.elapsed(),
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    const FAST: PollPolicy = PollPolicy::new(Duration::from_millis(1), 5);

    #[test]
    fn test_wait_category_policies() {
        let pf = WaitCategory::PortForward.policy();
        assert_eq!(pf.interval, Duration::from_millis(500));
        assert_eq!(pf.max_attempts, 30);
        assert_eq!(pf.ceiling(), Duration::from_secs(15));

        assert_eq!(
            WaitCategory::NamespaceDeletion.policy().ceiling(),
            Duration::from_secs(120)
        );
        assert_eq!(WaitCategory::Reachability.policy().max_attempts, 10);
    }

    #[tokio::test]
    async fn test_poll_succeeds_immediately() {
        let attempt = poll_until("thing", FAST, |_| async { PollVerdict::Ready })
            .await
            .unwrap();
        assert_eq!(attempt, 1);
    }

    #[tokio::test]
    async fn test_poll_succeeds_after_retry() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let attempt = poll_until("thing", FAST, move |_| {
            let counter = counter.clone();
            async move {
                if counter.fetch_add(1, Ordering::SeqCst) + 1 >= 3 {
                    PollVerdict::Ready
                } else {
                    PollVerdict::Pending
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(attempt, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_poll_exhausts_attempts() {
        let err = poll_until("namespace ci", FAST, |_| async { PollVerdict::Pending })
            .await
            .expect_err("should exhaust");

        match err {
            PollError::Exhausted { what, attempts, .. } => {
                assert_eq!(what, "namespace ci");
                assert_eq!(attempts, 5);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_poll_abort_stops_early() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let err = poll_until("tunnel", FAST, move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt == 2 {
                    PollVerdict::Abort("process exited".to_string())
                } else {
                    PollVerdict::Pending
                }
            }
        })
        .await
        .expect_err("should abort");

        assert!(matches!(err, PollError::Aborted { reason, .. } if reason == "process exited"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_does_not_sleep_after_last_attempt() {
        let policy = PollPolicy::new(Duration::from_secs(2), 3);
        let start = tokio::time::Instant::now();

        let _ = poll_until("thing", policy, |_| async { PollVerdict::Pending }).await;

        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(4) && elapsed < Duration::from_secs(6));
    }
}
