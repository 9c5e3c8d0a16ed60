//! Polling until a resource reports absence.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;

use crate::cancel::CancelToken;
use crate::error::{Classify, ClusterError, ErrorClass, PurgeError};

/// Bounds of a single wait phase. Invariant: `timeout > poll_interval > 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    timeout: Duration,
    poll_interval: Duration,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            poll_interval: Duration::from_secs(1),
        }
    }
}

impl WaitPolicy {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Result<Self, PurgeError> {
        if poll_interval.is_zero() || timeout <= poll_interval {
            return Err(PurgeError::InvalidPolicy {
                timeout,
                poll_interval,
            });
        }
        Ok(Self {
            timeout,
            poll_interval,
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// The existence check reported not-found.
    Terminated,
    /// The deadline passed while the resource still existed. Not an error by itself.
    TimedOut,
}

/// Call `check` immediately and then every poll interval until it reports
/// not-found, the deadline elapses or it fails with any other error.
///
/// The deadline is measured from the first call. A check still in flight when
/// the deadline passes counts as timed out, so the wait never outlives
/// `timeout + poll_interval`.
pub async fn await_absence<F, Fut>(
    cancel: &CancelToken,
    policy: &WaitPolicy,
    mut check: F,
) -> Result<WaitOutcome, PurgeError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), ClusterError>>,
{
    let deadline = Instant::now() + policy.timeout;

    loop {
        let checked = cancel
            .guard(tokio::time::timeout_at(deadline, check()))
            .await?;

        match checked {
            Err(_elapsed) => return Ok(WaitOutcome::TimedOut),
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                return match err.class() {
                    ErrorClass::NotFound => Ok(WaitOutcome::Terminated),
                    _ => Err(PurgeError::Cluster {
                        context: "existence check failed".to_string(),
                        source: err,
                    }),
                };
            }
        }

        let next = Instant::now() + policy.poll_interval;
        if next >= deadline {
            cancel.guard(tokio::time::sleep_until(deadline)).await?;
            return Ok(WaitOutcome::TimedOut);
        }
        cancel.guard(tokio::time::sleep_until(next)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn policy() -> WaitPolicy {
        WaitPolicy::new(Duration::from_secs(30), Duration::from_secs(1)).unwrap()
    }

    #[test]
    fn test_policy_invariant() {
        assert!(WaitPolicy::new(Duration::from_secs(1), Duration::from_secs(1)).is_err());
        assert!(WaitPolicy::new(Duration::from_secs(5), Duration::ZERO).is_err());
        let policy = WaitPolicy::new(Duration::from_secs(5), Duration::from_millis(250)).unwrap();
        assert_eq!(policy.timeout(), Duration::from_secs(5));
        assert_eq!(policy.poll_interval(), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_found_on_first_call_terminates_immediately() {
        let calls = Arc::new(AtomicUsize::new(0));
        let start = Instant::now();

        let outcome = await_absence(&CancelToken::new(), &policy(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClusterError::NotFound("pod".into()))
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Terminated);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminates_once_resource_disappears() {
        let calls = Arc::new(AtomicUsize::new(0));

        let outcome = await_absence(&CancelToken::new(), &policy(), || {
            let calls = calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) < 3 {
                    Ok(())
                } else {
                    Err(ClusterError::NotFound("pod".into()))
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::Terminated);
        assert_eq!(calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_absent_times_out_within_bound() {
        let policy = policy();
        let start = Instant::now();

        let outcome = await_absence(&CancelToken::new(), &policy, || async { Ok(()) })
            .await
            .unwrap();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() <= policy.timeout() + policy.poll_interval());
        assert!(start.elapsed() >= policy.timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_check_is_bounded_by_deadline() {
        let policy = policy();
        let start = Instant::now();

        let outcome = await_absence(&CancelToken::new(), &policy, || async {
            std::future::pending::<Result<(), ClusterError>>().await
        })
        .await
        .unwrap();

        assert_eq!(outcome, WaitOutcome::TimedOut);
        assert!(start.elapsed() <= policy.timeout() + policy.poll_interval());
    }

    #[tokio::test(start_paused = true)]
    async fn test_other_error_aborts_without_polling_again() {
        let calls = Arc::new(AtomicUsize::new(0));

        let err = await_absence(&CancelToken::new(), &policy(), || {
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(ClusterError::other("connection refused"))
            }
        })
        .await
        .unwrap_err();

        assert!(matches!(err, PurgeError::Cluster { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_polling() {
        let cancel = CancelToken::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                await_absence(&cancel, &WaitPolicy::default(), || async { Ok(()) }).await
            })
        };

        tokio::time::sleep(Duration::from_secs(3)).await;
        cancel.cancel();

        let result = waiter.await.unwrap();
        assert!(matches!(result, Err(PurgeError::Cancelled)));
    }
}
