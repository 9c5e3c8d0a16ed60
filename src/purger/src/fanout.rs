//! Fail-fast concurrent execution of independent tasks.
//!
//! Every task receives a child [`CancelToken`] shared with its siblings. The
//! first task to fail cancels that token; siblings that are still waiting
//! (for a permit, an API call or a poll interval) stop early. [`FanOut::wait`]
//! always drains every task before returning, so nothing outlives the run.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::debug;

use crate::cancel::CancelToken;
use crate::error::PurgeError;

pub struct FanOut {
    cancel: CancelToken,
    permits: Option<Arc<Semaphore>>,
    tasks: JoinSet<Result<(), PurgeError>>,
}

impl FanOut {
    /// Unbounded fan-out whose tasks are cancelled together with `parent`.
    pub fn new(parent: &CancelToken) -> Self {
        Self::with_limit(parent, None)
    }

    /// At most `limit` tasks run at once. `None` means no cap.
    pub fn with_limit(parent: &CancelToken, limit: Option<usize>) -> Self {
        Self {
            cancel: parent.child(),
            permits: limit.map(|n| Arc::new(Semaphore::new(n.max(1)))),
            tasks: JoinSet::new(),
        }
    }

    pub fn token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn spawn<F, Fut>(&mut self, task: F)
    where
        F: FnOnce(CancelToken) -> Fut,
        Fut: Future<Output = Result<(), PurgeError>> + Send + 'static,
    {
        let cancel = self.cancel.clone();
        let permits = self.permits.clone();
        let fut = task(cancel.clone());

        self.tasks.spawn(async move {
            let _permit = match permits {
                Some(permits) => Some(
                    cancel
                        .guard(permits.acquire_owned())
                        .await?
                        .map_err(|_| PurgeError::Cancelled)?,
                ),
                None => None,
            };
            cancel.guard(fut).await?
        });
    }

    /// Wait for every task and return the first failure.
    ///
    /// A bare cancellation is only reported when no task failed for a real reason.
    pub async fn wait(mut self) -> Result<(), PurgeError> {
        let mut first: Option<PurgeError> = None;

        while let Some(joined) = self.tasks.join_next().await {
            let result = match joined {
                Ok(result) => result,
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(_) => Err(PurgeError::Cancelled),
            };

            if let Err(err) = result {
                if !self.cancel.is_cancelled() {
                    debug!(error = %err, "Task failed, cancelling siblings");
                    self.cancel.cancel();
                }
                let replace = match &first {
                    None => true,
                    Some(current) => current.is_cancelled() && !err.is_cancelled(),
                };
                if replace {
                    first = Some(err);
                }
            }
        }

        match first {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Run all `tasks` concurrently and return the first error, if any.
pub async fn run_all<I, F, Fut>(
    parent: &CancelToken,
    limit: Option<usize>,
    tasks: I,
) -> Result<(), PurgeError>
where
    I: IntoIterator<Item = F>,
    F: FnOnce(CancelToken) -> Fut,
    Fut: Future<Output = Result<(), PurgeError>> + Send + 'static,
{
    let mut fanout = FanOut::with_limit(parent, limit);
    for task in tasks {
        fanout.spawn(task);
    }
    fanout.wait().await
}
