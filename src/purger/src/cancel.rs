//! Shared cancellation for a group of concurrent deletions.
//!
//! A [`CancelToken`] is cancelled explicitly, or implicitly when any of its
//! ancestors is. Fan-outs derive a child token for their tasks so a failure
//! only stops its own subtree.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use tokio::sync::watch;

use crate::error::PurgeError;

#[derive(Clone, Debug)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    tx: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelToken>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(Inner { tx, parent }),
        }
    }

    /// A token that is cancelled with `self` but can also be cancelled on its own.
    pub fn child(&self) -> CancelToken {
        Self::with_parent(Some(self.clone()))
    }

    pub fn cancel(&self) {
        self.inner.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.tx.borrow()
            || self
                .inner
                .parent
                .as_ref()
                .is_some_and(CancelToken::is_cancelled)
    }

    /// Resolves once this token or one of its ancestors is cancelled.
    pub fn cancelled(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            let own = wait_for_flag(self.inner.tx.subscribe());
            match &self.inner.parent {
                Some(parent) => {
                    tokio::select! {
                        _ = own => {},
                        _ = parent.cancelled() => {},
                    }
                }
                None => own.await,
            }
        })
    }

    /// Drive `fut` to completion unless the token is cancelled first.
    pub async fn guard<F: Future>(&self, fut: F) -> Result<F::Output, PurgeError> {
        if self.is_cancelled() {
            return Err(PurgeError::Cancelled);
        }
        tokio::select! {
            out = fut => Ok(out),
            _ = self.cancelled() => Err(PurgeError::Cancelled),
        }
    }

    /// Sleep for `duration`, returning early with [`PurgeError::Cancelled`].
    pub async fn sleep(&self, duration: Duration) -> Result<(), PurgeError> {
        self.guard(tokio::time::sleep(duration)).await
    }
}

async fn wait_for_flag(mut rx: watch::Receiver<bool>) {
    loop {
        let cancelled = *rx.borrow_and_update();
        if cancelled {
            return;
        }
        if rx.changed().await.is_err() {
            // sender lives as long as the token, so this only happens on teardown
            std::future::pending::<()>().await;
        }
    }
}
