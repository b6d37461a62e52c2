//! Fail-fast structured concurrency.
//!
//! A [`TaskGroup`] runs units of work on the runtime, at most `limit` at a
//! time. The first unit to fail cancels the rest, and [`TaskGroup::wait`]
//! returns only after every unit has finished or unwound.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

/// Why a group stopped early.
#[derive(Debug)]
pub enum Aborted<E> {
    /// A unit returned an error
    Failed(E),

    /// A unit panicked
    Panicked(String),

    /// The parent token was cancelled before all units finished
    Cancelled,
}

/// A bounded group of units sharing one cancellation token.
#[derive(Debug)]
pub struct TaskGroup<E> {
    tasks: JoinSet<Option<Result<(), E>>>,
    permits: Arc<Semaphore>,
    token: CancellationToken,
}

impl<E> TaskGroup<E>
where
    E: Send + 'static,
{
    /// Create a group whose token is a child of `parent`.
    pub fn new(parent: &CancellationToken, limit: usize) -> Self {
        Self {
            tasks: JoinSet::new(),
            permits: Arc::new(Semaphore::new(limit.max(1))),
            token: parent.child_token(),
        }
    }

    /// The token cancelled when the group aborts.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    /// Number of units not yet collected.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether the group has no units.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Spawn a unit. It waits for a permit and stops at the next await point
    /// once the group is cancelled.
    pub fn spawn<F>(&mut self, unit: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        let permits = self.permits.clone();
        let token = self.token.clone();

        self.tasks.spawn(async move {
            let _permit = tokio::select! {
                biased;
                _ = token.cancelled() => return None,
                permit = permits.acquire_owned() => permit.ok()?,
            };

            tokio::select! {
                biased;
                _ = token.cancelled() => None,
                result = unit => Some(result),
            }
        });
    }

    /// Wait for every unit, returning the first failure.
    pub async fn wait(mut self) -> Result<(), Aborted<E>> {
        let mut first = None;
        let mut interrupted = false;

        while let Some(joined) = self.tasks.join_next().await {
            let aborted = match joined {
                Ok(Some(Ok(()))) => continue,
                Ok(Some(Err(error))) => Aborted::Failed(error),
                Ok(None) => {
                    interrupted = true;
                    continue;
                }
                Err(error) if error.is_panic() => Aborted::Panicked(panic_message(error)),
                Err(_) => {
                    interrupted = true;
                    continue;
                }
            };

            if first.is_none() {
                self.token.cancel();
                first = Some(aborted);
            }
        }

        match first {
            Some(aborted) => Err(aborted),
            None if interrupted => Err(Aborted::Cancelled),
            None => Ok(()),
        }
    }
}

fn panic_message(error: JoinError) -> String {
    let payload = error.into_panic();
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
