//! Bounded-concurrency fan-out for batch operations.
//!
//! Every item runs as its own task on a [`JoinSet`], gated by a counting
//! [`Semaphore`]. Items are independent: one failure never aborts the
//! others, and completions arrive in no particular order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::error::{CacheError, Result};

/// Runs per-item operations with at most `limit` in flight.
#[derive(Debug, Clone)]
pub struct BatchRunner {
    limit: usize,
}

impl BatchRunner {
    pub fn new(limit: usize) -> Self {
        Self { limit: limit.max(1) }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    /// Run `op` for every item and collect `(index, outcome)` pairs.
    ///
    /// Items still waiting or running when `cancel` fires resolve to
    /// [`CacheError::Cancelled`]; when `stop` fires they resolve to
    /// [`CacheError::Stopped`]. The output holds one pair per input item.
    pub async fn run<T, R, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        stop: &CancellationToken,
        op: F,
    ) -> Vec<(usize, Result<R>)>
    where
        R: Send + 'static,
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<R>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(self.limit));
        let mut join_set = JoinSet::new();
        let total = items.len();

        for (index, item) in items.into_iter().enumerate() {
            let work = op(item);
            let sem = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let stop = stop.clone();

            join_set.spawn(async move {
                let outcome = tokio::select! {
                    biased;
                    () = stop.cancelled() => Err(CacheError::Stopped),
                    () = cancel.cancelled() => Err(CacheError::Cancelled),
                    result = async {
                        let _permit = sem.acquire_owned().await.map_err(|_| CacheError::Stopped)?;
                        work.await
                    } => result,
                };
                (index, outcome)
            });
        }

        let mut outcomes = Vec::with_capacity(total);
        let mut reported = vec![false; total];
        let mut failure = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, outcome)) => {
                    reported[index] = true;
                    outcomes.push((index, outcome));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "batch worker failed");
                    failure = Some(e.to_string());
                }
            }
        }

        // A worker that panicked never reported its index.
        if let Some(reason) = failure {
            for (index, _) in reported.iter().enumerate().filter(|(_, done)| !**done) {
                outcomes.push((index, Err(CacheError::Worker(reason.clone()))));
            }
        }
        outcomes
    }
}
