//! Bounded-concurrency fan-out for many independent requests.
//!
//! Each request runs on its own task, but a task is only spawned once a
//! semaphore permit is held, so there are never more than `max_concurrency`
//! requests in flight. Cancelling the bulk token stops dispatch; requests
//! already running are left to finish.

use std::future::Future;
use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::errors::FetchError;

/// Default in-flight limit for bulk fetches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Fan-out executor with a fixed in-flight limit.
#[derive(Clone, Copy, Debug)]
pub struct BulkOptimizer {
    max_concurrency: usize,
}

impl Default for BulkOptimizer {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONCURRENCY)
    }
}

impl BulkOptimizer {
    /// A limit of zero is treated as one.
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run `run` over every request, at most `max_concurrency` at a time.
    ///
    /// The output has one entry per request, in input order. Requests that
    /// were never dispatched because `cancel` fired come back as
    /// [`FetchError::Cancelled`].
    pub async fn execute_many<R, T, F, Fut>(
        &self,
        requests: Vec<R>,
        cancel: Option<CancellationToken>,
        run: F,
    ) -> Vec<Result<T, FetchError>>
    where
        R: Send + 'static,
        T: Send + 'static,
        F: Fn(R) -> Fut + Clone + Send + Sync + 'static,
        Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
    {
        let total = requests.len();
        let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
        let mut tasks = JoinSet::new();
        let mut results: Vec<Option<Result<T, FetchError>>> = (0..total).map(|_| None).collect();
        let mut dispatched = 0;

        for (index, request) in requests.into_iter().enumerate() {
            let acquire = semaphore.clone().acquire_owned();
            let permit = match &cancel {
                Some(token) => tokio::select! {
                    biased;
                    _ = token.cancelled() => None,
                    permit = acquire => permit.ok(),
                },
                None => acquire.await.ok(),
            };
            let Some(permit) = permit else {
                debug!(
                    "Bulk: dispatch stopped after {} of {} requests",
                    dispatched, total
                );
                break;
            };

            let run = run.clone();
            tasks.spawn(async move {
                let result = run(request).await;
                drop(permit);
                (index, result)
            });
            dispatched += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, result)) => results[index] = Some(result),
                Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
                Err(err) => warn!("Bulk: request task aborted: {}", err),
            }
        }

        let results: Vec<Result<T, FetchError>> = results
            .into_iter()
            .map(|r| r.unwrap_or(Err(FetchError::Cancelled)))
            .collect();

        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(
            "Bulk: {} requests, {} succeeded, {} failed",
            total,
            total - failed,
            failed
        );
        results
    }
}
