//! Bounded-parallelism job dispatcher.
//!
//! Runs a list of independent fallible operations on at most `parallelism`
//! workers pulling from one shared feed. The first failure (or a cancel)
//! stops the feed and is returned immediately. Operations already handed to
//! a worker are left to finish on their own; their results are discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, mpsc};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::{CalError, CalResult};

#[derive(Debug, Clone, Copy)]
pub struct Dispatcher {
    parallelism: usize,
    op_timeout: Option<Duration>,
}

impl Dispatcher {
    /// A dispatcher running up to `parallelism` operations at once (at least one).
    pub fn new(parallelism: usize) -> Self {
        Dispatcher {
            parallelism: parallelism.max(1),
            op_timeout: None,
        }
    }

    /// Fail any single operation that runs longer than `limit`.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.op_timeout = Some(limit);
        self
    }

    pub fn parallelism(&self) -> usize {
        self.parallelism
    }

    /// Invoke `op` once per item. Returns the first error, `Cancelled` when
    /// `cancel` fires first, or `Ok` once every operation has succeeded.
    pub async fn run<T, F, Fut>(
        &self,
        items: Vec<T>,
        cancel: &CancellationToken,
        op: F,
    ) -> CalResult<()>
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CalResult<()>> + Send + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Ok(());
        }
        if cancel.is_cancelled() {
            return Err(CalError::Cancelled);
        }

        let workers = self.parallelism.min(total);
        debug!(total, workers, "dispatching operations");

        let feed = Arc::new(Mutex::new(items.into_iter()));
        let op = Arc::new(op);
        let stop = cancel.child_token();
        let (status_tx, mut status_rx) = mpsc::channel::<CalResult<()>>(workers);
        let mut handles = Vec::with_capacity(workers);

        for _ in 0..workers {
            let feed = Arc::clone(&feed);
            let op = Arc::clone(&op);
            let stop = stop.clone();
            let status_tx = status_tx.clone();
            let op_timeout = self.op_timeout;

            handles.push(tokio::spawn(async move {
                loop {
                    if stop.is_cancelled() {
                        break;
                    }
                    let Some(item) = feed.lock().await.next() else {
                        break;
                    };
                    let outcome = run_one(op(item), op_timeout).await;
                    if status_tx.send(outcome).await.is_err() {
                        break;
                    }
                }
            }));
        }
        drop(status_tx);

        let mut completed = 0;
        while completed < total {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    stop.cancel();
                    return Err(CalError::Cancelled);
                }
                status = status_rx.recv() => match status {
                    Some(Ok(())) => completed += 1,
                    Some(Err(err)) => {
                        stop.cancel();
                        return Err(err);
                    }
                    None => {
                        // Every worker exited with operations unreported
                        for handle in handles {
                            handle.await?;
                        }
                        return Err(CalError::Internal(format!(
                            "{} of {total} operations never reported",
                            total - completed
                        )));
                    }
                },
            }
        }

        Ok(())
    }
}

async fn run_one<Fut>(fut: Fut, op_timeout: Option<Duration>) -> CalResult<()>
where
    Fut: Future<Output = CalResult<()>>,
{
    match op_timeout {
        Some(limit) => timeout(limit, fut)
            .await
            .map_err(|_| CalError::Timeout(limit))?,
        None => fut.await,
    }
}
