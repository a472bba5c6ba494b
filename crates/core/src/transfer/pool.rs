//! Fixed-size worker pool over a bounded queue

use std::future::Future;
use std::sync::Arc;

use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Default worker count: the machine's available parallelism
pub fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// `size` tasks draining one queue
///
/// Workers stop when the queue closes and is empty, or when the token is
/// cancelled. Items still queued at cancellation are dropped.
pub struct WorkerPool {
    tasks: JoinSet<()>,
}

impl WorkerPool {
    pub fn spawn<T, F, Fut>(
        size: usize,
        queue: mpsc::Receiver<T>,
        cancel: CancellationToken,
        work: F,
    ) -> Self
    where
        T: Send + 'static,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send,
    {
        let queue = Arc::new(Mutex::new(queue));
        let work = Arc::new(work);
        let mut tasks = JoinSet::new();
        for worker in 0..size.max(1) {
            let queue = queue.clone();
            let work = work.clone();
            let cancel = cancel.clone();
            tasks.spawn(async move {
                loop {
                    let next = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => None,
                        item = async { queue.lock().await.recv().await } => item,
                    };
                    match next {
                        Some(item) => work(item).await,
                        None => break,
                    }
                }
                tracing::trace!(worker, "worker finished");
            });
        }
        Self { tasks }
    }

    pub fn size(&self) -> usize {
        self.tasks.len()
    }

    /// Wait for every worker to finish
    pub async fn join(mut self) {
        while let Some(joined) = self.tasks.join_next().await {
            if let Err(err) = joined {
                tracing::warn!(error = %err, "transfer worker failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_pool_drains_queue() {
        let (tx, rx) = mpsc::channel(4);
        let done = Arc::new(AtomicUsize::new(0));
        let counter = done.clone();
        let pool = WorkerPool::spawn(3, rx, CancellationToken::new(), move |n: usize| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(n, Ordering::SeqCst);
            }
        });
        assert_eq!(pool.size(), 3);
        for n in 1..=10 {
            tx.send(n).await.unwrap();
        }
        drop(tx);
        pool.join().await;
        assert_eq!(done.load(Ordering::SeqCst), 55);
    }

    #[tokio::test]
    async fn test_pool_stops_on_cancel() {
        let (_tx, rx) = mpsc::channel::<usize>(4);
        let cancel = CancellationToken::new();
        let pool = WorkerPool::spawn(2, rx, cancel.clone(), |_| async {});
        cancel.cancel();
        pool.join().await;
    }
}
