use std::future::Future;

use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};

type Job = BoxFuture<'static, ()>;

/// FIFO serializer for remote mutations: at most one submitted task runs at
/// a time, in submission order. A task's failure reaches only its own
/// submitter; the worker keeps draining the queue afterwards.
#[derive(Clone)]
pub struct SerialQueue {
    tx: mpsc::UnboundedSender<Job>,
}

impl SerialQueue {
    pub fn new() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Job>();
        tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                job.await;
            }
        });
        Self { tx }
    }

    /// Appends `task` after everything already queued. The receiver yields
    /// the task's output once it has run; dropping the receiver is fine.
    pub fn enqueue<F, T>(&self, task: F) -> oneshot::Receiver<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (done_tx, done_rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = done_tx.send(task.await);
        });
        // Send only fails when the worker is gone; the receiver then
        // reports a closed channel to the submitter.
        let _ = self.tx.send(job);
        done_rx
    }
}
