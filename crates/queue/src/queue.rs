//! Bounded in-process work queue.

use std::sync::Arc;

use postbox_common::{AppError, AppResult};
use tokio::sync::{Mutex, mpsc};

/// A bounded multi-producer work queue with competing consumers. Cloning
/// shares the channel; any number of workers may call [`WorkQueue::dequeue`]
/// and each job is handed to exactly one of them.
pub struct WorkQueue<T> {
    tx: mpsc::Sender<T>,
    rx: Arc<Mutex<mpsc::Receiver<T>>>,
}

impl<T> Clone for WorkQueue<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: Arc::clone(&self.rx),
        }
    }
}

impl<T: Send> WorkQueue<T> {
    /// Create a queue holding at most `capacity` pending jobs.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
        }
    }

    /// Enqueue a job, waiting for capacity when the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::Queue`] when all consumers are gone.
    pub async fn enqueue(&self, job: T) -> AppResult<()> {
        self.tx
            .send(job)
            .await
            .map_err(|_| AppError::Queue("Queue is closed".to_string()))
    }

    /// Take the next job, waiting until one arrives. `None` once all
    /// producers are gone and the queue has drained.
    pub async fn dequeue(&self) -> Option<T> {
        self.rx.lock().await.recv().await
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_fifo_order() {
        let queue = WorkQueue::new(8);
        for n in 0..3 {
            queue.enqueue(n).await.unwrap();
        }
        assert_eq!(queue.dequeue().await, Some(0));
        assert_eq!(queue.dequeue().await, Some(1));
        assert_eq!(queue.dequeue().await, Some(2));
    }

    #[tokio::test]
    async fn test_each_job_goes_to_one_consumer() {
        let queue = WorkQueue::new(8);
        for n in 0..4 {
            queue.enqueue(n).await.unwrap();
        }

        let a = queue.clone();
        let b = queue.clone();
        let mut taken = vec![
            a.dequeue().await.unwrap(),
            b.dequeue().await.unwrap(),
            a.dequeue().await.unwrap(),
            b.dequeue().await.unwrap(),
        ];
        taken.sort_unstable();
        assert_eq!(taken, vec![0, 1, 2, 3]);
    }
}
