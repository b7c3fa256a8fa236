//! [`JobQueue`] implementation over the in-process work queues.

use async_trait::async_trait;
use postbox_common::AppResult;
use postbox_federation::jobs::{DeliveryJob, FetchTicket, JobQueue, ValidateJob};

use crate::queue::WorkQueue;

/// The three pipeline queues behind the [`JobQueue`] seam: validation,
/// background key fetches, and delivery dispatch.
#[derive(Clone)]
pub struct ChannelJobQueue {
    validate: WorkQueue<ValidateJob>,
    fetch: WorkQueue<FetchTicket>,
    deliver: WorkQueue<DeliveryJob>,
}

impl ChannelJobQueue {
    /// Create the three queues, each bounded to `capacity`.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            validate: WorkQueue::new(capacity),
            fetch: WorkQueue::new(capacity),
            deliver: WorkQueue::new(capacity),
        }
    }

    /// The validation queue, for worker loops.
    #[must_use]
    pub fn validate_queue(&self) -> WorkQueue<ValidateJob> {
        self.validate.clone()
    }

    /// The key-fetch queue, for worker loops.
    #[must_use]
    pub fn fetch_queue(&self) -> WorkQueue<FetchTicket> {
        self.fetch.clone()
    }

    /// The delivery queue, for worker loops.
    #[must_use]
    pub fn deliver_queue(&self) -> WorkQueue<DeliveryJob> {
        self.deliver.clone()
    }
}

#[async_trait]
impl JobQueue for ChannelJobQueue {
    async fn enqueue_validation(&self, job: ValidateJob) -> AppResult<()> {
        self.validate.enqueue(job).await
    }

    async fn enqueue_fetch(&self, ticket: FetchTicket) -> AppResult<()> {
        self.fetch.enqueue(ticket).await
    }

    async fn enqueue_delivery(&self, job: DeliveryJob) -> AppResult<()> {
        self.deliver.enqueue(job).await
    }
}
