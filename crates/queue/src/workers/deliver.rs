//! Delivery worker.

use std::sync::Arc;

use postbox_federation::delivery::DeliveryDispatcher;
use postbox_federation::jobs::DeliveryJob;
use tracing::error;

use crate::queue::WorkQueue;

/// Context for the delivery workers.
#[derive(Clone)]
pub struct DeliverContext {
    pub dispatcher: Arc<DeliveryDispatcher>,
}

/// Drain the delivery queue. Per-endpoint failures are absorbed inside the
/// dispatcher; an error here means the activity itself could not be loaded.
pub async fn deliver_worker(queue: WorkQueue<DeliveryJob>, ctx: DeliverContext) {
    while let Some(job) = queue.dequeue().await {
        if let Err(e) = ctx.dispatcher.deliver(&job.activity_id, job.incoming).await {
            error!(activity = %job.activity_id, error = %e, "Delivery dispatch failed");
        }
    }
}
