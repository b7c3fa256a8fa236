//! Validation worker.

use std::sync::Arc;

use postbox_federation::jobs::ValidateJob;
use postbox_federation::validation::InboxValidator;
use tracing::{debug, error};

use crate::queue::WorkQueue;

/// Context for the validation workers.
#[derive(Clone)]
pub struct ValidateContext {
    pub validator: Arc<InboxValidator>,
}

/// Drain the validation queue, running one validation pass per job. Exits
/// when the queue closes.
pub async fn validate_worker(queue: WorkQueue<ValidateJob>, ctx: ValidateContext) {
    while let Some(job) = queue.dequeue().await {
        match ctx.validator.validate(&job.message_id).await {
            Ok(outcome) => {
                debug!(message = %job.message_id, outcome = ?outcome, "Validation pass done");
            }
            Err(e) => error!(message = %job.message_id, error = %e, "Validation pass failed"),
        }
    }
}
