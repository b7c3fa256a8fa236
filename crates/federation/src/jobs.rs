//! Background job seam.
//!
//! The pipeline enqueues work through [`JobQueue`] without knowing how jobs
//! are executed; the queue crate provides the channel-backed implementation
//! and tests provide recording stubs.

use async_trait::async_trait;
use postbox_common::AppResult;
use serde::{Deserialize, Serialize};

/// Validate one quarantined message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidateJob {
    /// Quarantine entry id.
    pub message_id: String,
}

/// Fetch a remote actor document in the background.
///
/// The `uuid` ticket identifies this fetch to the `/asyncResult` callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchTicket {
    pub uuid: String,
    pub actor_id: String,
}

/// Deliver one stored activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryJob {
    pub activity_id: String,
    /// Fan-out of a just-received activity (skip address resolution) rather
    /// than outbound delivery of a local one.
    pub incoming: bool,
}

/// Enqueue-only view of the background queues.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Enqueue validation of a quarantined message.
    async fn enqueue_validation(&self, job: ValidateJob) -> AppResult<()>;

    /// Enqueue a background actor fetch.
    async fn enqueue_fetch(&self, ticket: FetchTicket) -> AppResult<()>;

    /// Enqueue delivery of a stored activity.
    async fn enqueue_delivery(&self, job: DeliveryJob) -> AppResult<()>;
}
