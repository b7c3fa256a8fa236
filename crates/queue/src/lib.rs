//! In-process work queues and worker pools for postbox.
//!
//! Three bounded queues drive the pipeline: validation passes over
//! quarantined messages, background actor key fetches, and delivery
//! dispatch. [`runtime::Pipeline`] assembles the whole thing from a
//! [`postbox_common::Config`].

pub mod queue;
pub mod queue_impl;
pub mod retry;
pub mod runtime;
pub mod workers;

pub use queue::WorkQueue;
pub use queue_impl::ChannelJobQueue;
pub use retry::RetryConfig;
pub use runtime::Pipeline;
pub use workers::{
    DeliverContext, FetchContext, ValidateContext, deliver_worker, fetch_worker, validate_worker,
};
