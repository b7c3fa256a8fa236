//! ActivityPub federation for postbox.
//!
//! Covers both directions of the wire: inbound messages land in the
//! quarantine queue and pass through HTTP Signature validation before any
//! side effect runs, while outbound activities resolve their audience to
//! concrete inboxes and go out signed. Network access is abstracted behind
//! [`client::ApTransport`] and background work behind [`jobs::JobQueue`] so
//! the pipeline can be driven synchronously in tests.

pub mod client;
pub mod delivery;
pub mod handler;
pub mod jobs;
pub mod keys;
pub mod processor;
pub mod recipients;
pub mod signature;
pub mod test_utils;
pub mod validation;

pub use client::{ApClient, ApTransport, FetchOutcome};
pub use delivery::DeliveryDispatcher;
pub use handler::FederationState;
pub use jobs::{DeliveryJob, FetchTicket, JobQueue, ValidateJob};
pub use keys::KeyResolver;
pub use processor::SideEffectEngine;
pub use recipients::RecipientResolver;
pub use validation::{InboxValidator, ValidationOutcome};
