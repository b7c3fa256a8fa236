//! Worker loops for the pipeline queues.

mod deliver;
mod fetch;
mod validate;

pub use deliver::{DeliverContext, deliver_worker};
pub use fetch::{FetchContext, fetch_worker};
pub use validate::{ValidateContext, validate_worker};
