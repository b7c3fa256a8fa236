//! Repository types over the shared store.
//!
//! One repository per record family, each cheaply cloneable and carrying an
//! `Arc` of the store.

mod activity;
mod actor;
mod collection;
mod following;
mod key_cache;
mod object;
mod quarantine;

pub use activity::ActivityRepository;
pub use actor::ActorRepository;
pub use collection::CollectionRepository;
pub use following::FollowingRepository;
pub use key_cache::KeyCacheRepository;
pub use object::ObjectRepository;
pub use quarantine::QuarantineRepository;
