//! Object store for postbox.
//!
//! This crate provides the records and repository types the federation
//! pipeline reads and writes:
//!
//! - **Records**: activities, actors, quarantined messages, cached keys,
//!   follow relationships, collections
//! - **Store**: a shared in-memory [`MemoryStore`] with get/put/delete and
//!   field-level patch
//! - **Repositories**: one repository type per record family, mirrored on
//!   the store
//! - **Locks**: per-actor keyed mutexes serializing side effects

pub mod locks;
pub mod memory;
pub mod records;
pub mod repositories;

pub use locks::ActorLocks;
pub use memory::MemoryStore;
pub use records::{
    Activity, ActivityKind, Actor, AudienceField, CachedPublicKey, CollectionKind, Following,
    IncomingMessage, StoredObject,
};
pub use repositories::{
    ActivityRepository, ActorRepository, CollectionRepository, FollowingRepository,
    KeyCacheRepository, ObjectRepository, QuarantineRepository,
};
