//! Shared in-memory object store.

use std::collections::HashMap;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::records::{
    Activity, Actor, CachedPublicKey, CollectionKind, Following, IncomingMessage, StoredObject,
};

/// Everything the store holds, under one lock.
#[derive(Debug, Default)]
pub(crate) struct StoreInner {
    pub(crate) actors: HashMap<String, Actor>,
    pub(crate) activities: HashMap<String, Activity>,
    pub(crate) objects: HashMap<String, StoredObject>,
    /// Quarantined messages, in receipt order.
    pub(crate) quarantine: Vec<IncomingMessage>,
    pub(crate) key_cache: HashMap<String, CachedPublicKey>,
    pub(crate) followings: Vec<Following>,
    pub(crate) collections: HashMap<(String, CollectionKind), Vec<String>>,
}

/// The in-memory object store shared by all repositories.
///
/// Repositories are the only access path; they take the lock per call and
/// never hold it across awaits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) async fn read(&self) -> RwLockReadGuard<'_, StoreInner> {
        self.inner.read().await
    }

    pub(crate) async fn write(&self) -> RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().await
    }
}
