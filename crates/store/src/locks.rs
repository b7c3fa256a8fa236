//! Per-actor keyed locks.
//!
//! Side effects touching one actor's relationships must not run
//! concurrently; different actors may proceed in parallel.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of per-actor mutexes, created on first use.
#[derive(Debug, Default)]
pub struct ActorLocks {
    map: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ActorLocks {
    /// Create an empty lock map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for the given actor, waiting if another task holds it.
    pub async fn lock(&self, actor_id: &str) -> OwnedMutexGuard<()> {
        let entry = {
            let mut map = self.map.lock().await;
            Arc::clone(
                map.entry(actor_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        entry.lock_owned().await
    }
}
