//! Following repository.

use std::sync::Arc;

use chrono::Utc;
use postbox_common::{AppResult, IdGenerator};

use crate::memory::MemoryStore;
use crate::records::Following;

/// Following repository for store operations.
#[derive(Clone)]
pub struct FollowingRepository {
    store: Arc<MemoryStore>,
    id_gen: IdGenerator,
}

impl FollowingRepository {
    /// Create a new following repository.
    #[must_use]
    pub const fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            id_gen: IdGenerator::new(),
        }
    }

    /// Find a relationship by follower and followee.
    pub async fn find_by_pair(
        &self,
        follower_id: &str,
        followee_id: &str,
    ) -> AppResult<Option<Following>> {
        Ok(self
            .store
            .read()
            .await
            .followings
            .iter()
            .find(|f| f.follower_id == follower_id && f.followee_id == followee_id)
            .cloned())
    }

    /// Create a relationship. Re-follows overwrite the existing row.
    pub async fn create(
        &self,
        follower_id: &str,
        followee_id: &str,
        pending: bool,
    ) -> AppResult<Following> {
        let row = Following {
            id: self.id_gen.generate(),
            follower_id: follower_id.to_string(),
            followee_id: followee_id.to_string(),
            pending,
            created_at: Utc::now(),
        };
        let mut inner = self.store.write().await;
        inner
            .followings
            .retain(|f| !(f.follower_id == follower_id && f.followee_id == followee_id));
        inner.followings.push(row.clone());
        Ok(row)
    }

    /// Flip a pending relationship to accepted. Returns `false` when no
    /// matching row exists.
    pub async fn mark_accepted(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        let mut inner = self.store.write().await;
        let Some(row) = inner
            .followings
            .iter_mut()
            .find(|f| f.follower_id == follower_id && f.followee_id == followee_id)
        else {
            return Ok(false);
        };
        row.pending = false;
        Ok(true)
    }

    /// Remove a relationship (Reject or Undo). Returns `false` when no
    /// matching row exists.
    pub async fn delete_by_pair(&self, follower_id: &str, followee_id: &str) -> AppResult<bool> {
        let mut inner = self.store.write().await;
        let before = inner.followings.len();
        inner
            .followings
            .retain(|f| !(f.follower_id == follower_id && f.followee_id == followee_id));
        Ok(inner.followings.len() < before)
    }

    /// Accepted followers of an actor.
    pub async fn followers_of(&self, followee_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .read()
            .await
            .followings
            .iter()
            .filter(|f| f.followee_id == followee_id && !f.pending)
            .map(|f| f.follower_id.clone())
            .collect())
    }

    /// Actors an actor follows (accepted only).
    pub async fn following_of(&self, follower_id: &str) -> AppResult<Vec<String>> {
        Ok(self
            .store
            .read()
            .await
            .followings
            .iter()
            .filter(|f| f.follower_id == follower_id && !f.pending)
            .map(|f| f.followee_id.clone())
            .collect())
    }
}
