use std::{
    collections::HashMap,
    sync::{Arc, Mutex, PoisonError},
};

use anyhow::Result;
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::store::{CacheEntry, RecordStore};

/// Cache-aside layer over the stored per-user portfolio summaries.
///
/// Writes for one user are serialised through that user's lock; reads and
/// other users are never blocked. Every invalidation bumps the user's
/// generation so a recompute that started earlier cannot publish its result.
/// A user's lock is only tracked while some operation or ticket holds it.
pub struct SummaryCache {
    store: Arc<dyn RecordStore>,
    slots: Mutex<HashMap<Uuid, Arc<AsyncMutex<u64>>>>,
}

/// Generation observed before a recompute read its source data. Holding the
/// ticket keeps the user's slot alive.
#[derive(Debug, Clone)]
pub struct CacheTicket {
    user_id: Uuid,
    generation: u64,
    slot: Arc<AsyncMutex<u64>>,
}

impl SummaryCache {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self {
            store,
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot(&self, user_id: Uuid) -> Arc<AsyncMutex<u64>> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.entry(user_id).or_default().clone()
    }

    /// Drops slots nobody else references. Slots are only handed out under the
    /// map lock, so an unreferenced slot has no operation or ticket in flight.
    fn sweep(&self) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        slots.retain(|_, slot| Arc::strong_count(slot) > 1);
    }

    pub async fn get(&self, user_id: Uuid) -> Result<Option<CacheEntry>> {
        self.store.get_cached_summary(user_id).await
    }

    pub async fn put(&self, user_id: Uuid, summary: &str) -> Result<CacheEntry> {
        let entry = {
            let slot = self.slot(user_id);
            let _guard = slot.lock().await;
            self.store.put_cached_summary(user_id, summary).await
        };
        self.sweep();
        entry
    }

    pub async fn ticket(&self, user_id: Uuid) -> CacheTicket {
        let slot = self.slot(user_id);
        let generation = *slot.lock().await;
        CacheTicket {
            user_id,
            generation,
            slot,
        }
    }

    /// Stores `summary` unless the user was invalidated after `ticket` was taken.
    pub async fn put_if_current(
        &self,
        ticket: CacheTicket,
        summary: &str,
    ) -> Result<Option<CacheEntry>> {
        let stored = {
            let guard = ticket.slot.lock().await;
            if *guard != ticket.generation {
                debug!(user_id = %ticket.user_id, "discarding summary computed from superseded data");
                Ok(None)
            } else {
                self.store
                    .put_cached_summary(ticket.user_id, summary)
                    .await
                    .map(Some)
            }
        };
        drop(ticket);
        self.sweep();
        stored
    }

    pub async fn invalidate(&self, user_id: Uuid) -> Result<()> {
        let deleted = {
            let slot = self.slot(user_id);
            let mut guard = slot.lock().await;
            *guard += 1;
            self.store.delete_cached_summary(user_id).await
        };
        self.sweep();
        deleted?;
        info!(%user_id, "invalidated cached summary");
        Ok(())
    }

    #[cfg(test)]
    fn tracked_users(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
