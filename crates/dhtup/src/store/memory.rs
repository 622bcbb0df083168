use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;

use super::{DhtStore, GetResponse, StoreError};
use crate::record::SignedItem;
use crate::target::{Salt, Target};

/// In-process DHT holding mutable items the way a BEP-44 node does
///
/// Items are verified on put, a put never replaces a newer item, and
///  the whole store can be taken offline to simulate an unreachable
///  network. Cloning shares the underlying table.
#[derive(Debug, Clone, Default)]
pub struct MemoryDht {
    inner: Arc<MemoryDhtInner>,
}

#[derive(Debug, Default)]
struct MemoryDhtInner {
    items: RwLock<HashMap<Target, SignedItem>>,
    offline: AtomicBool,
    closed: AtomicBool,
}

impl MemoryDht {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every request fail with `StoreError::Unreachable`
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.inner.items.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Store an item without any checks, as a misbehaving node might
    pub fn insert_unchecked(&self, target: Target, item: SignedItem) {
        self.inner.items.write().insert(target, item);
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Closed);
        }
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("memory dht is offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl DhtStore for MemoryDht {
    async fn get(&self, target: &Target, salt: &Salt) -> Result<Option<GetResponse>, StoreError> {
        self.check_available()?;
        let items = self.inner.items.read();
        // nodes answer by target; a salt mismatch means the caller derived
        //  the target from something else, which the item check catches
        let response = items.get(target).cloned().map(|item| GetResponse {
            item,
            nodes_queried: 1,
        });
        if let Some(response) = &response {
            if response.item.salt() != salt {
                tracing::debug!(
                    "memory dht: item at {} carries a different salt than requested",
                    target
                );
            }
        }
        Ok(response)
    }

    async fn put(&self, item: SignedItem) -> Result<(), StoreError> {
        self.check_available()?;
        item.verify()?;

        let target = item.target();
        let mut items = self.inner.items.write();
        if let Some(stored) = items.get(&target) {
            let same_value = stored.value() == item.value();
            if item.seq() < stored.seq() || (item.seq() == stored.seq() && !same_value) {
                return Err(StoreError::SeqTooLow {
                    seq: item.seq(),
                    stored: stored.seq(),
                });
            }
        }
        tracing::trace!("memory dht: stored seq {} at {}", item.seq(), target);
        items.insert(target, item);
        Ok(())
    }

    async fn close(&self) -> Result<(), StoreError> {
        self.inner.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
