//! Per-item single-flight registry and cooperative cancellation

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};

use super::SyncError;
use crate::config::ConcurrentSyncPolicy;
use crate::models::ItemId;

/// Tracks which items currently have a sync running
#[derive(Default)]
pub struct SingleFlight {
    active: Mutex<HashSet<ItemId>>,
    released: Condvar,
}

impl SingleFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the item for the caller until the returned guard is dropped
    pub fn acquire(
        &self,
        item_id: ItemId,
        policy: ConcurrentSyncPolicy,
    ) -> Result<FlightGuard<'_>, SyncError> {
        let mut active = self.active.lock().unwrap();

        while active.contains(&item_id) {
            match policy {
                ConcurrentSyncPolicy::Reject => {
                    return Err(SyncError::SyncAlreadyInProgress { item_id });
                }
                ConcurrentSyncPolicy::Wait => {
                    active = self.released.wait(active).unwrap();
                }
            }
        }

        active.insert(item_id);
        Ok(FlightGuard {
            registry: self,
            item_id,
        })
    }

    pub fn is_active(&self, item_id: ItemId) -> bool {
        self.active.lock().unwrap().contains(&item_id)
    }
}

/// Releases the item when dropped, including on early return or panic
pub struct FlightGuard<'a> {
    registry: &'a SingleFlight,
    item_id: ItemId,
}

impl Drop for FlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut active) = self.registry.active.lock() {
            active.remove(&self.item_id);
        }
        self.registry.released.notify_all();
    }
}

/// Cancellation flag checked by the engine between pages
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; takes effect at the next page boundary
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
