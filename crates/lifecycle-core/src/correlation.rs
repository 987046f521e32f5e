//! Routing table from correlation keys to the channels awaiting results.
//!
//! Workers take the read lock to look up a destination; registration and
//! removal take the write lock. Each pool owns its own table.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::mpsc;

use crate::models::{CorrelationKey, CrawlResult};

#[derive(Clone, Default)]
pub(crate) struct CorrelationTable {
    routes: Arc<RwLock<HashMap<CorrelationKey, mpsc::Sender<CrawlResult>>>>,
}

/// Outcome of routing a correlated result.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// No caller is registered for the key any more.
    Unregistered,
    /// The caller is registered but its channel is closed or full.
    Rejected,
}

impl CorrelationTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Register every key against the same destination.
    ///
    /// The returned guard removes the keys again when dropped.
    pub(crate) fn register(
        &self,
        keys: Vec<CorrelationKey>,
        destination: &mpsc::Sender<CrawlResult>,
    ) -> Registration {
        {
            let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
            for key in &keys {
                routes.insert(*key, destination.clone());
            }
        }
        Registration {
            table: self.clone(),
            keys,
        }
    }

    /// Route a result to its registered channel without blocking.
    ///
    /// Destinations are sized to hold every result registered against them,
    /// so a full channel only happens if a caller reuses a key.
    pub(crate) fn deliver(&self, key: CorrelationKey, result: CrawlResult) -> Delivery {
        let destination = {
            let routes = self.routes.read().unwrap_or_else(PoisonError::into_inner);
            routes.get(&key).cloned()
        };

        match destination {
            Some(tx) => match tx.try_send(result) {
                Ok(()) => Delivery::Delivered,
                Err(_) => Delivery::Rejected,
            },
            None => Delivery::Unregistered,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.routes
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    fn remove(&self, keys: &[CorrelationKey]) {
        let mut routes = self.routes.write().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            routes.remove(key);
        }
    }
}

/// Scoped ownership of a set of registered keys.
pub(crate) struct Registration {
    table: CorrelationTable,
    keys: Vec<CorrelationKey>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.table.remove(&self.keys);
    }
}
