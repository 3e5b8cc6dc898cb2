//! Per-key execution coalescing.
//!
//! While an operation is in flight for a key, further `exec` calls for the
//! same key join the in-flight future instead of starting a new one, and
//! every caller resolves to the same result. Once the operation settles the
//! slot clears, so the next call starts fresh. Slots are created lazily and
//! kept for the life of the session; keys are user ids, so cardinality is
//! tiny.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use futures::future::{BoxFuture, FutureExt, Shared};

/// A clonable handle on an in-flight (or settled) operation.
pub type SharedOp<T> = Shared<BoxFuture<'static, T>>;

pub struct Throttle<K, T> {
    slots: Arc<Mutex<HashMap<K, SharedOp<T>>>>,
}

impl<K, T> Throttle<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            slots: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Run `make()` for `key`, unless an operation is already in flight for
    /// that key, in which case the in-flight future is returned and
    /// `make` is never called.
    pub fn exec<F, Fut>(&self, key: K, make: F) -> SharedOp<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let mut slots = self.slots.lock().unwrap();
        if let Some(in_flight) = slots.get(&key) {
            return in_flight.clone();
        }

        let operation = make();
        let slot_map = Arc::clone(&self.slots);
        let slot_key = key.clone();
        let shared = async move {
            let output = operation.await;
            slot_map.lock().unwrap().remove(&slot_key);
            output
        }
        .boxed()
        .shared();

        slots.insert(key, shared.clone());
        shared
    }
}

impl<K, T> Default for Throttle<K, T>
where
    K: Eq + Hash + Clone + Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}
