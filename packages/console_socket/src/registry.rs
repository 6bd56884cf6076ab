//! Handle → connection record table.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::callbacks::ConnectionCallbacks;

/// Binding of a handle to its (possibly stale) transport connection and its
/// callbacks. `connection` is `None` until the first open event.
#[derive(Clone, Debug)]
pub struct ConnectionRecord<C> {
    pub handle: String,
    pub connection: Option<C>,
    pub callbacks: ConnectionCallbacks,
}

impl<C> ConnectionRecord<C> {
    pub fn new(handle: impl Into<String>, callbacks: ConnectionCallbacks) -> Self {
        Self {
            handle: handle.into(),
            connection: None,
            callbacks,
        }
    }
}

/// Thread-safe registry. Every operation takes the lock once and returns
/// owned snapshots, so callers never hold the lock while running callbacks.
#[derive(Debug)]
pub struct ConnectionRegistry<C> {
    records: Mutex<HashMap<String, ConnectionRecord<C>>>,
}

impl<C> Default for ConnectionRegistry<C> {
    fn default() -> Self {
        Self {
            records: Mutex::new(HashMap::new()),
        }
    }
}

impl<C: Clone> ConnectionRegistry<C> {
    pub fn new() -> Self {
        Self::default()
    }

    // The map is only touched by short, non-panicking operations, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ConnectionRecord<C>>> {
        self.records.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn get(&self, handle: &str) -> Option<ConnectionRecord<C>> {
        self.lock().get(handle).cloned()
    }

    pub fn set(&self, record: ConnectionRecord<C>) {
        self.lock().insert(record.handle.clone(), record);
    }

    pub fn remove(&self, handle: &str) -> Option<ConnectionRecord<C>> {
        self.lock().remove(handle)
    }

    pub fn clear(&self) {
        self.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn contains(&self, handle: &str) -> bool {
        self.lock().contains_key(handle)
    }

    /// Install `callbacks` for `handle`, keeping any connection already
    /// attached. Returns `true` when the record did not exist before.
    pub fn subscribe(&self, handle: &str, callbacks: ConnectionCallbacks) -> bool {
        let mut records = self.lock();
        match records.get_mut(handle) {
            Some(record) => {
                record.callbacks = callbacks;
                false
            }
            None => {
                records.insert(handle.to_string(), ConnectionRecord::new(handle, callbacks));
                true
            }
        }
    }

    /// Point `handle` at a freshly opened connection, creating an empty
    /// record if nobody has subscribed yet. Returns the updated record.
    pub fn attach(&self, handle: &str, connection: C) -> ConnectionRecord<C> {
        let mut records = self.lock();
        let record = records
            .entry(handle.to_string())
            .or_insert_with(|| ConnectionRecord::new(handle, ConnectionCallbacks::default()));
        record.connection = Some(connection);
        record.clone()
    }
}
