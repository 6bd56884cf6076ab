//! Transport event dispatcher.
//!
//! Turns raw transport events into registry lookups and callback calls.
//! Runs only on the loop thread. Events whose resource path carries no
//! handle are dropped silently.

use axum::http::StatusCode;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use crate::registry::ConnectionRegistry;
use crate::transport::{Connection, EventSink};

const SEPARATOR: char = '/';

/// Extract the handle from a resource path such as `/terminal/<handle>/`.
///
/// The path must end with a separator; the handle is the segment right
/// before it. Returns `None` for `/terminal/abc`, `/terminal//` and paths
/// with no other separator.
pub fn handle_from_path(path: &str) -> Option<&str> {
    let trimmed = path.strip_suffix(SEPARATOR)?;
    let (_, handle) = trimmed.rsplit_once(SEPARATOR)?;
    if handle.is_empty() {
        None
    } else {
        Some(handle)
    }
}

/// Number of connections between their open and close events.
#[derive(Debug, Default)]
pub struct ActiveConnections(AtomicUsize);

impl ActiveConnections {
    pub fn opened(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    /// Saturates at zero.
    pub fn closed(&self) {
        let _ = self
            .0
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(0, Ordering::SeqCst);
    }
}

pub struct Dispatcher<C> {
    registry: Arc<ConnectionRegistry<C>>,
    active: Arc<ActiveConnections>,
}

impl<C: Connection> Dispatcher<C> {
    pub fn new(registry: Arc<ConnectionRegistry<C>>, active: Arc<ActiveConnections>) -> Self {
        Self { registry, active }
    }
}

impl<C: Connection> EventSink<C> for Dispatcher<C> {
    fn on_open(&self, conn: &C) {
        let Some(handle) = handle_from_path(conn.resource_path()) else {
            debug!(conn_id = conn.id(), path = conn.resource_path(), "Open without handle, dropping");
            return;
        };

        self.active.opened();
        let record = self.registry.attach(handle, conn.clone());
        debug!(conn_id = conn.id(), handle, "Connection opened");
        record.callbacks.connection_opened();
    }

    fn on_message(&self, conn: &C, payload: &str) {
        let Some(handle) = handle_from_path(conn.resource_path()) else {
            return;
        };

        match self.registry.get(handle) {
            Some(record) => record.callbacks.received_input(payload),
            None => debug!(conn_id = conn.id(), handle, "Message for unregistered handle"),
        }
    }

    fn on_close(&self, conn: &C) {
        let Some(handle) = handle_from_path(conn.resource_path()) else {
            return;
        };

        self.active.closed();
        debug!(conn_id = conn.id(), handle, "Connection closed");
        // The record stays so a later listen() for this handle still finds it.
        let Some(record) = self.registry.get(handle) else {
            return;
        };
        match &record.connection {
            Some(current) if current.id() != conn.id() => {
                debug!(
                    conn_id = conn.id(),
                    current = current.id(),
                    handle,
                    "Superseded connection closed"
                );
            }
            _ => record.callbacks.connection_closed(),
        }
    }

    fn on_http(&self, path: &str) -> StatusCode {
        debug!(path, "Rejecting non-upgrade request");
        StatusCode::NOT_FOUND
    }
}
