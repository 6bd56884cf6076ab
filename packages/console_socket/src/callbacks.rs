//! Callback capability sets handed to the socket manager.
//!
//! Every callback is optional. Missing callbacks are no-ops. Both sets are
//! cheap to clone so the registry can hand out snapshots and invoke them
//! without holding its lock.

use std::fmt;
use std::sync::Arc;

type InputFn = dyn Fn(&str) + Send + Sync;
type NotifyFn = dyn Fn() + Send + Sync;

/// Per-handle callbacks, invoked on the loop thread.
#[derive(Clone, Default)]
pub struct ConnectionCallbacks {
    on_received_input: Option<Arc<InputFn>>,
    on_connection_opened: Option<Arc<NotifyFn>>,
    on_connection_closed: Option<Arc<NotifyFn>>,
}

impl ConnectionCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called once per text message, with the payload verbatim.
    pub fn on_received_input(mut self, f: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_received_input = Some(Arc::new(f));
        self
    }

    pub fn on_connection_opened(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connection_opened = Some(Arc::new(f));
        self
    }

    pub fn on_connection_closed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_connection_closed = Some(Arc::new(f));
        self
    }

    pub(crate) fn received_input(&self, input: &str) {
        if let Some(f) = &self.on_received_input {
            f(input);
        }
    }

    pub(crate) fn connection_opened(&self) {
        if let Some(f) = &self.on_connection_opened {
            f();
        }
    }

    pub(crate) fn connection_closed(&self) {
        if let Some(f) = &self.on_connection_closed {
            f();
        }
    }
}

impl fmt::Debug for ConnectionCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionCallbacks")
            .field("on_received_input", &self.on_received_input.is_some())
            .field("on_connection_opened", &self.on_connection_opened.is_some())
            .field("on_connection_closed", &self.on_connection_closed.is_some())
            .finish()
    }
}

/// Listener-wide callbacks.
#[derive(Clone, Default)]
pub struct ServerCallbacks {
    on_socket_closed: Option<Arc<NotifyFn>>,
}

impl ServerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called on the loop thread after the listener has shut down.
    pub fn on_socket_closed(mut self, f: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_socket_closed = Some(Arc::new(f));
        self
    }

    pub(crate) fn socket_closed(&self) {
        if let Some(f) = &self.on_socket_closed {
            f();
        }
    }
}

impl fmt::Debug for ServerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerCallbacks")
            .field("on_socket_closed", &self.on_socket_closed.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn missing_callbacks_are_noops() {
        let cb = ConnectionCallbacks::new();
        cb.received_input("ignored");
        cb.connection_opened();
        cb.connection_closed();
        ServerCallbacks::new().socket_closed();
    }

    #[test]
    fn registered_callbacks_fire() {
        let input = Arc::new(Mutex::new(String::new()));
        let opened = Arc::new(AtomicUsize::new(0));

        let input_clone = input.clone();
        let opened_clone = opened.clone();
        let cb = ConnectionCallbacks::new()
            .on_received_input(move |s| input_clone.lock().unwrap().push_str(s))
            .on_connection_opened(move || {
                opened_clone.fetch_add(1, Ordering::SeqCst);
            });

        let snapshot = cb.clone();
        snapshot.received_input("ls\n");
        snapshot.connection_opened();
        snapshot.connection_closed();

        assert_eq!(*input.lock().unwrap(), "ls\n");
        assert_eq!(opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn debug_shows_which_callbacks_are_set() {
        let cb = ConnectionCallbacks::new().on_connection_closed(|| {});
        let dbg = format!("{:?}", cb);
        assert!(dbg.contains("on_connection_closed: true"));
        assert!(dbg.contains("on_received_input: false"));
    }
}
