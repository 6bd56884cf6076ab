//! Lifecycle controller and public API.
//!
//! `ConsoleSocket` owns one listener and the background thread that runs
//! the transport's accept loop. All dispatcher callbacks run on that
//! thread. Public methods can be called from any thread; they only take
//! short locks and never wait on the loop thread, except `stop_server`,
//! which joins it.

use rand::SeedableRng;
use rand::rngs::StdRng;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle, ThreadId};
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};

use crate::callbacks::{ConnectionCallbacks, ServerCallbacks};
use crate::config::SocketConfig;
use crate::dispatch::{ActiveConnections, Dispatcher};
use crate::error::SocketError;
use crate::port::{self, StackProbe};
use crate::registry::ConnectionRegistry;
use crate::transport::{Connection, EventSink, Transport, WsTransport};

/// Background worker driving the accept loop.
struct LoopWorker {
    shutdown: oneshot::Sender<()>,
    thread: JoinHandle<()>,
}

impl LoopWorker {
    fn thread_id(&self) -> ThreadId {
        self.thread.thread().id()
    }
}

enum Lifecycle {
    Idle,
    Running(LoopWorker),
    /// `stop_server` took the worker and is joining it.
    Stopping,
}

struct Controller {
    state: Lifecycle,
    /// Seeded on first start, then reused for every later start.
    rng: Option<StdRng>,
}

pub struct ConsoleSocket<T: Transport = WsTransport> {
    config: SocketConfig,
    transport: Arc<T>,
    probe: Box<dyn StackProbe>,
    registry: Arc<ConnectionRegistry<T::Connection>>,
    active: Arc<ActiveConnections>,
    controller: Mutex<Controller>,
    port: AtomicU16,
}

impl ConsoleSocket<WsTransport> {
    pub fn new(config: SocketConfig) -> Self {
        Self::with_transport(config, Arc::new(WsTransport::new()))
    }
}

impl Default for ConsoleSocket<WsTransport> {
    fn default() -> Self {
        Self::new(SocketConfig::default())
    }
}

impl<T: Transport> ConsoleSocket<T> {
    pub fn with_transport(config: SocketConfig, transport: Arc<T>) -> Self {
        Self {
            config,
            transport,
            probe: port::default_probe(),
            registry: Arc::new(ConnectionRegistry::new()),
            active: Arc::new(ActiveConnections::default()),
            controller: Mutex::new(Controller {
                state: Lifecycle::Idle,
                rng: None,
            }),
            port: AtomicU16::new(0),
        }
    }

    /// Replace the dual-stack probe used when no host is configured.
    pub fn with_probe(mut self, probe: impl StackProbe + 'static) -> Self {
        self.probe = Box::new(probe);
        self
    }

    /// Use `rng` for port selection instead of an OS-seeded generator.
    pub fn with_rng(self, rng: StdRng) -> Self {
        self.lock_controller().rng = Some(rng);
        self
    }

    fn lock_controller(&self) -> MutexGuard<'_, Controller> {
        self.controller.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bind_host(&self) -> IpAddr {
        self.config
            .host
            .unwrap_or_else(|| port::wildcard_addr(self.probe.as_ref()))
    }

    /// Start the listener and its loop thread unless already running.
    pub fn ensure_server_running(&self, callbacks: ServerCallbacks) -> Result<(), SocketError> {
        let mut controller = self.lock_controller();
        match controller.state {
            Lifecycle::Running(_) => return Ok(()),
            Lifecycle::Stopping => return Err(SocketError::ShuttingDown),
            Lifecycle::Idle => {}
        }

        let host = self.bind_host();
        let rng = controller.rng.get_or_insert_with(|| {
            debug!("Seeding console socket port selection");
            StdRng::from_os_rng()
        });
        let transport = &self.transport;
        let (port, listener) = self
            .config
            .ports
            .acquire(rng, |port| transport.listen(SocketAddr::new(host, port)))?;

        let sink: Arc<dyn EventSink<T::Connection>> = Arc::new(Dispatcher::new(
            self.registry.clone(),
            self.active.clone(),
        ));
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let transport = self.transport.clone();

        let thread = thread::Builder::new()
            .name(format!("console-socket-{}", port))
            .spawn(move || {
                if let Err(e) = transport.run(listener, sink, shutdown_rx) {
                    error!(port, "Console socket loop failed: {}", e);
                }
                info!(port, "Console socket listener closed");
                callbacks.socket_closed();
            })
            .map_err(|e| {
                SocketError::InvalidArgument(format!("failed to start listener thread: {}", e))
            })?;

        self.port.store(port, Ordering::SeqCst);
        controller.state = Lifecycle::Running(LoopWorker {
            shutdown: shutdown_tx,
            thread,
        });
        info!(port, %host, "Console socket listening");
        Ok(())
    }

    /// Stop accepting, drop every registered handle and join the loop
    /// thread. A no-op when not running.
    ///
    /// Blocks until the loop thread exits, so it must not be called from a
    /// connection or server callback (those run on the loop thread).
    pub fn stop_server(&self) -> Result<(), SocketError> {
        let worker = {
            let mut controller = self.lock_controller();
            match std::mem::replace(&mut controller.state, Lifecycle::Stopping) {
                Lifecycle::Running(worker) => worker,
                other => {
                    controller.state = other;
                    return Ok(());
                }
            }
        };

        let port = self.port.swap(0, Ordering::SeqCst);
        let _ = worker.shutdown.send(());
        self.registry.clear();
        let joined = worker.thread.join();
        // Upgrades finishing during the graceful drain can still attach
        // records before the loop thread exits.
        self.registry.clear();
        self.active.reset();
        self.lock_controller().state = Lifecycle::Idle;

        match joined {
            Ok(()) => {
                info!(port, "Console socket stopped");
                Ok(())
            }
            Err(_) => {
                warn!(port, "Console socket loop thread panicked");
                Err(SocketError::InvalidArgument(
                    "console socket loop thread panicked".into(),
                ))
            }
        }
    }

    /// Start routing events for `handle` to `callbacks`.
    ///
    /// Replaces the callbacks of an existing record and keeps any
    /// connection that already opened for the handle.
    pub fn listen(&self, handle: &str, callbacks: ConnectionCallbacks) -> Result<(), SocketError> {
        if handle.is_empty() || handle.contains('/') {
            return Err(SocketError::InvalidArgument(format!(
                "handle {:?} cannot appear as a path segment",
                handle
            )));
        }

        // Held so a concurrent stop_server cannot clear the registry between
        // the running check and the insert.
        let controller = self.lock_controller();
        if !matches!(controller.state, Lifecycle::Running(_)) {
            return Err(SocketError::not_running());
        }
        if self.registry.subscribe(handle, callbacks) {
            debug!(handle, "Listening for terminal handle");
        }
        Ok(())
    }

    /// Stop routing events for `handle`.
    pub fn stop_listening(&self, handle: &str) -> Result<(), SocketError> {
        match self.registry.remove(handle) {
            Some(_) => {
                debug!(handle, "Stopped listening for terminal handle");
                Ok(())
            }
            None => Err(SocketError::InvalidArgument(format!(
                "unknown terminal handle {}",
                handle
            ))),
        }
    }

    /// Send `message` to the client connected for `handle` as one text frame.
    pub fn send_text(&self, handle: &str, message: &str) -> Result<(), SocketError> {
        let record = self
            .registry
            .get(handle)
            .ok_or_else(|| SocketError::unknown_handle(handle))?;

        // The registry can still point at a connection the loop thread has
        // since closed.
        let conn = record
            .connection
            .filter(|c| c.is_live())
            .ok_or_else(|| SocketError::unknown_handle(handle))?;

        conn.send_text(message).map_err(|e| {
            debug!(handle, conn_id = conn.id(), "Send failed: {}", e);
            SocketError::from(e)
        })
    }

    /// Drop every registered handle. Open sockets stay up until the peer
    /// or `stop_server` closes them.
    pub fn stop_all(&self) -> Result<(), SocketError> {
        self.registry.clear();
        Ok(())
    }

    /// Connections currently between their open and close events.
    pub fn connection_count(&self) -> usize {
        self.active.get()
    }

    /// Handles currently present in the registry.
    pub fn registered_count(&self) -> usize {
        self.registry.len()
    }

    /// Bound listener port, or 0 when not running.
    pub fn port(&self) -> u16 {
        self.port.load(Ordering::SeqCst)
    }

    /// Listener port if `handle` is registered, otherwise 0.
    pub fn port_for(&self, handle: &str) -> u16 {
        if self.registry.contains(handle) {
            self.port()
        } else {
            0
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.lock_controller().state, Lifecycle::Running(_))
    }

    fn on_loop_thread(&self) -> bool {
        match &self.lock_controller().state {
            Lifecycle::Running(worker) => worker.thread_id() == thread::current().id(),
            _ => false,
        }
    }

    /// Signal the loop to stop without joining it.
    fn detach(&self) {
        let mut controller = self.lock_controller();
        if let Lifecycle::Running(worker) =
            std::mem::replace(&mut controller.state, Lifecycle::Idle)
        {
            let _ = worker.shutdown.send(());
        }
        self.port.store(0, Ordering::SeqCst);
    }
}

impl<T: Transport> Drop for ConsoleSocket<T> {
    fn drop(&mut self) {
        let _ = self.stop_all();
        if self.on_loop_thread() {
            warn!("Console socket dropped on its own loop thread, detaching listener");
            self.detach();
        } else if let Err(e) = self.stop_server() {
            error!("Failed to stop console socket during drop: {}", e);
        }
    }
}
