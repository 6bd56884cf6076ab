//! In-memory transport for driving the dispatcher and lifecycle in tests.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::oneshot;

use super::{Connection, EventSink, Transport, TransportError};

#[derive(Clone, Debug)]
pub(crate) struct MockConnection {
    id: u64,
    path: Arc<str>,
    live: Arc<AtomicBool>,
    fail_writes: Arc<AtomicBool>,
    sent: Arc<Mutex<Vec<String>>>,
}

impl MockConnection {
    pub(crate) fn new(id: u64, path: &str) -> Self {
        Self {
            id,
            path: Arc::from(path),
            live: Arc::new(AtomicBool::new(true)),
            fail_writes: Arc::new(AtomicBool::new(false)),
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub(crate) fn drop_peer(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    pub(crate) fn fail_writes(&self) {
        self.fail_writes.store(true, Ordering::SeqCst);
    }

    pub(crate) fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

impl Connection for MockConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn resource_path(&self) -> &str {
        &self.path
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(TransportError::Write("simulated write failure".into()));
        }
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

/// Records bind attempts and exposes the event sink installed by the
/// lifecycle controller so tests can inject transport events.
#[derive(Default)]
pub(crate) struct MockTransport {
    bind_error: Option<io::ErrorKind>,
    open_after_shutdown: Option<String>,
    listen_calls: Mutex<Vec<SocketAddr>>,
    sink: Mutex<Option<Arc<dyn EventSink<MockConnection>>>>,
}

impl MockTransport {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Every bind attempt fails with `kind`.
    pub(crate) fn failing_with(kind: io::ErrorKind) -> Self {
        Self {
            bind_error: Some(kind),
            ..Self::default()
        }
    }

    /// After the shutdown signal, deliver one more open event for `path`
    /// before the loop exits.
    pub(crate) fn opening_during_drain(path: &str) -> Self {
        Self {
            open_after_shutdown: Some(path.to_string()),
            ..Self::default()
        }
    }

    pub(crate) fn listen_calls(&self) -> Vec<SocketAddr> {
        self.listen_calls.lock().unwrap().clone()
    }

    /// Wait for the loop thread to install its sink.
    pub(crate) fn sink(&self) -> Arc<dyn EventSink<MockConnection>> {
        let deadline = Instant::now() + Duration::from_secs(5);
        loop {
            if let Some(sink) = self.sink.lock().unwrap().clone() {
                return sink;
            }
            assert!(Instant::now() < deadline, "loop thread never started");
            std::thread::sleep(Duration::from_millis(5));
        }
    }
}

impl Transport for MockTransport {
    type Connection = MockConnection;
    type Listener = u16;

    fn listen(&self, addr: SocketAddr) -> io::Result<u16> {
        self.listen_calls.lock().unwrap().push(addr);
        match self.bind_error {
            Some(kind) => Err(io::Error::from(kind)),
            None => Ok(addr.port()),
        }
    }

    fn run(
        &self,
        _listener: u16,
        sink: Arc<dyn EventSink<MockConnection>>,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<(), TransportError> {
        *self.sink.lock().unwrap() = Some(sink.clone());
        let _ = shutdown.blocking_recv();
        if let Some(path) = &self.open_after_shutdown {
            sink.on_open(&MockConnection::new(u64::MAX, path));
        }
        self.sink.lock().unwrap().take();
        Ok(())
    }
}

