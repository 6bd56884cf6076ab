//! Transport abstraction.
//!
//! The socket manager never touches websocket framing directly. A
//! [`Transport`] binds listeners and drives a blocking accept loop, handing
//! every open/message/close/plain-HTTP event to an [`EventSink`]. Each live
//! peer is represented by a cloneable [`Connection`] reference that may go
//! stale at any time.
//!
//! Submodules:
//! - `websocket`: axum-based websocket transport used in production

pub mod websocket;

#[cfg(test)]
pub(crate) mod testing;

use axum::http::StatusCode;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::oneshot;

pub use websocket::{WsConnection, WsTransport};

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection closed")]
    Closed,

    #[error("write failed: {0}")]
    Write(String),

    #[error("transport I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("transport stopped: {0}")]
    Serve(String),
}

/// Reference to one physical peer connection.
pub trait Connection: Clone + Send + Sync + 'static {
    /// Identifier unique within one transport instance.
    fn id(&self) -> u64;

    /// Resource path requested by the peer during the upgrade handshake.
    fn resource_path(&self) -> &str;

    /// Whether the peer is still reachable. A `true` answer can be
    /// invalidated by the loop thread immediately afterwards.
    fn is_live(&self) -> bool;

    /// Queue a single text frame. Must not block the caller.
    fn send_text(&self, text: &str) -> Result<(), TransportError>;
}

/// Receiver for transport events. Invoked only on the loop thread.
pub trait EventSink<C>: Send + Sync + 'static {
    fn on_open(&self, conn: &C);

    fn on_message(&self, conn: &C, payload: &str);

    fn on_close(&self, conn: &C);

    /// A request arrived without a websocket upgrade.
    fn on_http(&self, path: &str) -> StatusCode;
}

pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Listener: Send + 'static;

    /// Bind a listening socket on `addr` without accepting yet.
    ///
    /// An `AddrInUse` error tells the caller to retry on another port.
    fn listen(&self, addr: SocketAddr) -> io::Result<Self::Listener>;

    /// Run the accept loop on the calling thread until `shutdown` fires or
    /// its sender is dropped.
    fn run(
        &self,
        listener: Self::Listener,
        sink: Arc<dyn EventSink<Self::Connection>>,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<(), TransportError>;
}
