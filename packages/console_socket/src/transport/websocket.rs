use axum::{
    Router,
    extract::{
        State, WebSocketUpgrade,
        ws::{Message, WebSocket, rejection::WebSocketUpgradeRejection},
    },
    http::Uri,
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::oneshot;
use tracing::{debug, info};

use super::{Connection, EventSink, Transport, TransportError};

/// Frames queued per connection before `send_text` starts failing.
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// A live (or formerly live) websocket peer.
///
/// Outbound text is queued on a bounded channel drained by a writer task
/// on the loop thread, so `send_text` never blocks the calling thread. A
/// peer that stops reading fills the queue and further sends fail.
#[derive(Clone, Debug)]
pub struct WsConnection {
    id: u64,
    path: Arc<str>,
    outbound: mpsc::Sender<String>,
    closed: Arc<AtomicBool>,
}

impl Connection for WsConnection {
    fn id(&self) -> u64 {
        self.id
    }

    fn resource_path(&self) -> &str {
        &self.path
    }

    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && !self.outbound.is_closed()
    }

    fn send_text(&self, text: &str) -> Result<(), TransportError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }
        self.outbound
            .try_send(text.to_owned())
            .map_err(|e| match e {
                TrySendError::Full(_) => TransportError::Write(format!(
                    "outbound queue for connection {} is full",
                    self.id
                )),
                TrySendError::Closed(_) => TransportError::Write(format!(
                    "writer for connection {} has stopped",
                    self.id
                )),
            })
    }
}

/// Websocket transport backed by axum, served from a current-thread tokio
/// runtime owned by the loop thread.
#[derive(Debug, Default)]
pub struct WsTransport {
    next_id: Arc<AtomicU64>,
}

impl WsTransport {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transport for WsTransport {
    type Connection = WsConnection;
    type Listener = std::net::TcpListener;

    fn listen(&self, addr: SocketAddr) -> io::Result<Self::Listener> {
        let listener = std::net::TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        Ok(listener)
    }

    fn run(
        &self,
        listener: Self::Listener,
        sink: Arc<dyn EventSink<WsConnection>>,
        shutdown: oneshot::Receiver<()>,
    ) -> Result<(), TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        let next_id = self.next_id.clone();

        runtime.block_on(async move {
            let listener = tokio::net::TcpListener::from_std(listener)?;
            info!("Console socket accepting on {}", listener.local_addr()?);

            axum::serve(listener, router(sink, next_id))
                .with_graceful_shutdown(async {
                    let _ = shutdown.await;
                })
                .await?;
            Ok::<(), TransportError>(())
        })?;

        // Dropping the runtime here cancels the remaining connection tasks.
        Ok(())
    }
}

#[derive(Clone)]
struct RouterState {
    sink: Arc<dyn EventSink<WsConnection>>,
    next_id: Arc<AtomicU64>,
}

/// Every path is accepted: routing by handle happens in the event sink.
pub(crate) fn router(sink: Arc<dyn EventSink<WsConnection>>, next_id: Arc<AtomicU64>) -> Router {
    Router::new()
        .fallback(route_request)
        .with_state(RouterState { sink, next_id })
}

async fn route_request(
    State(state): State<RouterState>,
    uri: Uri,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match upgrade {
        Ok(ws) => {
            let id = state.next_id.fetch_add(1, Ordering::Relaxed) + 1;
            let path: Arc<str> = Arc::from(uri.path());
            ws.on_upgrade(move |socket| serve_connection(socket, id, path, state.sink))
        }
        Err(rejection) => {
            debug!(path = %uri.path(), "Plain HTTP request ({})", rejection);
            state.sink.on_http(uri.path()).into_response()
        }
    }
}

async fn serve_connection(
    socket: WebSocket,
    id: u64,
    path: Arc<str>,
    sink: Arc<dyn EventSink<WsConnection>>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (outbound, mut outbound_rx) = mpsc::channel::<String>(OUTBOUND_QUEUE_DEPTH);
    let (close_tx, mut close_rx) = oneshot::channel::<()>();

    let conn = WsConnection {
        id,
        path,
        outbound,
        closed: Arc::new(AtomicBool::new(false)),
    };
    debug!(conn_id = id, path = %conn.path, "WebSocket connection opened");
    sink.on_open(&conn);

    let mut writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(text) = outbound_rx.recv() => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        debug!(conn_id = id, "WebSocket write failed: {}", e);
                        break;
                    }
                }
                _ = &mut close_rx => break,
            }
        }
        let _ = ws_sender.close().await;
    });
    let mut writer_done = false;

    loop {
        tokio::select! {
            incoming = ws_receiver.next() => match incoming {
                Some(Ok(Message::Text(text))) => sink.on_message(&conn, text.as_str()),
                Some(Ok(Message::Binary(data))) => {
                    debug!(conn_id = id, len = data.len(), "Binary frames not supported, dropping");
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id = id, "WebSocket read failed: {}", e);
                    break;
                }
            },
            _ = &mut writer => {
                writer_done = true;
                break;
            }
        }
    }

    conn.closed.store(true, Ordering::Release);
    debug!(conn_id = id, "WebSocket connection closed");
    sink.on_close(&conn);

    let _ = close_tx.send(());
    if !writer_done {
        let _ = writer.await;
    }
}
