//! Websocket channel manager for interactive terminal sessions.
//!
//! One listener on a randomly chosen local port carries any number of
//! terminal sessions. Clients connect to `ws://host:port/terminal/<handle>/`
//! and the manager routes each connection's events to the callbacks
//! registered for `<handle>` with [`ConsoleSocket::listen`]. Output goes
//! back with [`ConsoleSocket::send_text`].
//!
//! ```no_run
//! use console_socket::{ConnectionCallbacks, ConsoleSocket, ServerCallbacks, SocketConfig};
//!
//! # fn main() -> Result<(), console_socket::SocketError> {
//! let socket = ConsoleSocket::new(SocketConfig::loopback());
//! socket.ensure_server_running(ServerCallbacks::new())?;
//! socket.listen(
//!     "abc123",
//!     ConnectionCallbacks::new().on_received_input(|input| print!("{}", input)),
//! )?;
//! println!("ws://127.0.0.1:{}/terminal/abc123/", socket.port());
//! # Ok(())
//! # }
//! ```

pub mod callbacks;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod port;
pub mod registry;
pub mod server;
pub mod transport;

pub use callbacks::{ConnectionCallbacks, ServerCallbacks};
pub use config::{SocketConfig, SocketFileConfig, load_config};
pub use error::SocketError;
pub use port::{PortAllocator, StackProbe};
pub use server::ConsoleSocket;
pub use transport::{Connection, EventSink, Transport, TransportError};
