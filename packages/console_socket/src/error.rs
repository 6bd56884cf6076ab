//! Error types returned by the console socket manager.

use crate::transport::TransportError;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SocketError {
    /// Every bind attempt collided with a port already in use.
    #[error("no free port in {range_start}..{range_end} after {attempts} attempts")]
    PortExhausted {
        attempts: u32,
        range_start: u16,
        range_end: u32,
    },

    /// Malformed input, or a setup failure that is not a port collision.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The server is not running, or the handle has no live connection.
    #[error("not connected: {0}")]
    NotConnected(String),

    /// The transport refused to write the message.
    #[error("bad message: {0}")]
    BadMessage(String),

    /// A `stop_server` call is still joining the listener thread.
    #[error("server is shutting down")]
    ShuttingDown,
}

impl SocketError {
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::PortExhausted { .. } => "port_exhausted",
            Self::InvalidArgument(_) => "invalid_argument",
            Self::NotConnected(_) => "not_connected",
            Self::BadMessage(_) => "bad_message",
            Self::ShuttingDown => "shutting_down",
        }
    }

    pub(crate) fn not_running() -> Self {
        Self::NotConnected("console socket server is not running".to_string())
    }

    pub(crate) fn unknown_handle(handle: &str) -> Self {
        Self::NotConnected(format!("no connection for handle {handle}"))
    }
}

impl From<TransportError> for SocketError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Closed => Self::NotConnected(err.to_string()),
            TransportError::Write(msg) => Self::BadMessage(msg),
            TransportError::Io(_) | TransportError::Serve(_) => {
                Self::InvalidArgument(err.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes() {
        // Codes outlive the error they came from.
        let code: &'static str = SocketError::BadMessage("x".into()).error_code();
        assert_eq!(code, "bad_message");
        assert_eq!(SocketError::ShuttingDown.error_code(), "shutting_down");
        assert_eq!(
            SocketError::PortExhausted {
                attempts: 20,
                range_start: 3000,
                range_end: 8000,
            }
            .error_code(),
            "port_exhausted"
        );
        assert_eq!(SocketError::not_running().error_code(), "not_connected");
    }

    #[test]
    fn port_exhausted_message_names_range() {
        let err = SocketError::PortExhausted {
            attempts: 20,
            range_start: 3000,
            range_end: 8000,
        };
        assert_eq!(
            err.to_string(),
            "no free port in 3000..8000 after 20 attempts"
        );
    }

    #[test]
    fn transport_errors_map_to_socket_errors() {
        assert!(matches!(
            SocketError::from(TransportError::Closed),
            SocketError::NotConnected(_)
        ));
        assert!(matches!(
            SocketError::from(TransportError::Write("reset".into())),
            SocketError::BadMessage(msg) if msg == "reset"
        ));
        assert!(matches!(
            SocketError::from(TransportError::Serve("boom".into())),
            SocketError::InvalidArgument(_)
        ));
    }
}
