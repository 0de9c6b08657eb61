//! Error types for the session layer.
//!
//! The split mirrors who sees what: [`DialError`] surfaces from `connect`,
//! [`TransportError`] from the transport send path, and [`SessionError`]
//! from every `Session` method. Transport faults never reach callers
//! directly — the state machine absorbs them and pending callers see a
//! shared cancellation.

use std::fmt;
use std::sync::Arc;

use tether_proto::ErrorInfo;

/// Failure to establish a transport connection.
#[derive(Debug)]
pub enum DialError {
    /// The endpoint could not be reached (both primary and secondary).
    Unreachable(String),
    /// The handshake did not complete within the connect timeout.
    Timeout,
    /// The address was not a dialable URL.
    InvalidAddress(String),
}

impl fmt::Display for DialError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DialError::Unreachable(e) => write!(f, "endpoint unreachable: {e}"),
            DialError::Timeout => write!(f, "connect timed out"),
            DialError::InvalidAddress(addr) => write!(f, "invalid address: {addr}"),
        }
    }
}

impl std::error::Error for DialError {}

/// Failure on the transport send path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The connection is in the closed condition.
    Closed,
    /// The frame was not written within the write timeout.
    Timeout,
    /// The socket reported a fault.
    Failed(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "connection closed"),
            TransportError::Timeout => write!(f, "write timed out"),
            TransportError::Failed(e) => write!(f, "transport fault: {e}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Error returned by `Session` operations.
///
/// Clonable because one outcome can fan out to several suspended callers:
/// every waiter of a shared dial sees the same `ConnectFailed`, and every
/// pending request cancelled by a state exit sees `Cancelled`.
#[derive(Debug, Clone)]
pub enum SessionError {
    /// The operation is not legal in the current state.
    InvalidState {
        op: &'static str,
        state: &'static str,
    },
    /// Connecting failed after exhausting primary and secondary endpoints.
    ConnectFailed(Arc<DialError>),
    /// The request was cancelled because the connection left the
    /// `Connected` state while it was pending.
    Cancelled,
    /// The server answered the request with a structured error.
    Remote(ErrorInfo),
    /// The transport rejected the outgoing frame.
    Transport(TransportError),
    /// The session driver is gone (the session was dropped).
    Closed,
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::InvalidState { op, state } => {
                write!(f, "{op} is invalid in the {state} state")
            }
            SessionError::ConnectFailed(e) => write!(f, "connect failed: {e}"),
            SessionError::Cancelled => write!(f, "request cancelled by disconnect"),
            SessionError::Remote(info) => write!(f, "server error: {info}"),
            SessionError::Transport(e) => write!(f, "send failed: {e}"),
            SessionError::Closed => write!(f, "session closed"),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::ConnectFailed(e) => Some(&**e),
            SessionError::Transport(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransportError> for SessionError {
    fn from(e: TransportError) -> Self {
        SessionError::Transport(e)
    }
}

impl SessionError {
    /// Whether this is the invalid-in-current-state rejection.
    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SessionError::InvalidState { .. })
    }
}
