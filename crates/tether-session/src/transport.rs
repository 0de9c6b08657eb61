//! Trait boundaries between the session and its transport.
//!
//! A [`Transport`] is an already-established pipe of binary frames. The
//! session splits it into a cloneable sending half (backed by the
//! transport's FIFO queue) and a single-consumer receiving half that the
//! driver's read pump owns. A [`Dialer`] knows how to produce fresh
//! transports — resolving endpoints is its business, not the session's.

use std::future::Future;

use tokio::sync::oneshot;

use crate::errors::{DialError, TransportError};

/// Completion of one queued send: resolves once the frame has actually
/// been written to the socket, or with the fault that prevented it.
pub struct SendTicket {
    rx: oneshot::Receiver<Result<(), TransportError>>,
}

impl SendTicket {
    pub fn new(rx: oneshot::Receiver<Result<(), TransportError>>) -> Self {
        Self { rx }
    }

    /// Wait for the write to hit the socket.
    pub async fn done(self) -> Result<(), TransportError> {
        match self.rx.await {
            Ok(result) => result,
            // Writer dropped the completion without resolving it: the
            // connection tore down underneath us.
            Err(_) => Err(TransportError::Closed),
        }
    }
}

/// An established bidirectional frame pipe.
pub trait Transport: Send + 'static {
    type Sender: TransportSender;
    type Receiver: TransportReceiver;

    fn split(self) -> (Self::Sender, Self::Receiver);
}

/// Sending half. Cloneable so the heartbeat and the driver share one
/// outbound queue; frames drain in submission order.
pub trait TransportSender: Clone + Send + Sync + 'static {
    /// Enqueue one frame. Suspends while the outbound queue is full
    /// (backpressure); the returned ticket resolves once the frame is on
    /// the socket.
    fn send(
        &self,
        frame: Vec<u8>,
    ) -> impl Future<Output = Result<SendTicket, TransportError>> + Send;

    /// Enter the closed condition. Idempotent; queued sends fail rather
    /// than disappear.
    fn close(&self) -> impl Future<Output = ()> + Send;
}

/// Receiving half. `None` means the connection reached the closed
/// condition — by fault, peer close, or local close — and is final.
pub trait TransportReceiver: Send + 'static {
    fn recv(&mut self) -> impl Future<Output = Option<Vec<u8>>> + Send;
}

/// A source of fresh transports for connect and reconnect.
pub trait Dialer: Send + Sync + 'static {
    type Transport: Transport;

    /// Resolve endpoints and establish one transport. One dial attempt —
    /// retrying is the state machine's business.
    fn dial(&self) -> impl Future<Output = Result<Self::Transport, DialError>> + Send;

    /// Drop any cached endpoint state so the next dial re-resolves from
    /// scratch.
    fn invalidate(&self);
}

impl<D: Dialer> Dialer for std::sync::Arc<D> {
    type Transport = D::Transport;

    fn dial(&self) -> impl Future<Output = Result<Self::Transport, DialError>> + Send {
        (**self).dial()
    }

    fn invalidate(&self) {
        (**self).invalidate()
    }
}
