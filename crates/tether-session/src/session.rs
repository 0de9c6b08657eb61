//! The public session handle and its event stream.

use tokio::sync::{mpsc, oneshot};

use tether_proto::Envelope;

use crate::config::SessionConfig;
use crate::driver::{Driver, Op};
use crate::errors::SessionError;
use crate::transport::Dialer;

/// Asynchronous traffic from the connection to the owning client.
///
/// Notifications are delivered in arrival order. `Disconnected` fires when
/// the connection is lost involuntarily or paused; `Reconnected` fires once
/// per successful reconnection episode, as the hook for upstream
/// re-subscription logic.
#[derive(Debug)]
pub enum SessionEvent {
    Notification(Envelope),
    Disconnected,
    Reconnected,
}

/// Receiving half of the session's event channel. There is exactly one;
/// fan-out to multiple observers is the owning client's business.
pub struct SessionEvents {
    rx: mpsc::UnboundedReceiver<SessionEvent>,
}

impl SessionEvents {
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.rx.recv().await
    }
}

/// Handle to one logical connection.
///
/// Cheap to clone; all clones address the same driver task, which owns the
/// connection state and serializes every operation. All methods are safe to
/// call concurrently and suspend the caller until the operation completes,
/// fails, or is rejected for the current state.
#[derive(Clone)]
pub struct Session {
    ops: mpsc::UnboundedSender<Op>,
}

impl Session {
    /// Spawn the driver for a new session in the `Init` state.
    pub fn spawn<D: Dialer>(dialer: D, config: SessionConfig) -> (Session, SessionEvents) {
        let (op_tx, op_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        tokio::spawn(Driver::new(dialer, config, op_rx, event_tx).run());
        (Session { ops: op_tx }, SessionEvents { rx: event_rx })
    }

    async fn submit<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, SessionError>>) -> Op,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.ops
            .send(make(tx))
            .map_err(|_| SessionError::Closed)?;
        rx.await.map_err(|_| SessionError::Closed)?
    }

    /// Establish the connection: resolve endpoints, dial primary then
    /// secondary, start the heartbeat. Concurrent calls while a dial is in
    /// flight share its outcome.
    pub async fn connect(&self) -> Result<(), SessionError> {
        self.submit(|reply| Op::Connect { reply }).await
    }

    /// Send a request and wait for the correlated reply.
    pub async fn request(&self, envelope: Envelope) -> Result<Envelope, SessionError> {
        self.submit(|reply| Op::Request { envelope, reply }).await
    }

    /// Send a one-way notification; resolves once the frame has been
    /// written to the socket.
    pub async fn send(&self, envelope: Envelope) -> Result<(), SessionError> {
        self.submit(|reply| Op::Notify { envelope, reply }).await
    }

    /// Tear down the transport and stop reconnecting until `resume`.
    pub async fn pause(&self) -> Result<(), SessionError> {
        self.submit(|reply| Op::Pause { reply }).await
    }

    /// Leave `Paused` and start reconnecting.
    pub async fn resume(&self) -> Result<(), SessionError> {
        self.submit(|reply| Op::Resume { reply }).await
    }

    /// Terminal shutdown.
    pub async fn close(&self) -> Result<(), SessionError> {
        self.submit(|reply| Op::Close { reply }).await
    }
}
