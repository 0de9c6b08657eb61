//! The driver task: single owner of the connection state.
//!
//! Every public operation and every asynchronous event — dial outcomes,
//! inbound frames, transport closure, heartbeat timeouts, reconnect
//! results — funnels into this task, so transitions are atomic and no
//! caller ever observes a half-completed one.
//!
//! Background work spawned for a given connection (read pump, heartbeat,
//! in-flight dial, reconnect loop) is tagged with the connection epoch at
//! spawn time. The epoch advances on every transition that abandons that
//! work, so a stale event — say, the closure of a transport that has
//! already been replaced — is recognized and dropped instead of tearing
//! down its successor.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_proto::{CommandKind, Envelope};

use crate::config::{ReconnectPolicy, SessionConfig};
use crate::correlator::Correlator;
use crate::errors::{DialError, SessionError};
use crate::heartbeat::Heartbeat;
use crate::session::SessionEvent;
use crate::transport::{Dialer, Transport, TransportReceiver, TransportSender};

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

/// Operations submitted by [`Session`](crate::Session) handles.
pub(crate) enum Op {
    Connect { reply: Reply<()> },
    Request { envelope: Envelope, reply: Reply<Envelope> },
    Notify { envelope: Envelope, reply: Reply<()> },
    Pause { reply: Reply<()> },
    Resume { reply: Reply<()> },
    Close { reply: Reply<()> },
}

/// Asynchronous events funneled into the driver.
enum Event<T: Transport> {
    DialDone {
        epoch: u64,
        outcome: Result<T, DialError>,
    },
    Inbound {
        epoch: u64,
        frame: Vec<u8>,
    },
    LinkClosed {
        epoch: u64,
    },
    LivenessTimeout {
        epoch: u64,
    },
    Reconnected {
        epoch: u64,
        transport: T,
    },
}

/// Everything owned while connected.
struct Link<T: Transport> {
    sender: T::Sender,
    correlator: Correlator,
    heartbeat: Heartbeat,
}

enum State<T: Transport> {
    /// No connection yet. `attempt` holds the waiters of an in-flight
    /// dial, so concurrent connect calls share one outcome.
    Init { attempt: Option<Vec<Reply<()>>> },
    Connected(Link<T>),
    Paused,
    Reconnecting { cancel: CancellationToken },
    Closed,
}

impl<T: Transport> State<T> {
    fn name(&self) -> &'static str {
        match self {
            State::Init { .. } => "init",
            State::Connected(_) => "connected",
            State::Paused => "paused",
            State::Reconnecting { .. } => "reconnecting",
            State::Closed => "closed",
        }
    }
}

fn reject<T>(reply: Reply<T>, op: &'static str, state: &'static str) {
    let _ = reply.send(Err(SessionError::InvalidState { op, state }));
}

async fn discard_transport<T: Transport>(transport: T) {
    let (sender, _receiver) = transport.split();
    sender.close().await;
}

pub(crate) struct Driver<D: Dialer> {
    dialer: Arc<D>,
    config: SessionConfig,
    ops: mpsc::UnboundedReceiver<Op>,
    events_out: mpsc::UnboundedSender<SessionEvent>,
    internal_tx: mpsc::UnboundedSender<Event<D::Transport>>,
    internal_rx: mpsc::UnboundedReceiver<Event<D::Transport>>,
    state: State<D::Transport>,
    epoch: u64,
}

impl<D: Dialer> Driver<D> {
    pub(crate) fn new(
        dialer: D,
        config: SessionConfig,
        ops: mpsc::UnboundedReceiver<Op>,
        events_out: mpsc::UnboundedSender<SessionEvent>,
    ) -> Self {
        let (internal_tx, internal_rx) = mpsc::unbounded_channel();
        Self {
            dialer: Arc::new(dialer),
            config,
            ops,
            events_out,
            internal_tx,
            internal_rx,
            state: State::Init { attempt: None },
            epoch: 0,
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            tokio::select! {
                op = self.ops.recv() => match op {
                    Some(op) => self.handle_op(op).await,
                    // Every Session handle is gone: tear down and exit.
                    None => {
                        self.shutdown().await;
                        return;
                    }
                },
                event = self.internal_rx.recv() => {
                    // The driver holds its own sender, so this never ends.
                    if let Some(event) = event {
                        self.handle_event(event).await;
                    }
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Operations
    // ------------------------------------------------------------------

    async fn handle_op(&mut self, op: Op) {
        match op {
            Op::Connect { reply } => self.op_connect(reply),
            Op::Request { envelope, reply } => self.op_request(envelope, reply).await,
            Op::Notify { envelope, reply } => self.op_notify(envelope, reply).await,
            Op::Pause { reply } => self.op_pause(reply).await,
            Op::Resume { reply } => self.op_resume(reply),
            Op::Close { reply } => self.op_close(reply).await,
        }
    }

    fn op_connect(&mut self, reply: Reply<()>) {
        match &mut self.state {
            State::Init {
                attempt: Some(waiters),
            } => {
                // A dial is already in flight; share its outcome.
                waiters.push(reply);
            }
            State::Init { attempt } => {
                *attempt = Some(vec![reply]);
                let dialer = self.dialer.clone();
                let tx = self.internal_tx.clone();
                let epoch = self.epoch;
                tokio::spawn(async move {
                    let outcome = dialer.dial().await;
                    let _ = tx.send(Event::DialDone { epoch, outcome });
                });
            }
            State::Connected(_) => {
                let _ = reply.send(Ok(()));
            }
            state => reject(reply, "connect", state.name()),
        }
    }

    async fn op_request(&mut self, mut envelope: Envelope, reply: Reply<Envelope>) {
        let State::Connected(link) = &mut self.state else {
            reject(reply, "request", self.state.name());
            return;
        };
        // Registered before transmission: a reply racing ahead of local
        // bookkeeping cannot be lost. `None` means the request was attached
        // to an identical in-flight one and nothing goes on the wire.
        let Some(seq) = link.correlator.register(&mut envelope, reply) else {
            return;
        };
        tracing::debug!(seq, kind = ?envelope.kind, "sending request");
        match link.sender.send(envelope.encode()).await {
            // The reply (or the mass-cancel on link loss) resolves the
            // caller; a write fault surfaces as link closure.
            Ok(_ticket) => {}
            Err(e) => link.correlator.fail(seq, SessionError::Transport(e)),
        }
    }

    async fn op_notify(&mut self, envelope: Envelope, reply: Reply<()>) {
        let State::Connected(link) = &mut self.state else {
            reject(reply, "send", self.state.name());
            return;
        };
        tracing::debug!(kind = ?envelope.kind, "sending notification");
        match link.sender.send(envelope.encode()).await {
            Ok(ticket) => {
                // Resolve the caller once the frame is actually written,
                // without holding up the driver.
                tokio::spawn(async move {
                    let _ = reply.send(ticket.done().await.map_err(SessionError::from));
                });
            }
            Err(e) => {
                let _ = reply.send(Err(SessionError::Transport(e)));
            }
        }
    }

    async fn op_pause(&mut self, reply: Reply<()>) {
        match std::mem::replace(&mut self.state, State::Paused) {
            State::Connected(link) => {
                self.teardown_link(link).await;
                let _ = self.events_out.send(SessionEvent::Disconnected);
                let _ = reply.send(Ok(()));
            }
            State::Reconnecting { cancel } => {
                cancel.cancel();
                self.epoch += 1;
                let _ = reply.send(Ok(()));
            }
            other => {
                self.state = other;
                reject(reply, "pause", self.state.name());
            }
        }
    }

    fn op_resume(&mut self, reply: Reply<()>) {
        match &self.state {
            State::Paused => {
                self.enter_reconnecting();
                let _ = reply.send(Ok(()));
            }
            state => reject(reply, "resume", state.name()),
        }
    }

    async fn op_close(&mut self, reply: Reply<()>) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(link) => {
                self.teardown_link(link).await;
                let _ = reply.send(Ok(()));
            }
            State::Reconnecting { cancel } => {
                cancel.cancel();
                self.epoch += 1;
                let _ = reply.send(Ok(()));
            }
            State::Init { attempt } => {
                self.epoch += 1;
                if let Some(waiters) = attempt {
                    for waiter in waiters {
                        let _ = waiter.send(Err(SessionError::Cancelled));
                    }
                }
                let _ = reply.send(Ok(()));
            }
            State::Paused => {
                let _ = reply.send(Ok(()));
            }
            State::Closed => {
                reject(reply, "close", "closed");
            }
        }
    }

    // ------------------------------------------------------------------
    // Events
    // ------------------------------------------------------------------

    async fn handle_event(&mut self, event: Event<D::Transport>) {
        match event {
            Event::DialDone { epoch, outcome } => self.on_dial_done(epoch, outcome).await,
            Event::Inbound { epoch, frame } => self.on_inbound(epoch, frame).await,
            Event::LinkClosed { epoch } => {
                if epoch == self.epoch && matches!(self.state, State::Connected(_)) {
                    tracing::warn!("transport closed, reconnecting");
                    self.lose_link().await;
                }
            }
            Event::LivenessTimeout { epoch } => {
                if epoch == self.epoch && matches!(self.state, State::Connected(_)) {
                    tracing::warn!("heartbeat timed out, reconnecting");
                    self.lose_link().await;
                }
            }
            Event::Reconnected { epoch, transport } => {
                if epoch != self.epoch || !matches!(self.state, State::Reconnecting { .. }) {
                    discard_transport(transport).await;
                    return;
                }
                tracing::debug!("reconnected");
                self.enter_connected(transport);
                let _ = self.events_out.send(SessionEvent::Reconnected);
            }
        }
    }

    async fn on_dial_done(&mut self, epoch: u64, outcome: Result<D::Transport, DialError>) {
        if epoch != self.epoch {
            if let Ok(transport) = outcome {
                discard_transport(transport).await;
            }
            return;
        }
        let waiters = match &mut self.state {
            State::Init { attempt } => attempt.take().unwrap_or_default(),
            _ => {
                if let Ok(transport) = outcome {
                    discard_transport(transport).await;
                }
                return;
            }
        };
        match outcome {
            Ok(transport) => {
                tracing::debug!("connected");
                self.enter_connected(transport);
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "connect failed");
                let shared = Arc::new(e);
                for waiter in waiters {
                    let _ = waiter.send(Err(SessionError::ConnectFailed(shared.clone())));
                }
            }
        }
    }

    async fn on_inbound(&mut self, epoch: u64, frame: Vec<u8>) {
        {
            if epoch != self.epoch {
                return;
            }
            let State::Connected(link) = &mut self.state else {
                return;
            };
            // Any inbound traffic is proof of liveness.
            link.heartbeat.touch();

            let envelope = match Envelope::decode(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping malformed inbound frame");
                    return;
                }
            };
            if envelope.seq.is_some() {
                link.correlator.resolve(envelope);
                return;
            }
            match envelope.kind {
                CommandKind::Echo => {
                    tracing::debug!("liveness probe acknowledged");
                    return;
                }
                // Forced disconnect: handled below, outside the link borrow.
                CommandKind::Goaway => {}
                _ => {
                    let _ = self.events_out.send(SessionEvent::Notification(envelope));
                    return;
                }
            }
        }
        tracing::warn!("server sent goaway, reconnecting against fresh endpoints");
        self.dialer.invalidate();
        self.lose_link().await;
    }

    // ------------------------------------------------------------------
    // Transitions
    // ------------------------------------------------------------------

    fn enter_connected(&mut self, transport: D::Transport) {
        self.epoch += 1;
        let epoch = self.epoch;
        let (sender, mut receiver) = transport.split();

        let inbound_tx = self.internal_tx.clone();
        tokio::spawn(async move {
            loop {
                match receiver.recv().await {
                    Some(frame) => {
                        if inbound_tx.send(Event::Inbound { epoch, frame }).is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = inbound_tx.send(Event::LinkClosed { epoch });
                        return;
                    }
                }
            }
        });

        let probe = Envelope::echo(&self.config.app_id, &self.config.session_id).encode();
        let timeout_tx = self.internal_tx.clone();
        let heartbeat = Heartbeat::start(
            sender.clone(),
            probe,
            self.config.ping_interval,
            move || {
                let _ = timeout_tx.send(Event::LivenessTimeout { epoch });
            },
        );

        self.state = State::Connected(Link {
            sender,
            correlator: Correlator::new(),
            heartbeat,
        });
    }

    /// Involuntary loss of the connected link: cancel everything pending,
    /// notify the client, start reconnecting.
    async fn lose_link(&mut self) {
        match std::mem::replace(&mut self.state, State::Paused) {
            State::Connected(link) => {
                self.teardown_link(link).await;
                let _ = self.events_out.send(SessionEvent::Disconnected);
                self.enter_reconnecting();
            }
            other => self.state = other,
        }
    }

    async fn teardown_link(&mut self, mut link: Link<D::Transport>) {
        // Outstanding pump and heartbeat events for this link are stale
        // from here on.
        self.epoch += 1;
        link.heartbeat.stop();
        link.correlator.cancel_all();
        link.sender.close().await;
    }

    fn enter_reconnecting(&mut self) {
        let cancel = CancellationToken::new();
        self.state = State::Reconnecting {
            cancel: cancel.clone(),
        };
        let dialer = self.dialer.clone();
        let policy = self.config.reconnect.clone();
        let tx = self.internal_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(reconnect_loop::<D>(dialer, policy, cancel, tx, epoch));
    }

    async fn shutdown(&mut self) {
        match std::mem::replace(&mut self.state, State::Closed) {
            State::Connected(link) => self.teardown_link(link).await,
            State::Reconnecting { cancel } => {
                cancel.cancel();
                self.epoch += 1;
            }
            State::Init { .. } => {
                self.epoch += 1;
            }
            _ => {}
        }
    }
}

/// The reconnection strategy.
///
/// A round is `max_attempts` dials with a fixed delay after each failure,
/// each dial re-resolving endpoints. When a whole round fails the endpoint
/// cache is invalidated — the cached addresses themselves may be the
/// problem — and a new round starts. Rounds repeat until success or
/// cancellation; all mutable state lives on this stack frame.
async fn reconnect_loop<D: Dialer>(
    dialer: Arc<D>,
    policy: ReconnectPolicy,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<Event<D::Transport>>,
    epoch: u64,
) {
    loop {
        for attempt in 1..=policy.max_attempts {
            tracing::debug!(attempt, "reconnect attempt");
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return,
                outcome = dialer.dial() => outcome,
            };
            match outcome {
                Ok(transport) => {
                    if cancel.is_cancelled() {
                        discard_transport(transport).await;
                        return;
                    }
                    let _ = tx.send(Event::Reconnected { epoch, transport });
                    return;
                }
                Err(e) => {
                    tracing::warn!(error = %e, attempt, "reconnect attempt failed");
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(policy.delay) => {}
                    }
                }
            }
        }
        tracing::warn!("reconnect round exhausted, invalidating endpoint cache");
        dialer.invalidate();
    }
}
