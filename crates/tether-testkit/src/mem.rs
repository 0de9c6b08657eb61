//! In-memory transport: the semantic reference for transport behavior.
//!
//! A [`mem_pair`] wires a client-side [`MemTransport`] to a [`MemRemote`]
//! test handle. Frames written by the session are recorded in departure
//! order and can be read back; the remote can inject inbound frames and
//! drop the link, which both halves observe like a socket death.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use tether_session::{SendTicket, Transport, TransportError, TransportReceiver, TransportSender};

const QUEUE_DEPTH: usize = 64;

/// Client-side half, implementing the session's transport traits.
pub struct MemTransport {
    sender: MemSender,
    receiver: MemReceiver,
}

impl Transport for MemTransport {
    type Sender = MemSender;
    type Receiver = MemReceiver;

    fn split(self) -> (MemSender, MemReceiver) {
        (self.sender, self.receiver)
    }
}

#[derive(Clone)]
pub struct MemSender {
    outbound: mpsc::Sender<Vec<u8>>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: CancellationToken,
}

impl TransportSender for MemSender {
    async fn send(&self, frame: Vec<u8>) -> Result<SendTicket, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.log.lock().push(frame.clone());
        match self.outbound.send(frame).await {
            Ok(()) => {
                // In-memory "write" completes on enqueue.
                let _ = done_tx.send(Ok(()));
                Ok(SendTicket::new(done_rx))
            }
            Err(_) => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

pub struct MemReceiver {
    inbound: mpsc::Receiver<Vec<u8>>,
    closed: CancellationToken,
}

impl TransportReceiver for MemReceiver {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        tokio::select! {
            _ = self.closed.cancelled() => None,
            frame = self.inbound.recv() => frame,
        }
    }
}

/// Far end of the link, driven by the test.
pub struct MemRemote {
    outbound_rx: mpsc::Receiver<Vec<u8>>,
    inbound_tx: mpsc::Sender<Vec<u8>>,
    log: Arc<Mutex<Vec<Vec<u8>>>>,
    closed: CancellationToken,
}

impl MemRemote {
    /// Next frame the session wrote, in departure order.
    pub async fn next_frame(&mut self) -> Option<Vec<u8>> {
        self.outbound_rx.recv().await
    }

    /// Push a frame toward the session.
    pub async fn inject(&self, frame: Vec<u8>) {
        let _ = self.inbound_tx.send(frame).await;
    }

    /// Drop the link; both halves observe the closed condition.
    pub fn drop_link(&self) {
        self.closed.cancel();
    }

    /// Everything the session has written so far, in departure order.
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.log.lock().clone()
    }
}

/// A connected transport/remote pair.
pub fn mem_pair() -> (MemTransport, MemRemote) {
    let (outbound_tx, outbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let (inbound_tx, inbound_rx) = mpsc::channel(QUEUE_DEPTH);
    let log = Arc::new(Mutex::new(Vec::new()));
    let closed = CancellationToken::new();

    let transport = MemTransport {
        sender: MemSender {
            outbound: outbound_tx,
            log: log.clone(),
            closed: closed.clone(),
        },
        receiver: MemReceiver {
            inbound: inbound_rx,
            closed: closed.clone(),
        },
    };
    let remote = MemRemote {
        outbound_rx,
        inbound_tx,
        log,
        closed,
    };
    (transport, remote)
}
