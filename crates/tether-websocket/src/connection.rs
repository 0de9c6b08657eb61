//! The websocket connection: bounded connect, writer queue, reader loop.

use std::fmt;
use std::time::Duration;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{HeaderValue, SEC_WEBSOCKET_PROTOCOL};
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use tether_session::{SendTicket, Transport, TransportError, TransportReceiver, TransportSender};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Depth of the outbound FIFO queue; senders suspend when it is full.
const SEND_QUEUE_DEPTH: usize = 256;
const RECV_QUEUE_DEPTH: usize = 256;

/// A single frame may not take longer than this to hit the socket.
const WRITE_TIMEOUT: Duration = Duration::from_secs(10);
/// Bound on the goodbye handshake; past it the socket is dropped hard.
const CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// Failure to establish the websocket.
#[derive(Debug)]
pub enum WsConnectError {
    /// The address did not parse as a websocket URL.
    InvalidAddress(String),
    /// TCP/TLS/upgrade failure.
    Handshake(String),
    /// The handshake did not reach the open state within the timeout.
    Timeout,
}

impl fmt::Display for WsConnectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WsConnectError::InvalidAddress(e) => write!(f, "invalid websocket address: {e}"),
            WsConnectError::Handshake(e) => write!(f, "websocket handshake failed: {e}"),
            WsConnectError::Timeout => write!(f, "websocket connect timed out"),
        }
    }
}

impl std::error::Error for WsConnectError {}

enum WriteItem {
    Frame {
        bytes: Vec<u8>,
        done: oneshot::Sender<Result<(), TransportError>>,
    },
    Pong(Vec<u8>),
}

/// Open a websocket to `url`, offering `subprotocol` in the upgrade
/// request, bounded by `timeout`.
///
/// On timeout or handshake failure nothing is left running: the connection
/// is only usable if the handshake reached the fully open state.
pub async fn connect(
    url: &str,
    subprotocol: &str,
    timeout: Duration,
) -> Result<WsConnection, WsConnectError> {
    let mut request = url
        .into_client_request()
        .map_err(|e| WsConnectError::InvalidAddress(e.to_string()))?;
    if !subprotocol.is_empty() {
        let value = HeaderValue::from_str(subprotocol)
            .map_err(|e| WsConnectError::InvalidAddress(e.to_string()))?;
        request.headers_mut().insert(SEC_WEBSOCKET_PROTOCOL, value);
    }

    tracing::debug!(%url, "connecting websocket");
    let (stream, _response) = match tokio::time::timeout(timeout, connect_async(request)).await {
        Ok(Ok(established)) => established,
        Ok(Err(e)) => return Err(WsConnectError::Handshake(e.to_string())),
        Err(_) => return Err(WsConnectError::Timeout),
    };
    tracing::debug!(%url, "websocket open");
    Ok(WsConnection::start(stream))
}

/// One live websocket, split into its queue-backed sending half and its
/// in-order receiving half.
pub struct WsConnection {
    sender: WsSender,
    receiver: WsReceiver,
}

impl WsConnection {
    fn start(stream: WsStream) -> Self {
        let (sink, stream) = stream.split();
        let (queue_tx, queue_rx) = mpsc::channel(SEND_QUEUE_DEPTH);
        let (inbound_tx, inbound_rx) = mpsc::channel(RECV_QUEUE_DEPTH);
        let closed = CancellationToken::new();

        tokio::spawn(write_loop(sink, queue_rx, closed.clone()));
        tokio::spawn(read_loop(stream, inbound_tx, queue_tx.clone(), closed.clone()));

        Self {
            sender: WsSender { queue_tx, closed },
            receiver: WsReceiver { rx: inbound_rx },
        }
    }
}

impl Transport for WsConnection {
    type Sender = WsSender;
    type Receiver = WsReceiver;

    fn split(self) -> (WsSender, WsReceiver) {
        (self.sender, self.receiver)
    }
}

/// Cloneable sending half; all clones feed the same FIFO queue.
#[derive(Clone)]
pub struct WsSender {
    queue_tx: mpsc::Sender<WriteItem>,
    closed: CancellationToken,
}

impl TransportSender for WsSender {
    async fn send(&self, frame: Vec<u8>) -> Result<SendTicket, TransportError> {
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let (done_tx, done_rx) = oneshot::channel();
        self.queue_tx
            .send(WriteItem::Frame {
                bytes: frame,
                done: done_tx,
            })
            .await
            .map_err(|_| TransportError::Closed)?;
        Ok(SendTicket::new(done_rx))
    }

    async fn close(&self) {
        self.closed.cancel();
    }
}

/// Receiving half: complete binary messages in arrival order, then `None`
/// once the connection reaches the closed condition.
pub struct WsReceiver {
    rx: mpsc::Receiver<Vec<u8>>,
}

impl TransportReceiver for WsReceiver {
    async fn recv(&mut self) -> Option<Vec<u8>> {
        self.rx.recv().await
    }
}

/// Single writer: drains the queue in FIFO order, resolving each frame's
/// completion only after the socket write. Any fault flips the closed
/// condition; queued sends are failed, never dropped.
async fn write_loop(
    mut sink: SplitSink<WsStream, Message>,
    mut queue: mpsc::Receiver<WriteItem>,
    closed: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = closed.cancelled() => break,
            item = queue.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let (message, done) = match item {
            WriteItem::Frame { bytes, done } => (Message::Binary(bytes.into()), Some(done)),
            WriteItem::Pong(payload) => (Message::Pong(payload.into()), None),
        };
        match tokio::time::timeout(WRITE_TIMEOUT, sink.send(message)).await {
            Ok(Ok(())) => {
                if let Some(done) = done {
                    let _ = done.send(Ok(()));
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "websocket write fault");
                if let Some(done) = done {
                    let _ = done.send(Err(TransportError::Failed(e.to_string())));
                }
                break;
            }
            Err(_) => {
                tracing::warn!("websocket write timed out");
                if let Some(done) = done {
                    let _ = done.send(Err(TransportError::Timeout));
                }
                break;
            }
        }
    }
    closed.cancel();

    // Best-effort goodbye, bounded like the original close handshake.
    let _ = tokio::time::timeout(CLOSE_TIMEOUT, sink.send(Message::Close(None))).await;

    queue.close();
    while let Ok(item) = queue.try_recv() {
        if let WriteItem::Frame { done, .. } = item {
            let _ = done.send(Err(TransportError::Closed));
        }
    }
    tracing::debug!("websocket writer stopped");
}

/// Single reader: forwards complete binary messages, answers pings, and
/// flips the closed condition on peer close, fault, or stream end. Never
/// panics out of the loop.
///
/// Fragmented frames are reassembled below this layer; every item the
/// stream yields is one complete message.
async fn read_loop(
    mut stream: SplitStream<WsStream>,
    inbound: mpsc::Sender<Vec<u8>>,
    pong: mpsc::Sender<WriteItem>,
    closed: CancellationToken,
) {
    loop {
        let message = tokio::select! {
            _ = closed.cancelled() => break,
            message = stream.next() => message,
        };
        match message {
            Some(Ok(Message::Binary(data))) => {
                if inbound.send(data.to_vec()).await.is_err() {
                    // Receiver gone; nobody is listening anymore.
                    break;
                }
            }
            Some(Ok(Message::Ping(payload))) => {
                let _ = pong.send(WriteItem::Pong(payload.to_vec())).await;
            }
            Some(Ok(Message::Pong(_))) => {}
            Some(Ok(Message::Text(_))) => {
                tracing::warn!("dropping text frame on binary channel");
            }
            Some(Ok(Message::Close(frame))) => {
                tracing::debug!(?frame, "peer closed websocket");
                break;
            }
            Some(Ok(Message::Frame(_))) => {}
            Some(Err(e)) => {
                tracing::warn!(error = %e, "websocket read fault");
                break;
            }
            None => break,
        }
    }
    closed.cancel();
    tracing::debug!("websocket reader stopped");
    // `inbound` drops here: the receiver observes the closed condition as
    // a final `None`.
}
