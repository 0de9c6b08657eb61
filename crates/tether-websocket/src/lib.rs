//! tether-websocket: the physical transport connection.
//!
//! One [`WsConnection`] owns one websocket. Outbound frames go through a
//! bounded FIFO queue drained by a single writer task, so frames hit the
//! socket in submission order and every send resolves its completion only
//! once the bytes are actually written. A single reader task delivers
//! complete binary messages in arrival order and answers pings.
//!
//! Any read or write fault, peer close, or local [`close`](WsSender::close)
//! puts the connection into a sticky closed condition: queued sends fail
//! (never vanish), and the receiver yields `None` exactly once.

mod connection;
mod dialer;

pub use connection::{connect, WsConnectError, WsConnection, WsReceiver, WsSender};
pub use dialer::{WsDialer, WsDialerConfig};
