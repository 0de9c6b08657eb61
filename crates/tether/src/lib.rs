//! tether: the session layer of a realtime messaging client.
//!
//! tether keeps one long-lived, multiplexed connection alive against an
//! unreliable transport. Commands go out as request/response or one-way
//! notifications; incoming traffic resolves pending requests or is
//! delivered to the owning client in arrival order. Endpoint discovery,
//! the application-level heartbeat, idempotent-request deduplication, and
//! bounded reconnection with cache invalidation are all handled here.
//!
//! # Getting connected
//!
//! ```ignore
//! use std::sync::Arc;
//! use tether::{
//!     Directory, HttpRouteQuery, Session, SessionConfig, SessionEvent,
//!     WsDialer, WsDialerConfig,
//! };
//!
//! let directory = Arc::new(Directory::new(
//!     app_id,
//!     HttpRouteQuery::new("https://router.tether-realtime.net"),
//! ));
//! let dialer = WsDialer::new(directory, WsDialerConfig::default());
//! let (session, mut events) = Session::spawn(dialer, SessionConfig::new(app_id, client_id));
//!
//! session.connect().await?;
//! let reply = session.request(envelope).await?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         SessionEvent::Notification(envelope) => { /* dispatch */ }
//!         SessionEvent::Disconnected => { /* surface offline state */ }
//!         SessionEvent::Reconnected => { /* re-subscribe */ }
//!     }
//! }
//! ```

pub use tether_proto::{CommandKind, DecodeError, Envelope, ErrorInfo, OpKind};
pub use tether_router::{
    Directory, EndpointSet, EndpointSource, HttpRouteQuery, QueryError, RouteDocument, RouteQuery,
};
pub use tether_session::{
    DialError, Dialer, ReconnectPolicy, SendTicket, Session, SessionConfig, SessionError,
    SessionEvent, SessionEvents, Transport, TransportError, TransportReceiver, TransportSender,
};
pub use tether_websocket::{WsConnectError, WsDialer, WsDialerConfig, WsConnection};
