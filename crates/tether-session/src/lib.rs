//! tether-session: the connection state machine and everything it owns.
//!
//! One [`Session`] owns at most one live transport. A driver task is the
//! single serialization point: every public entry point submits an
//! operation to the driver and suspends on the reply, and every transport
//! or timer event funnels into the same task, so state transitions are
//! atomic by construction.
//!
//! ```text
//!  callers ──ops──▶ ┌────────────┐ ◀─frames── read pump ◀── transport rx
//!                   │   driver   │
//!  events  ◀────────│ (owns the  │ ──frames──▶ transport tx (FIFO queue)
//!  channel          │   state)   │ ◀─timeout── heartbeat watchdog
//!                   └────────────┘ ◀─outcome── reconnect loop
//! ```
//!
//! States: `Init` → `Connected` ⇄ `Reconnecting`, with `Paused` reachable
//! from `Connected`/`Reconnecting` and `Closed` terminal. Leaving
//! `Connected` for any reason cancels every pending request exactly once.
//!
//! The transport itself is behind the [`Transport`]/[`Dialer`] traits:
//! production plugs in the websocket transport, tests plug in an in-memory
//! pair.

mod config;
mod correlator;
mod driver;
mod errors;
mod heartbeat;
mod session;
mod transport;

pub use config::{ReconnectPolicy, SessionConfig};
pub use correlator::Correlator;
pub use errors::{DialError, SessionError, TransportError};
pub use heartbeat::Heartbeat;
pub use session::{Session, SessionEvent, SessionEvents};
pub use transport::{Dialer, SendTicket, Transport, TransportReceiver, TransportSender};
