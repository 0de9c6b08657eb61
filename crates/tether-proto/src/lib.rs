//! tether-proto: the command envelope exchanged over the realtime transport.
//!
//! Every frame on the wire is one [`Envelope`], encoded with a compact,
//! schema-typed binary encoding: CBOR with integer field tags. Fields a
//! decoder does not know are skipped, so older clients tolerate newer
//! servers.
//!
//! This crate is schema-level only: it does not know about sockets, request
//! correlation, or connection state. Higher layers decide what to do with an
//! envelope; this crate decides what an envelope *is*.

mod envelope;
mod kinds;

pub use envelope::{DecodeError, Envelope, ErrorInfo};
pub use kinds::{CommandKind, OpKind};
