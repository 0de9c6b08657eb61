//! The command envelope: one wire frame, request/response or notification.

use std::fmt;

use minicbor::{Decode, Encode};

use crate::kinds::{CommandKind, OpKind};

/// Structured failure carried by a reply envelope.
///
/// `code`/`reason` come from the protocol layer; `app_code`/`app_message`
/// are set when a server-side hook rejected the operation.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct ErrorInfo {
    #[n(0)]
    pub code: i32,
    #[n(1)]
    pub reason: String,
    #[n(2)]
    pub app_code: Option<i32>,
    #[n(3)]
    pub app_message: Option<String>,
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.reason)?;
        if let Some(app_code) = self.app_code {
            write!(f, " (app {app_code}")?;
            if let Some(msg) = &self.app_message {
                write!(f, ": {msg}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

/// One unit of wire traffic.
///
/// `seq` present means request/response traffic: a request carries the seq
/// assigned by the correlator, and the matching reply echoes it back. An
/// envelope without `seq` is a one-way notification.
///
/// `payload` is opaque here — the domain codec that maps conversations,
/// messages, and users onto payload bytes lives above this crate.
#[derive(Debug, Clone, PartialEq, Eq, Encode, Decode)]
pub struct Envelope {
    #[n(0)]
    pub kind: CommandKind,
    #[n(1)]
    pub op: Option<OpKind>,
    #[n(2)]
    pub seq: Option<i32>,
    #[n(3)]
    pub peer_id: Option<String>,
    #[n(4)]
    pub app_id: Option<String>,
    #[n(5)]
    #[cbor(with = "minicbor::bytes")]
    pub payload: Option<Vec<u8>>,
    #[n(6)]
    pub error: Option<ErrorInfo>,
}

/// Failure to decode a received frame into an [`Envelope`].
///
/// Decode failures are protocol errors: the session logs and drops the
/// frame, they are never fatal to the connection.
#[derive(Debug)]
pub struct DecodeError(String);

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "malformed envelope: {}", self.0)
    }
}

impl std::error::Error for DecodeError {}

impl Envelope {
    /// A bare envelope of the given kind, everything else unset.
    pub fn new(kind: CommandKind) -> Self {
        Self {
            kind,
            op: None,
            seq: None,
            peer_id: None,
            app_id: None,
            payload: None,
            error: None,
        }
    }

    /// A liveness probe, tagged with the identity of the connection that
    /// sends it.
    pub fn echo(app_id: &str, peer_id: &str) -> Self {
        Self {
            app_id: Some(app_id.to_owned()),
            peer_id: Some(peer_id.to_owned()),
            ..Self::new(CommandKind::Echo)
        }
    }

    pub fn with_op(mut self, op: OpKind) -> Self {
        self.op = Some(op);
        self
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Whether this command may be deduplicated against an identical
    /// in-flight request.
    ///
    /// Anything that mutates server state must go out once per submission:
    /// message delivery, opening a session, creating a conversation,
    /// mutating attributes or membership. Everything else (queries, reads,
    /// acks, probes) is safe to collapse.
    pub fn is_idempotent(&self) -> bool {
        !(self.kind == CommandKind::Direct
            || (self.kind == CommandKind::Session && self.op == Some(OpKind::Open))
            || (self.kind == CommandKind::Conversation
                && matches!(
                    self.op,
                    Some(OpKind::Start) | Some(OpKind::Update) | Some(OpKind::Members)
                )))
    }

    /// Canonical identity of this request, ignoring the assigned seq.
    ///
    /// Computed once at submission time and stored alongside the pending
    /// entry, so matching a duplicate is a map lookup rather than a deep
    /// field-by-field comparison.
    pub fn dedup_key(&self) -> Vec<u8> {
        let mut stripped = self.clone();
        stripped.seq = None;
        minicbor::to_vec(&stripped).expect("envelope encoding to a Vec cannot fail")
    }

    /// Encode into wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        minicbor::to_vec(self).expect("envelope encoding to a Vec cannot fail")
    }

    /// Decode from wire bytes. Unknown fields are ignored.
    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        minicbor::decode(bytes).map_err(|e| DecodeError(e.to_string()))
    }
}
