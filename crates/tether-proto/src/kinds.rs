//! Command and operation kinds.
//!
//! Wire tags are part of the protocol: once assigned, a tag is never reused
//! for a different meaning.

use minicbor::{Decode, Encode};

/// Top-level command discriminator of an [`Envelope`](crate::Envelope).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
#[cbor(index_only)]
pub enum CommandKind {
    /// Session lifecycle (open, resume, close).
    #[n(0)]
    Session,
    /// Conversation management (create, query, membership).
    #[n(1)]
    Conversation,
    /// A user message delivered directly to a conversation.
    #[n(2)]
    Direct,
    /// Delivery acknowledgment.
    #[n(3)]
    Ack,
    /// Application-level liveness probe and its reply.
    #[n(4)]
    Echo,
    /// Server-initiated forced disconnect; the client must re-resolve
    /// endpoints and reconnect.
    #[n(5)]
    Goaway,
    /// Server push of conversation data (events, patches).
    #[n(6)]
    Data,
    /// Unread-count synchronization.
    #[n(7)]
    Unread,
    /// Message history queries.
    #[n(8)]
    Logs,
    /// Message edit/recall patches.
    #[n(9)]
    Patch,
}

/// Sub-operation qualifier; meaning depends on the command kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Encode, Decode)]
#[cbor(index_only)]
pub enum OpKind {
    #[n(0)]
    Open,
    #[n(1)]
    Close,
    /// Create a conversation.
    #[n(2)]
    Start,
    /// Mutate conversation attributes.
    #[n(3)]
    Update,
    /// Mutate conversation membership.
    #[n(4)]
    Members,
    #[n(5)]
    Query,
    #[n(6)]
    QueryResult,
    #[n(7)]
    Add,
    #[n(8)]
    Remove,
    /// Notification: a peer joined.
    #[n(9)]
    Joined,
    /// Notification: a peer left.
    #[n(10)]
    Left,
}
