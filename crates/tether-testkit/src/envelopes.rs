//! Envelope builders for tests.

use tether_proto::{CommandKind, Envelope, ErrorInfo, OpKind};

/// A non-idempotent message delivery.
pub fn direct(text: &str) -> Envelope {
    Envelope::new(CommandKind::Direct).with_payload(text.as_bytes().to_vec())
}

/// An idempotent conversation query.
pub fn query(clause: &str) -> Envelope {
    Envelope::new(CommandKind::Conversation)
        .with_op(OpKind::Query)
        .with_payload(clause.as_bytes().to_vec())
}

/// A successful reply correlated to `seq`.
pub fn reply_ok(seq: i32, payload: &[u8]) -> Envelope {
    let mut env = Envelope::new(CommandKind::Conversation)
        .with_op(OpKind::QueryResult)
        .with_payload(payload.to_vec());
    env.seq = Some(seq);
    env
}

/// A reply correlated to `seq` carrying a structured error.
pub fn reply_remote_error(seq: i32, code: i32, reason: &str) -> Envelope {
    let mut env = Envelope::new(CommandKind::Conversation);
    env.seq = Some(seq);
    env.error = Some(ErrorInfo {
        code,
        reason: reason.to_owned(),
        app_code: None,
        app_message: None,
    });
    env
}
