//! Request/response correlation over the shared connection.
//!
//! The correlator assigns each outbound request a sequence number, records
//! a pending entry keyed by it, and resolves the entry when the matching
//! reply arrives. The entry is recorded before the frame is handed to the
//! transport, so a reply racing ahead of local bookkeeping cannot be lost.
//!
//! Idempotent requests are additionally indexed by a canonical content key
//! (the envelope with its seq cleared): a duplicate submission while the
//! original is still in flight attaches a second waiter to the same entry
//! instead of transmitting again.

use std::collections::HashMap;

use tokio::sync::oneshot;

use tether_proto::Envelope;

use crate::errors::SessionError;

type Waiter = oneshot::Sender<Result<Envelope, SessionError>>;

struct Pending {
    waiters: Vec<Waiter>,
    dedup_key: Option<Vec<u8>>,
}

/// Owns the pending-request table. Lives inside the driver task; nothing
/// else touches it.
pub struct Correlator {
    next_seq: i32,
    pending: HashMap<i32, Pending>,
    in_flight: HashMap<Vec<u8>, i32>,
}

impl Default for Correlator {
    fn default() -> Self {
        Self::new()
    }
}

impl Correlator {
    pub fn new() -> Self {
        Self {
            next_seq: 1,
            pending: HashMap::new(),
            in_flight: HashMap::new(),
        }
    }

    /// Number of requests currently awaiting a reply.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Register a request for transmission.
    ///
    /// Returns the assigned seq (now stamped on the envelope) when the
    /// request must go on the wire, or `None` when it was satisfied by
    /// attaching to an identical in-flight idempotent request.
    pub fn register(&mut self, envelope: &mut Envelope, waiter: Waiter) -> Option<i32> {
        let dedup_key = if envelope.is_idempotent() {
            let key = envelope.dedup_key();
            if let Some(&seq) = self.in_flight.get(&key) {
                if let Some(entry) = self.pending.get_mut(&seq) {
                    tracing::debug!(seq, "duplicate request attached to in-flight entry");
                    entry.waiters.push(waiter);
                    return None;
                }
                // Index out of sync with the table; repair and fall through.
                self.in_flight.remove(&key);
            }
            Some(key)
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        envelope.seq = Some(seq);

        if let Some(key) = &dedup_key {
            self.in_flight.insert(key.clone(), seq);
        }
        self.pending.insert(
            seq,
            Pending {
                waiters: vec![waiter],
                dedup_key,
            },
        );
        Some(seq)
    }

    /// Resolve the entry matching a reply envelope.
    ///
    /// An envelope carrying an error payload resolves its waiters with a
    /// structured failure. Replies with no matching entry are logged and
    /// dropped; returns whether the reply was consumed.
    pub fn resolve(&mut self, reply: Envelope) -> bool {
        let Some(seq) = reply.seq else {
            return false;
        };
        let Some(entry) = self.pending.remove(&seq) else {
            tracing::warn!(seq, "reply matches no pending request, dropping");
            return false;
        };
        if let Some(key) = &entry.dedup_key {
            self.in_flight.remove(key);
        }

        let outcome = match &reply.error {
            Some(info) => Err(SessionError::Remote(info.clone())),
            None => Ok(reply),
        };
        for waiter in entry.waiters {
            let _ = waiter.send(outcome.clone());
        }
        true
    }

    /// Fail one entry that never made it onto the wire.
    pub fn fail(&mut self, seq: i32, error: SessionError) {
        if let Some(entry) = self.pending.remove(&seq) {
            if let Some(key) = &entry.dedup_key {
                self.in_flight.remove(key);
            }
            for waiter in entry.waiters {
                let _ = waiter.send(Err(error.clone()));
            }
        }
    }

    /// Cancel every pending entry. Runs on any exit from the connected
    /// state; each waiter resolves exactly once because entries are
    /// removed as they are drained.
    pub fn cancel_all(&mut self) {
        let cancelled = self.pending.len();
        if cancelled > 0 {
            tracing::debug!(cancelled, "cancelling pending requests");
        }
        for (_, entry) in self.pending.drain() {
            for waiter in entry.waiters {
                let _ = waiter.send(Err(SessionError::Cancelled));
            }
        }
        self.in_flight.clear();
    }
}

#[cfg(test)]
mod tests {
    use tether_proto::{CommandKind, ErrorInfo, OpKind};

    use super::*;

    fn query() -> Envelope {
        Envelope::new(CommandKind::Conversation)
            .with_op(OpKind::Query)
            .with_payload(b"where".to_vec())
    }

    fn direct() -> Envelope {
        Envelope::new(CommandKind::Direct).with_payload(b"hi".to_vec())
    }

    fn reply_to(seq: i32) -> Envelope {
        let mut env = Envelope::new(CommandKind::Conversation).with_op(OpKind::QueryResult);
        env.seq = Some(seq);
        env
    }

    #[tokio::test]
    async fn assigns_increasing_seqs() {
        let mut c = Correlator::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        let mut a = direct();
        let mut b = direct();
        let s1 = c.register(&mut a, tx1).unwrap();
        let s2 = c.register(&mut b, tx2).unwrap();
        assert_eq!(a.seq, Some(s1));
        assert_eq!(b.seq, Some(s2));
        assert!(s2 > s1);
    }

    #[tokio::test]
    async fn duplicate_idempotent_request_shares_the_entry() {
        let mut c = Correlator::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();

        let mut first = query();
        let seq = c.register(&mut first, tx1).expect("first goes on the wire");
        let mut dup = query();
        assert!(c.register(&mut dup, tx2).is_none());
        assert_eq!(c.pending_len(), 1);

        let mut reply = reply_to(seq);
        reply.payload = Some(b"result".to_vec());
        assert!(c.resolve(reply));

        let a = rx1.await.unwrap().unwrap();
        let b = rx2.await.unwrap().unwrap();
        assert_eq!(a.payload, Some(b"result".to_vec()));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn non_idempotent_requests_never_collapse() {
        let mut c = Correlator::new();
        let (tx1, _rx1) = oneshot::channel();
        let (tx2, _rx2) = oneshot::channel();

        assert!(c.register(&mut direct(), tx1).is_some());
        assert!(c.register(&mut direct(), tx2).is_some());
        assert_eq!(c.pending_len(), 2);
    }

    #[tokio::test]
    async fn same_content_after_resolution_is_a_fresh_request() {
        let mut c = Correlator::new();
        let (tx1, rx1) = oneshot::channel();

        let mut first = query();
        let seq = c.register(&mut first, tx1).unwrap();
        c.resolve(reply_to(seq));
        let _ = rx1.await;

        let (tx2, _rx2) = oneshot::channel();
        assert!(c.register(&mut query(), tx2).is_some());
    }

    #[tokio::test]
    async fn error_payload_resolves_as_remote_error() {
        let mut c = Correlator::new();
        let (tx, rx) = oneshot::channel();

        let mut req = direct();
        let seq = c.register(&mut req, tx).unwrap();

        let mut reply = reply_to(seq);
        reply.error = Some(ErrorInfo {
            code: 4316,
            reason: "muted".into(),
            app_code: None,
            app_message: None,
        });
        assert!(c.resolve(reply));

        match rx.await.unwrap() {
            Err(SessionError::Remote(info)) => assert_eq!(info.code, 4316),
            other => panic!("expected remote error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unmatched_reply_is_dropped() {
        let mut c = Correlator::new();
        assert!(!c.resolve(reply_to(99)));
    }

    #[tokio::test]
    async fn cancel_all_resolves_every_waiter_once() {
        let mut c = Correlator::new();
        let (tx1, rx1) = oneshot::channel();
        let (tx2, rx2) = oneshot::channel();
        let (tx3, rx3) = oneshot::channel();

        c.register(&mut direct(), tx1);
        let mut q = query();
        let seq = c.register(&mut q, tx2).unwrap();
        c.register(&mut query(), tx3);

        c.cancel_all();
        for rx in [rx1, rx2, rx3] {
            match rx.await.unwrap() {
                Err(SessionError::Cancelled) => {}
                other => panic!("expected cancellation, got {other:?}"),
            }
        }

        // The table is empty: a late reply for a cancelled entry is dropped.
        assert_eq!(c.pending_len(), 0);
        assert!(!c.resolve(reply_to(seq)));
    }
}
