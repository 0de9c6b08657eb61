//! End-to-end session tests over the in-memory transport.
//!
//! Time is paused in every test that leans on timers; the scripted dialer
//! stands in for endpoint resolution and the websocket.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use tether_proto::{CommandKind, Envelope};
use tether_session::{ReconnectPolicy, Session, SessionConfig, SessionError, SessionEvent, SessionEvents};
use tether_testkit::{direct, query, reply_ok, DialOutcome, MemRemote, ScriptedDialer};

fn config() -> SessionConfig {
    SessionConfig::new("app-under-test", "client-1")
}

/// Let the driver and its background tasks drain before asserting.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(5)).await;
}

async fn expect_event(events: &mut SessionEvents) -> SessionEvent {
    tokio::time::timeout(Duration::from_secs(600), events.recv())
        .await
        .expect("expected an event")
        .expect("event channel closed")
}

/// Assert the event channel stays quiet for a short window.
async fn expect_quiet(events: &mut SessionEvents) {
    assert!(
        tokio::time::timeout(Duration::from_millis(50), events.recv())
            .await
            .is_err(),
        "unexpected extra event"
    );
}

/// Spawn a session over a scripted dialer and connect it.
async fn connected_session(
    script: Vec<DialOutcome>,
    config: SessionConfig,
) -> (
    Session,
    SessionEvents,
    MemRemote,
    mpsc::UnboundedReceiver<MemRemote>,
    Arc<ScriptedDialer>,
) {
    let (dialer, mut remotes) = ScriptedDialer::new(script);
    let dialer = Arc::new(dialer);
    let (session, events) = Session::spawn(dialer.clone(), config);
    session.connect().await.expect("connect");
    let remote = remotes.recv().await.expect("first link");
    (session, events, remote, remotes, dialer)
}

fn spawn_request(
    session: &Session,
    envelope: Envelope,
) -> JoinHandle<Result<Envelope, SessionError>> {
    let session = session.clone();
    tokio::spawn(async move { session.request(envelope).await })
}

#[tokio::test(start_paused = true)]
async fn request_resolves_with_the_correlated_reply() {
    let (session, _events, mut remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    let pending = spawn_request(&session, query("name = 'general'"));

    let frame = remote.next_frame().await.expect("request on the wire");
    let sent = Envelope::decode(&frame).unwrap();
    let seq = sent.seq.expect("requests carry a seq");

    remote.inject(reply_ok(seq, b"one conversation").encode()).await;

    let reply = pending.await.unwrap().unwrap();
    assert_eq!(reply.payload, Some(b"one conversation".to_vec()));
}

#[tokio::test(start_paused = true)]
async fn malformed_inbound_frames_are_dropped_not_fatal() {
    let (session, _events, mut remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    remote.inject(vec![0xff, 0x13, 0x00]).await;
    settle().await;

    // The connection survived: a request still completes.
    let pending = spawn_request(&session, query("q"));
    let frame = remote.next_frame().await.unwrap();
    let seq = Envelope::decode(&frame).unwrap().seq.unwrap();
    remote.inject(reply_ok(seq, b"ok").encode()).await;
    assert!(pending.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn concurrent_connects_share_one_dial() {
    let (dialer, mut remotes) =
        ScriptedDialer::new(vec![DialOutcome::SucceedAfter(Duration::from_millis(50))]);
    let dialer = Arc::new(dialer);
    let (session, _events) = Session::spawn(dialer.clone(), config());

    let a = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };
    let b = {
        let session = session.clone();
        tokio::spawn(async move { session.connect().await })
    };

    a.await.unwrap().unwrap();
    b.await.unwrap().unwrap();
    assert_eq!(dialer.attempts(), 1);
    let _remote = remotes.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn failed_connect_surfaces_and_leaves_init_usable() {
    let (dialer, mut remotes) =
        ScriptedDialer::new(vec![DialOutcome::Fail, DialOutcome::Succeed]);
    let dialer = Arc::new(dialer);
    let (session, _events) = Session::spawn(dialer.clone(), config());

    match session.connect().await {
        Err(SessionError::ConnectFailed(_)) => {}
        other => panic!("expected connect failure, got {other:?}"),
    }

    // Still in init: a second connect dials again and succeeds.
    session.connect().await.unwrap();
    assert_eq!(dialer.attempts(), 2);
    let _remote = remotes.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn duplicate_idempotent_request_sends_one_frame() {
    let (session, _events, mut remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    // R1 (non-idempotent), then R2 (idempotent), then R2's duplicate,
    // before any reply arrives.
    let r1 = spawn_request(&session, direct("hello"));
    settle().await;
    let r2 = spawn_request(&session, query("members > 3"));
    settle().await;
    let r2_dup = spawn_request(&session, query("members > 3"));
    settle().await;

    // Exactly two frames on the wire: R1 and R2.
    let sent = remote.sent_frames();
    assert_eq!(sent.len(), 2);
    let first = Envelope::decode(&sent[0]).unwrap();
    let second = Envelope::decode(&sent[1]).unwrap();
    assert_eq!(first.kind, CommandKind::Direct);
    assert_eq!(second.kind, CommandKind::Conversation);

    // One reply resolves both the original and the duplicate.
    let seq = second.seq.unwrap();
    remote.inject(reply_ok(seq, b"three of them").encode()).await;

    let a = r2.await.unwrap().unwrap();
    let b = r2_dup.await.unwrap().unwrap();
    assert_eq!(a.payload, Some(b"three of them".to_vec()));
    assert_eq!(a, b);

    // R1 was never deduplicated and still awaits its own reply.
    let seq1 = first.seq.unwrap();
    remote.inject(reply_ok(seq1, b"delivered").encode()).await;
    assert!(r1.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn link_loss_cancels_all_pending_and_reconnects_once() {
    let (session, mut events, mut remote, mut remotes, dialer) =
        connected_session(vec![DialOutcome::Succeed, DialOutcome::Succeed], config()).await;

    let r1 = spawn_request(&session, direct("a"));
    let r2 = spawn_request(&session, query("x = 1"));
    let r3 = spawn_request(&session, query("x = 2"));
    settle().await;
    assert_eq!(remote.sent_frames().len(), 3);

    remote.drop_link();

    // All three pending requests resolve with the shared cancellation.
    for handle in [r1, r2, r3] {
        match handle.await.unwrap() {
            Err(SessionError::Cancelled) => {}
            other => panic!("expected cancellation, got {other:?}"),
        }
    }

    // One Disconnected, then one Reconnected for the episode.
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Reconnected
    ));
    expect_quiet(&mut events).await;
    assert_eq!(dialer.attempts(), 2);

    // The new link carries traffic again.
    let mut remote2 = remotes.recv().await.unwrap();
    let pending = spawn_request(&session, query("fresh"));
    let frame = remote2.next_frame().await.unwrap();
    let seq = Envelope::decode(&frame).unwrap().seq.unwrap();
    remote2.inject(reply_ok(seq, b"alive").encode()).await;
    assert!(pending.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn heartbeat_timeout_leaves_connected_exactly_once() {
    let cfg = config();
    let ping = cfg.ping_interval;
    let (session, mut events, remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], cfg).await;

    // Inbound traffic (not probe replies) keeps the connection alive well
    // past the watchdog threshold.
    for _ in 0..4 {
        tokio::time::sleep(ping).await;
        remote.inject(direct("chatter").encode()).await;
    }
    expect_quiet(&mut events).await;

    // Then silence (the link itself stays up): the watchdog threshold is
    // 2 x ping interval.
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));
    // Exactly once per silent-death episode: the dial script is dry, so we
    // stay in reconnecting, and no second Disconnected appears.
    expect_quiet(&mut events).await;

    session.close().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn reconnect_rounds_invalidate_the_endpoint_cache() {
    let mut cfg = config();
    cfg.reconnect = ReconnectPolicy {
        max_attempts: 3,
        delay: Duration::from_millis(10),
    };
    let (session, mut events, remote, _remotes, dialer) =
        connected_session(vec![DialOutcome::Succeed], cfg).await;

    remote.drop_link();
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));

    // Every further dial fails; after each full round of three the
    // directory cache is dropped and the loop keeps going.
    let mut waited = 0;
    while dialer.invalidations() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        waited += 1;
        assert!(waited < 1000, "reconnect loop never invalidated");
    }
    assert!(dialer.attempts() >= 7);

    // Pause cancels the retry loop.
    session.pause().await.unwrap();
    let frozen = dialer.attempts();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(dialer.attempts(), frozen);
}

#[tokio::test(start_paused = true)]
async fn goaway_reconnects_against_fresh_endpoints() {
    let (_session, mut events, remote, mut remotes, dialer) =
        connected_session(vec![DialOutcome::Succeed, DialOutcome::Succeed], config()).await;

    remote.inject(Envelope::new(CommandKind::Goaway).encode()).await;

    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Reconnected
    ));
    assert_eq!(dialer.invalidations(), 1);
    let _remote2 = remotes.recv().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn notifications_are_delivered_in_arrival_order() {
    let (_session, mut events, remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    // Probe replies are liveness-only, never notifications.
    remote.inject(Envelope::echo("app-under-test", "client-1").encode()).await;
    for i in 0..5u8 {
        remote
            .inject(
                Envelope::new(CommandKind::Data)
                    .with_payload(vec![i])
                    .encode(),
            )
            .await;
    }

    for i in 0..5u8 {
        match expect_event(&mut events).await {
            SessionEvent::Notification(env) => {
                assert_eq!(env.kind, CommandKind::Data);
                assert_eq!(env.payload, Some(vec![i]));
            }
            other => panic!("expected notification, got {other:?}"),
        }
    }
    expect_quiet(&mut events).await;
}

#[tokio::test(start_paused = true)]
async fn notification_send_completes_after_the_write() {
    let (session, _events, mut remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    session.send(direct("fire and forget")).await.unwrap();

    let frame = remote.next_frame().await.unwrap();
    let sent = Envelope::decode(&frame).unwrap();
    assert_eq!(sent.kind, CommandKind::Direct);
    assert_eq!(sent.seq, None);
}

#[tokio::test(start_paused = true)]
async fn operations_are_rejected_by_state() {
    let (session, mut events, remote, _remotes, _dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    // Paused: everything but resume/close is invalid, nothing is queued.
    session.pause().await.unwrap();
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));
    assert!(session.send(direct("nope")).await.unwrap_err().is_invalid_state());
    assert!(session.request(query("nope")).await.unwrap_err().is_invalid_state());
    assert!(session.connect().await.unwrap_err().is_invalid_state());
    assert!(session.pause().await.unwrap_err().is_invalid_state());
    assert_eq!(remote.sent_frames().len(), 0);

    // Reconnecting (the dial script is dry, so we stay there): sends are
    // rejected, not queued.
    session.resume().await.unwrap();
    assert!(session.send(direct("nope")).await.unwrap_err().is_invalid_state());

    // Closed is terminal and strict.
    session.close().await.unwrap();
    assert!(session.send(direct("nope")).await.unwrap_err().is_invalid_state());
    assert!(session.connect().await.unwrap_err().is_invalid_state());
    assert!(session.resume().await.unwrap_err().is_invalid_state());
    assert!(session.close().await.unwrap_err().is_invalid_state());
}

#[tokio::test(start_paused = true)]
async fn fresh_session_rejects_traffic_before_connect() {
    let (dialer, _remotes) = ScriptedDialer::new(vec![]);
    let (session, _events) = Session::spawn(Arc::new(dialer), config());

    assert!(session.send(direct("early")).await.unwrap_err().is_invalid_state());
    assert!(session.resume().await.unwrap_err().is_invalid_state());
    assert!(session.pause().await.unwrap_err().is_invalid_state());
}

#[tokio::test(start_paused = true)]
async fn close_while_reconnecting_is_terminal() {
    let (session, mut events, remote, _remotes, dialer) =
        connected_session(vec![DialOutcome::Succeed], config()).await;

    remote.drop_link();
    assert!(matches!(
        expect_event(&mut events).await,
        SessionEvent::Disconnected
    ));

    session.close().await.unwrap();
    let frozen = dialer.attempts();
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(dialer.attempts(), frozen);
    expect_quiet(&mut events).await;
}
