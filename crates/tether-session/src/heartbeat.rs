//! Application-level heartbeat.
//!
//! The transport cannot rely on lower-layer keepalive frames, so liveness
//! is probed in-band: a ping task sends an echo envelope every interval,
//! and a watchdog task checks — at half that interval — how long it has
//! been since the last acknowledgment. Past twice the interval the
//! connection is declared dead.
//!
//! Any inbound frame counts as an acknowledgment, not only echo replies;
//! heavy one-way notification traffic must not look like a dead link.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::transport::TransportSender;

pub struct Heartbeat {
    last_ack: Arc<Mutex<Instant>>,
    cancel: CancellationToken,
}

impl Heartbeat {
    /// Start the ping and watchdog tasks.
    ///
    /// `probe` is the pre-encoded liveness envelope, sent through the same
    /// FIFO queue as everything else. `on_timeout` fires at most once; the
    /// heartbeat stops itself when it does.
    pub fn start<S, F>(sender: S, probe: Vec<u8>, interval: Duration, on_timeout: F) -> Self
    where
        S: TransportSender,
        F: FnOnce() + Send + 'static,
    {
        let last_ack = Arc::new(Mutex::new(Instant::now()));
        let cancel = CancellationToken::new();

        let ping_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = ping_cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval) => {}
                }
                tracing::debug!("sending liveness probe");
                match sender.send(probe.clone()).await {
                    Ok(ticket) => {
                        if let Err(e) = ticket.done().await {
                            tracing::warn!(error = %e, "liveness probe write failed");
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "liveness probe not queued"),
                }
            }
        });

        let watchdog_cancel = cancel.clone();
        let watchdog_ack = last_ack.clone();
        let threshold = interval * 2;
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = watchdog_cancel.cancelled() => return,
                    _ = tokio::time::sleep(interval / 2) => {}
                }
                let silent_for = watchdog_ack.lock().elapsed();
                if silent_for > threshold {
                    tracing::warn!(?silent_for, "liveness timeout");
                    // Stop both tasks before notifying so a second firing
                    // is impossible.
                    watchdog_cancel.cancel();
                    on_timeout();
                    return;
                }
            }
        });

        Self { last_ack, cancel }
    }

    /// Record proof of liveness. Called for every inbound frame.
    pub fn touch(&self) {
        *self.last_ack.lock() = Instant::now();
    }

    /// Cancel both tasks. Safe to call more than once.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
