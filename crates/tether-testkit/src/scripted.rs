//! A dialer with a programmed sequence of outcomes.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use tether_session::{DialError, Dialer};

use crate::mem::{mem_pair, MemRemote, MemTransport};

/// What one dial attempt should do.
pub enum DialOutcome {
    /// Refuse the connection.
    Fail,
    /// Produce a fresh in-memory link; its [`MemRemote`] is delivered on
    /// the remotes channel handed out by [`ScriptedDialer::new`].
    Succeed,
    /// Like `Succeed`, after a delay (for shared-outcome and cancellation
    /// tests).
    SucceedAfter(Duration),
}

/// Dialer whose attempts follow a script. Once the script runs dry, every
/// further attempt fails.
pub struct ScriptedDialer {
    script: Mutex<VecDeque<DialOutcome>>,
    attempts: Arc<AtomicU32>,
    invalidations: Arc<AtomicU32>,
    remotes: mpsc::UnboundedSender<MemRemote>,
}

impl ScriptedDialer {
    /// Returns the dialer plus the channel on which each successful dial's
    /// far end arrives.
    pub fn new(script: Vec<DialOutcome>) -> (Self, mpsc::UnboundedReceiver<MemRemote>) {
        let (remotes_tx, remotes_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: Mutex::new(script.into()),
                attempts: Arc::new(AtomicU32::new(0)),
                invalidations: Arc::new(AtomicU32::new(0)),
                remotes: remotes_tx,
            },
            remotes_rx,
        )
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn invalidations(&self) -> u32 {
        self.invalidations.load(Ordering::SeqCst)
    }
}

impl Dialer for ScriptedDialer {
    type Transport = MemTransport;

    async fn dial(&self) -> Result<MemTransport, DialError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let outcome = self.script.lock().pop_front();
        match outcome {
            Some(DialOutcome::Succeed) => {
                let (transport, remote) = mem_pair();
                let _ = self.remotes.send(remote);
                Ok(transport)
            }
            Some(DialOutcome::SucceedAfter(delay)) => {
                tokio::time::sleep(delay).await;
                let (transport, remote) = mem_pair();
                let _ = self.remotes.send(remote);
                Ok(transport)
            }
            Some(DialOutcome::Fail) | None => {
                Err(DialError::Unreachable("scripted refusal".into()))
            }
        }
    }

    fn invalidate(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }
}
