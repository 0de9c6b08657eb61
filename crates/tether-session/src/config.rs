//! Session configuration.

use std::time::Duration;

/// Bounded-retry parameters for the reconnection strategy.
///
/// A round is `max_attempts` dials with `delay` between failures. If a
/// whole round fails the endpoint cache is invalidated and another round
/// starts; rounds repeat until cancelled.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            delay: Duration::from_secs(10),
        }
    }
}

/// Configuration for one session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Application identifier, stamped on liveness probes.
    pub app_id: String,
    /// Identity of this connection, stamped on liveness probes.
    pub session_id: String,
    /// Interval between liveness probes. The watchdog checks at half this
    /// interval and declares the connection dead past twice this interval
    /// without inbound traffic.
    pub ping_interval: Duration,
    pub reconnect: ReconnectPolicy,
}

impl SessionConfig {
    pub fn new(app_id: impl Into<String>, session_id: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            session_id: session_id.into(),
            ping_interval: Duration::from_secs(180),
            reconnect: ReconnectPolicy::default(),
        }
    }
}
