//! Dialing: endpoint resolution plus primary/secondary fallback.

use std::sync::Arc;
use std::time::Duration;

use tether_router::{Directory, RouteQuery};
use tether_session::{DialError, Dialer};

use crate::connection::{connect, WsConnectError, WsConnection};

/// Subprotocol offered in the upgrade request.
pub const SUBPROTOCOL: &str = "tether.cbor.1";

#[derive(Debug, Clone)]
pub struct WsDialerConfig {
    pub subprotocol: String,
    pub connect_timeout: Duration,
}

impl Default for WsDialerConfig {
    fn default() -> Self {
        Self {
            subprotocol: SUBPROTOCOL.to_owned(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Produces websocket transports for the session: resolve the endpoint
/// set, dial the primary, and fall back to the secondary on failure.
pub struct WsDialer<Q> {
    directory: Arc<Directory<Q>>,
    config: WsDialerConfig,
}

impl<Q: RouteQuery> WsDialer<Q> {
    pub fn new(directory: Arc<Directory<Q>>, config: WsDialerConfig) -> Self {
        Self { directory, config }
    }
}

impl From<WsConnectError> for DialError {
    fn from(e: WsConnectError) -> Self {
        match e {
            WsConnectError::InvalidAddress(addr) => DialError::InvalidAddress(addr),
            WsConnectError::Handshake(e) => DialError::Unreachable(e),
            WsConnectError::Timeout => DialError::Timeout,
        }
    }
}

impl<Q: RouteQuery> Dialer for WsDialer<Q> {
    type Transport = WsConnection;

    async fn dial(&self) -> Result<WsConnection, DialError> {
        let endpoints = self.directory.resolve().await;

        tracing::debug!(address = %endpoints.primary, "dialing primary");
        match connect(
            &endpoints.primary,
            &self.config.subprotocol,
            self.config.connect_timeout,
        )
        .await
        {
            Ok(connection) => Ok(connection),
            Err(primary_err) => {
                tracing::warn!(
                    address = %endpoints.primary,
                    error = %primary_err,
                    "primary failed, dialing secondary",
                );
                connect(
                    &endpoints.secondary,
                    &self.config.subprotocol,
                    self.config.connect_timeout,
                )
                .await
                .map_err(DialError::from)
            }
        }
    }

    fn invalidate(&self) {
        self.directory.invalidate();
    }
}
