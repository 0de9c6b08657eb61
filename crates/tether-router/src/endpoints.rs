//! Endpoint snapshots and the deterministic fallback derivation.

use std::time::Duration;

use tokio::time::Instant;

use crate::query::RouteDocument;

/// Region tag embedded in the trailing segment of an application id.
/// Apps without a recognized tag are served by the default cluster.
const REGION_TAG_EAST: &str = "-gzGzoHsz";
const REGION_TAG_INTL: &str = "-MdYXbMMI";

const DOMAIN_DEFAULT: &str = "tether-realtime.net";
const DOMAIN_EAST: &str = "east.tether-realtime.net";
const DOMAIN_INTL: &str = "tether-realtime.app";

/// How a set of endpoints was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointSource {
    /// Fetched from the discovery router.
    Network,
    /// Derived locally from the application id.
    Fallback,
    /// Supplied by the user at construction time.
    Pinned,
}

/// An immutable snapshot of the realtime endpoints for one application.
///
/// Snapshots are replaced wholesale on refresh, never mutated, so they can
/// be handed out across tasks freely. A negative TTL means the set never
/// expires (fallback and pinned sets).
#[derive(Debug, Clone)]
pub struct EndpointSet {
    pub primary: String,
    pub secondary: String,
    pub ttl: i64,
    pub fetched_at: Instant,
    pub source: EndpointSource,
}

impl EndpointSet {
    pub(crate) fn from_document(doc: RouteDocument) -> Self {
        let secondary = doc.secondary.unwrap_or_else(|| doc.server.clone());
        Self {
            primary: doc.server,
            secondary,
            ttl: doc.ttl,
            fetched_at: Instant::now(),
            source: EndpointSource::Network,
        }
    }

    pub(crate) fn pinned(primary: String, secondary: Option<String>) -> Self {
        let secondary = secondary.unwrap_or_else(|| primary.clone());
        Self {
            primary,
            secondary,
            ttl: -1,
            fetched_at: Instant::now(),
            source: EndpointSource::Pinned,
        }
    }

    /// Derive the fallback endpoints for an application id.
    ///
    /// The derivation is pure: the address prefix is the first eight
    /// characters of the id (lowercased), and the domain is selected by the
    /// region tag at the end of the id. The same id always produces the
    /// same addresses.
    pub fn fallback(app_id: &str) -> Self {
        let prefix: String = app_id.chars().take(8).collect::<String>().to_lowercase();
        let domain = if app_id.ends_with(REGION_TAG_EAST) {
            DOMAIN_EAST
        } else if app_id.ends_with(REGION_TAG_INTL) {
            DOMAIN_INTL
        } else {
            DOMAIN_DEFAULT
        };
        Self {
            primary: format!("wss://{prefix}.realtime.{domain}"),
            secondary: format!("wss://{prefix}.realtime-spare.{domain}"),
            ttl: -1,
            fetched_at: Instant::now(),
            source: EndpointSource::Fallback,
        }
    }

    /// Whether this snapshot is past its TTL. Sets with a negative TTL
    /// never expire.
    pub fn is_expired(&self) -> bool {
        if self.ttl < 0 {
            return false;
        }
        self.fetched_at.elapsed() > Duration::from_secs(self.ttl as u64)
    }
}
