//! The endpoint directory: cache + refresh collapse + invalidation.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Mutex;

use crate::endpoints::EndpointSet;
use crate::query::RouteQuery;

/// Resolves and caches the endpoint set for one application.
///
/// Many tasks may call [`resolve`](Directory::resolve) concurrently; they
/// all observe consistent snapshots, and at most one discovery query is in
/// flight at a time. `resolve` never fails — discovery failure yields the
/// deterministic fallback set.
pub struct Directory<Q> {
    app_id: String,
    query: Q,
    cache: RwLock<Option<Arc<EndpointSet>>>,
    /// Serializes the refresh path so concurrent expired resolves collapse
    /// into one query.
    refresh: Mutex<()>,
    pinned: Option<Arc<EndpointSet>>,
}

impl<Q: RouteQuery> Directory<Q> {
    pub fn new(app_id: impl Into<String>, query: Q) -> Self {
        Self {
            app_id: app_id.into(),
            query,
            cache: RwLock::new(None),
            refresh: Mutex::new(()),
            pinned: None,
        }
    }

    /// A directory pinned to user-supplied endpoints. It never queries the
    /// router and never expires.
    pub fn with_endpoints(
        app_id: impl Into<String>,
        query: Q,
        primary: impl Into<String>,
        secondary: Option<String>,
    ) -> Self {
        let pinned = Arc::new(EndpointSet::pinned(primary.into(), secondary));
        Self {
            app_id: app_id.into(),
            query,
            cache: RwLock::new(Some(pinned.clone())),
            refresh: Mutex::new(()),
            pinned: Some(pinned),
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    fn cached(&self) -> Option<Arc<EndpointSet>> {
        self.cache.read().clone()
    }

    /// Current endpoints: cached if fresh, otherwise re-queried, otherwise
    /// the fallback derivation.
    pub async fn resolve(&self) -> Arc<EndpointSet> {
        if let Some(pinned) = &self.pinned {
            return pinned.clone();
        }
        if let Some(set) = self.cached() {
            if !set.is_expired() {
                return set;
            }
        }

        let _gate = self.refresh.lock().await;
        // Another resolver may have refreshed while we waited on the gate.
        if let Some(set) = self.cached() {
            if !set.is_expired() {
                return set;
            }
        }

        let set = match self.query.fetch(&self.app_id).await {
            Ok(doc) => {
                let set = Arc::new(EndpointSet::from_document(doc));
                tracing::debug!(primary = %set.primary, ttl = set.ttl, "resolved endpoints");
                set
            }
            Err(e) => {
                tracing::warn!(error = %e, "discovery failed, using fallback endpoints");
                Arc::new(EndpointSet::fallback(&self.app_id))
            }
        };
        *self.cache.write() = Some(set.clone());
        set
    }

    /// Drop the cache so the next resolve re-queries the router. Called by
    /// the reconnection strategy when the cached endpoints themselves are
    /// suspect. No-op for pinned directories.
    pub fn invalidate(&self) {
        if self.pinned.is_some() {
            return;
        }
        *self.cache.write() = None;
    }
}
