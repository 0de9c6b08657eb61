//! tether-router: endpoint discovery for the realtime connection.
//!
//! The realtime endpoints for an application are not static: a discovery
//! query against a well-known router returns the current primary/secondary
//! addresses plus a TTL. This crate owns that lookup: it caches the result,
//! re-queries on expiry, collapses concurrent refreshes into one in-flight
//! query, and — when the router itself is unreachable — derives a
//! deterministic fallback set from the application id so connecting is
//! never blocked on discovery.
//!
//! The [`Directory`] is an explicit instance owned by whoever builds a
//! connection; there is no process-wide singleton. Multiple app contexts
//! each get their own directory, and tests get an isolated one.

mod directory;
mod endpoints;
mod query;

pub use directory::Directory;
pub use endpoints::{EndpointSet, EndpointSource};
pub use query::{HttpRouteQuery, QueryError, RouteDocument, RouteQuery};
