//! Tagged query cache with request deduplication, tag-based invalidation and
//! dependent query coordination.
//!
//! - [`cache`]: the store, subscriptions, invalidation and the [`cache::QueryClient`]
//! - [`dependent`]: selection hierarchies whose queries depend on upstream ids
//! - [`transport`]: the request executor the cache delegates to
//! - [`api`]: endpoint declarations for labels, work logs, forms and reports

pub mod api;
pub mod cache;
pub mod config;
pub mod dependent;
pub mod logging;
pub mod transport;

pub use cache::{QueryClient, QueryError, Tag};
