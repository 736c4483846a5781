//! Tagged query cache.
//!
//! This module provides a transport-agnostic cache for request/response APIs that:
//! - Keeps one entry per request signature (endpoint + canonical arguments)
//! - Deduplicates concurrent fetches of the same signature
//! - Reference counts subscribers and evicts unused entries after a grace period
//! - Stales and refetches entries by tag after successful mutations

mod client;
mod endpoint;
mod entry;
mod error;
mod handle;
mod invalidation;
mod signature;
mod store;
mod subscription;
mod tag;

pub use client::{CacheConfig, MutationOutcome, QueryClient};
pub use endpoint::{require, EndpointRegistry, MutationDecl, MutationEndpoint, QueryDecl, QueryEndpoint};
pub use entry::{EntryId, EntrySnapshot, EntryStatus, SharedFetch};
pub use error::QueryError;
pub use handle::{MutationState, MutationTrigger, QueryHandle, QueryResult};
pub use signature::RequestSignature;
pub use subscription::{Listener, SubscribeOptions, Subscription, SubscriptionId};
pub use tag::{parse_tags, Tag, TagSpec};
