//! Cache entries and their observable snapshots.

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, Shared};
use serde_json::Value;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tokio::time::Instant;

use super::error::QueryError;
use super::signature::RequestSignature;
use super::tag::Tag;

/// An in-flight fetch that any number of waiters can await.
pub type SharedFetch = Shared<BoxFuture<'static, Result<Value, QueryError>>>;

/// Lifecycle status of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryStatus {
  /// Created, never fetched
  Uninitialized,
  /// First fetch in flight, no data yet
  Loading,
  Success,
  /// Last fetch failed; previous data (if any) is kept
  Error,
  /// Flagged for refetch; previous data stays visible
  Stale,
}

/// Stable identity of a cache entry for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(pub(crate) u64);

/// Set once a fetch has handed its request to the transport.
#[derive(Debug, Clone, Default)]
pub struct Dispatched(Arc<AtomicBool>);

impl Dispatched {
  pub fn mark(&self) {
    self.0.store(true, Ordering::SeqCst);
  }

  pub fn is_set(&self) -> bool {
    self.0.load(Ordering::SeqCst)
  }
}

pub(crate) struct PendingFetch {
  pub generation: u64,
  pub future: SharedFetch,
  pub task: Option<AbortHandle>,
  pub dispatched: Dispatched,
}

/// One cached query result. Owned by [`CacheStore`](super::store::CacheStore).
pub struct CacheEntry {
  pub(crate) id: EntryId,
  pub(crate) signature: RequestSignature,
  pub(crate) arg: Value,
  pub(crate) status: EntryStatus,
  pub(crate) data: Option<Value>,
  pub(crate) error: Option<QueryError>,
  pub(crate) tags: BTreeSet<Tag>,
  pub(crate) subscriber_count: usize,
  pub(crate) pending: Option<PendingFetch>,
  /// Invalidated while a fetch was in flight; that fetch's result lands as stale.
  pub(crate) stale_on_arrival: bool,
  pub(crate) fetched_at: Option<DateTime<Utc>>,
  pub(crate) fetched_instant: Option<Instant>,
  /// Bumped on every new reference so older eviction timers become no-ops.
  pub(crate) eviction_epoch: u64,
  pub(crate) next_generation: u64,
}

impl CacheEntry {
  pub(crate) fn new(id: EntryId, signature: RequestSignature, arg: Value) -> Self {
    Self {
      id,
      signature,
      arg,
      status: EntryStatus::Uninitialized,
      data: None,
      error: None,
      tags: BTreeSet::new(),
      subscriber_count: 0,
      pending: None,
      stale_on_arrival: false,
      fetched_at: None,
      fetched_instant: None,
      eviction_epoch: 0,
      next_generation: 0,
    }
  }

  pub fn id(&self) -> EntryId {
    self.id
  }

  pub fn signature(&self) -> &RequestSignature {
    &self.signature
  }

  pub fn arg(&self) -> &Value {
    &self.arg
  }

  pub fn status(&self) -> EntryStatus {
    self.status
  }

  pub fn data(&self) -> Option<&Value> {
    self.data.as_ref()
  }

  pub fn error(&self) -> Option<&QueryError> {
    self.error.as_ref()
  }

  pub fn tags(&self) -> &BTreeSet<Tag> {
    &self.tags
  }

  pub fn subscriber_count(&self) -> usize {
    self.subscriber_count
  }

  pub fn is_fetching(&self) -> bool {
    self.pending.is_some()
  }

  /// Whether a new subscriber should trigger a fetch.
  pub(crate) fn needs_fetch(&self) -> bool {
    matches!(self.status, EntryStatus::Uninitialized | EntryStatus::Stale)
  }

  pub(crate) fn snapshot(&self) -> EntrySnapshot {
    EntrySnapshot {
      id: self.id,
      signature: self.signature.clone(),
      status: self.status,
      data: self.data.clone(),
      error: self.error.clone(),
      tags: self.tags.clone(),
      subscriber_count: self.subscriber_count,
      is_fetching: self.pending.is_some(),
      fetched_at: self.fetched_at,
    }
  }
}

impl std::fmt::Debug for CacheEntry {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("CacheEntry")
      .field("id", &self.id)
      .field("signature", &self.signature)
      .field("status", &self.status)
      .field("tags", &self.tags)
      .field("subscriber_count", &self.subscriber_count)
      .field("is_fetching", &self.pending.is_some())
      .finish_non_exhaustive()
  }
}

/// Point-in-time copy of an entry handed to observers.
#[derive(Debug, Clone, PartialEq)]
pub struct EntrySnapshot {
  pub id: EntryId,
  pub signature: RequestSignature,
  pub status: EntryStatus,
  pub data: Option<Value>,
  pub error: Option<QueryError>,
  pub tags: BTreeSet<Tag>,
  pub subscriber_count: usize,
  pub is_fetching: bool,
  pub fetched_at: Option<DateTime<Utc>>,
}
