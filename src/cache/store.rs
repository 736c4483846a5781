//! Cache store: one entry per request signature.
//!
//! The store is plain synchronous state. It never talks to the transport; the
//! caller supplies the request future when a fetch begins. All mutation of
//! entry status, data and tags goes through the methods here.

use chrono::Utc;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use tokio::task::AbortHandle;
use tokio::time::Instant;
use tracing::debug;

use super::entry::{CacheEntry, Dispatched, EntryId, EntrySnapshot, EntryStatus, PendingFetch, SharedFetch};
use super::error::QueryError;
use super::signature::RequestSignature;
use super::tag::Tag;

/// Outcome of [`CacheStore::begin_fetch`].
pub enum FetchStart {
  /// A new request was issued; the caller must drive it.
  Started { future: SharedFetch, generation: u64 },
  /// A request for this signature was already in flight.
  Joined(SharedFetch),
}

impl FetchStart {
  pub fn future(&self) -> SharedFetch {
    match self {
      FetchStart::Started { future, .. } => future.clone(),
      FetchStart::Joined(future) => future.clone(),
    }
  }
}

/// What happened when a fetch completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completion {
  /// The entry was invalidated mid-flight and still has subscribers.
  pub refetch: bool,
  /// The entry has no subscribers and may now be scheduled for eviction.
  pub unreferenced: bool,
  pub eviction_epoch: u64,
}

#[derive(Default)]
pub struct CacheStore {
  entries: HashMap<RequestSignature, CacheEntry>,
  next_id: u64,
}

impl CacheStore {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn len(&self) -> usize {
    self.entries.len()
  }

  pub fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  pub fn get(&self, signature: &RequestSignature) -> Option<&CacheEntry> {
    self.entries.get(signature)
  }

  /// Return the entry for `signature`, creating it `Uninitialized` if absent.
  pub fn get_or_create(&mut self, signature: &RequestSignature, arg: &Value) -> &CacheEntry {
    let next_id = &mut self.next_id;
    self.entries.entry(signature.clone()).or_insert_with(|| {
      *next_id += 1;
      debug!(%signature, "Created cache entry");
      CacheEntry::new(EntryId(*next_id), signature.clone(), arg.clone())
    })
  }

  /// Start a fetch for `signature` unless one is already in flight.
  ///
  /// `make_request` is only invoked when a new request is needed, so at most one
  /// transport call is outstanding per signature. The future it returns must
  /// mark its [`Dispatched`] flag right before calling the transport. Returns
  /// `None` if there is no entry for `signature`.
  pub fn begin_fetch<F>(
    &mut self,
    signature: &RequestSignature,
    make_request: F,
  ) -> Option<FetchStart>
  where
    F: FnOnce(u64, Dispatched) -> BoxFuture<'static, Result<Value, QueryError>>,
  {
    let entry = self.entries.get_mut(signature)?;

    if let Some(pending) = &entry.pending {
      debug!(%signature, "Joined in-flight fetch");
      return Some(FetchStart::Joined(pending.future.clone()));
    }

    entry.next_generation += 1;
    let generation = entry.next_generation;
    let dispatched = Dispatched::default();
    let future = make_request(generation, dispatched.clone()).shared();
    entry.pending = Some(PendingFetch {
      generation,
      future: future.clone(),
      task: None,
      dispatched,
    });
    entry.stale_on_arrival = false;
    if entry.status == EntryStatus::Uninitialized {
      entry.status = EntryStatus::Loading;
    }

    Some(FetchStart::Started { future, generation })
  }

  /// Remember the task driving `generation` so it can be aborted on dispose.
  pub fn attach_task(&mut self, signature: &RequestSignature, generation: u64, task: AbortHandle) {
    // No pending fetch means it already completed
    if let Some(pending) = self.pending_mut(signature, generation) {
      pending.task = Some(task);
    }
  }

  fn pending_mut(&mut self, signature: &RequestSignature, generation: u64) -> Option<&mut PendingFetch> {
    self
      .entries
      .get_mut(signature)?
      .pending
      .as_mut()
      .filter(|p| p.generation == generation)
  }

  /// Store the outcome of fetch `generation`.
  ///
  /// Success replaces data and the whole tag set. Failure records the error and
  /// keeps the previous data and tags. Returns `None` if the entry is gone or a
  /// different fetch now owns it.
  pub fn complete_fetch(
    &mut self,
    signature: &RequestSignature,
    generation: u64,
    outcome: Result<(Value, Vec<Tag>), QueryError>,
  ) -> Option<Completion> {
    let entry = self.entries.get_mut(signature)?;
    if entry.pending.as_ref().map(|p| p.generation) != Some(generation) {
      return None;
    }
    entry.pending = None;

    match outcome {
      Ok((data, tags)) => {
        entry.data = Some(data);
        entry.error = None;
        entry.tags = tags.into_iter().collect();
        entry.fetched_at = Some(Utc::now());
        entry.fetched_instant = Some(Instant::now());
        entry.status = EntryStatus::Success;
      }
      Err(error) => {
        entry.error = Some(error);
        entry.status = EntryStatus::Error;
      }
    }

    let invalidated = std::mem::take(&mut entry.stale_on_arrival);
    if invalidated {
      entry.status = EntryStatus::Stale;
    }

    Some(Completion {
      refetch: invalidated && entry.subscriber_count > 0,
      unreferenced: entry.subscriber_count == 0,
      eviction_epoch: entry.eviction_epoch,
    })
  }

  /// Flag an entry for refetch without dropping its data.
  ///
  /// An entry whose request is already on the wire is flagged so that result
  /// lands stale. A fetch not yet dispatched will see the change anyway and is
  /// left alone. Returns `false` if there is no such entry.
  pub fn mark_stale(&mut self, signature: &RequestSignature) -> bool {
    let Some(entry) = self.entries.get_mut(signature) else {
      return false;
    };
    if entry.pending.as_ref().is_some_and(|p| p.dispatched.is_set()) {
      entry.stale_on_arrival = true;
    }
    if matches!(entry.status, EntryStatus::Success | EntryStatus::Error) {
      entry.status = EntryStatus::Stale;
    }
    true
  }

  /// Stale a `Success` entry whose last fetch is older than `stale_time`.
  pub fn expire_if_older(&mut self, signature: &RequestSignature, stale_time: std::time::Duration) {
    if let Some(entry) = self.entries.get_mut(signature) {
      let expired = entry
        .fetched_instant
        .map(|at| at.elapsed() >= stale_time)
        .unwrap_or(false);
      if entry.status == EntryStatus::Success && expired {
        entry.status = EntryStatus::Stale;
      }
    }
  }

  /// Add a reference. Returns the new count.
  pub fn retain(&mut self, signature: &RequestSignature) -> usize {
    match self.entries.get_mut(signature) {
      Some(entry) => {
        entry.subscriber_count += 1;
        entry.eviction_epoch += 1;
        entry.subscriber_count
      }
      None => 0,
    }
  }

  /// Drop a reference. Returns the new count and the epoch an eviction timer must see.
  pub fn release(&mut self, signature: &RequestSignature) -> Option<(usize, u64)> {
    let entry = self.entries.get_mut(signature)?;
    entry.subscriber_count = entry.subscriber_count.saturating_sub(1);
    Some((entry.subscriber_count, entry.eviction_epoch))
  }

  /// Remove the entry if it is still unreferenced at `epoch` and has no fetch in flight.
  pub fn evict_if_unused(&mut self, signature: &RequestSignature, epoch: u64) -> bool {
    let evictable = self.entries.get(signature).is_some_and(|entry| {
      entry.subscriber_count == 0 && entry.eviction_epoch == epoch && entry.pending.is_none()
    });
    if evictable {
      self.entries.remove(signature);
    }
    evictable
  }

  /// Signatures of every entry hit by at least one of `tags`.
  pub fn matching(&self, tags: &[Tag]) -> Vec<RequestSignature> {
    let mut matched: Vec<RequestSignature> = self
      .entries
      .values()
      .filter(|entry| {
        tags
          .iter()
          .any(|requested| entry.tags.iter().any(|tag| tag.is_hit_by(requested)))
      })
      .map(|entry| entry.signature.clone())
      .collect();
    matched.sort();
    matched
  }

  pub fn snapshot(&self, signature: &RequestSignature) -> Option<EntrySnapshot> {
    self.entries.get(signature).map(CacheEntry::snapshot)
  }

  pub fn snapshots(&self) -> Vec<EntrySnapshot> {
    let mut all: Vec<_> = self.entries.values().map(CacheEntry::snapshot).collect();
    all.sort_by_key(|s| s.id);
    all
  }

  /// Drop every entry, returning the tasks still driving fetches.
  pub fn clear(&mut self) -> Vec<AbortHandle> {
    self
      .entries
      .drain()
      .filter_map(|(_, entry)| entry.pending.and_then(|p| p.task))
      .collect()
  }
}
