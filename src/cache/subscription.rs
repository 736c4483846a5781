//! Subscription manager: reference counting, skip, and delayed eviction.
//!
//! A subscription registers a listener for one request signature. Active
//! subscriptions hold a reference on the entry; skipped ones hold nothing and
//! trigger no fetch until re-enabled. When the last reference goes away the
//! entry is kept for a grace period and evicted only if nobody came back and no
//! fetch is in flight.

use serde_json::Value;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Weak};
use tracing::debug;

use super::client::{CacheState, ClientInner};
use super::endpoint::QueryDecl;
use super::entry::{EntrySnapshot, SharedFetch};
use super::error::QueryError;
use super::signature::RequestSignature;

/// Observer callback invoked with a fresh snapshot whenever the entry changes.
pub type Listener = Arc<dyn Fn(&EntrySnapshot) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Options for a new subscription.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscribeOptions {
  /// Register interest without fetching or holding a reference.
  pub skip: bool,
}

impl SubscribeOptions {
  pub fn skip(skip: bool) -> Self {
    Self { skip }
  }
}

struct Record {
  signature: RequestSignature,
  arg: Value,
  listener: Listener,
  skip: bool,
  /// Arguments passed validation; invalid subscriptions stay skipped forever.
  valid: bool,
}

impl Record {
  fn is_active(&self) -> bool {
    self.valid && !self.skip
  }
}

/// Bookkeeping for every live subscription.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
  next_id: u64,
  records: HashMap<SubscriptionId, Record>,
  by_signature: HashMap<RequestSignature, BTreeSet<SubscriptionId>>,
}

impl SubscriberRegistry {
  fn insert(&mut self, record: Record) -> SubscriptionId {
    self.next_id += 1;
    let id = SubscriptionId(self.next_id);
    self
      .by_signature
      .entry(record.signature.clone())
      .or_default()
      .insert(id);
    self.records.insert(id, record);
    id
  }

  fn remove(&mut self, id: SubscriptionId) -> Option<Record> {
    let record = self.records.remove(&id)?;
    if let Some(ids) = self.by_signature.get_mut(&record.signature) {
      ids.remove(&id);
      if ids.is_empty() {
        self.by_signature.remove(&record.signature);
      }
    }
    Some(record)
  }

  fn listeners_for(&self, signature: &RequestSignature) -> Vec<Listener> {
    self
      .by_signature
      .get(signature)
      .into_iter()
      .flatten()
      .filter_map(|id| self.records.get(id))
      .filter(|record| record.is_active())
      .map(|record| Arc::clone(&record.listener))
      .collect()
  }

  pub(crate) fn clear(&mut self) {
    self.records.clear();
    self.by_signature.clear();
  }
}

/// Snapshot plus the listeners that should see it, dispatched outside the lock.
pub(crate) struct Notification {
  listeners: Vec<Listener>,
  snapshot: EntrySnapshot,
}

impl Notification {
  pub(crate) fn dispatch(self) {
    for listener in &self.listeners {
      listener(&self.snapshot);
    }
  }
}

impl CacheState {
  pub(crate) fn notification(&self, signature: &RequestSignature) -> Option<Notification> {
    let snapshot = self.store.snapshot(signature)?;
    let listeners = self.subscribers.listeners_for(signature);
    if listeners.is_empty() {
      return None;
    }
    Some(Notification {
      listeners,
      snapshot,
    })
  }
}

impl ClientInner {
  pub(crate) fn subscribe(
    self: &Arc<Self>,
    decl: QueryDecl,
    arg: Value,
    options: SubscribeOptions,
    listener: Listener,
  ) -> Result<Subscription, QueryError> {
    let signature = RequestSignature::new(decl.name, &arg);

    // Malformed arguments never reach the transport; the subscription is inert.
    let validation_error = decl.build_request(&arg).err();
    if let Some(e) = &validation_error {
      debug!(%signature, error = %e, "Subscription skipped: invalid arguments");
    }

    let (id, notification) = {
      let mut state = self.lock();
      if state.disposed {
        return Err(QueryError::Disposed);
      }
      let record = Record {
        signature: signature.clone(),
        arg,
        listener,
        skip: options.skip,
        valid: validation_error.is_none(),
      };
      let active = record.is_active();
      let arg = record.arg.clone();
      let id = state.subscribers.insert(record);
      let notification = if active {
        self.activate(&mut state, &signature, &arg);
        state.notification(&signature)
      } else {
        None
      };
      (id, notification)
    };

    if let Some(notification) = notification {
      notification.dispatch();
    }

    Ok(Subscription {
      id,
      signature,
      validation_error,
      client: Arc::downgrade(self),
      released: false,
    })
  }

  /// Take a reference on the entry and fetch it if it is missing or stale.
  fn activate(self: &Arc<Self>, state: &mut CacheState, signature: &RequestSignature, arg: &Value) {
    state.store.get_or_create(signature, arg);
    let count = state.store.retain(signature);
    debug!(%signature, subscribers = count, "Subscribed");

    if let Some(stale_time) = self.config.stale_time {
      state.store.expire_if_older(signature, stale_time);
    }

    let needs_fetch = state
      .store
      .get(signature)
      .is_some_and(|entry| entry.needs_fetch() && !entry.is_fetching());
    if needs_fetch {
      self.start_fetch(state, signature);
    }
  }

  /// Drop a reference and arm the eviction timer when it was the last one.
  fn deactivate(self: &Arc<Self>, state: &mut CacheState, signature: &RequestSignature) {
    if let Some((count, epoch)) = state.store.release(signature) {
      debug!(%signature, subscribers = count, "Unsubscribed");
      if count == 0 {
        self.schedule_eviction(signature.clone(), epoch);
      }
    }
  }

  pub(crate) fn set_skip(self: &Arc<Self>, id: SubscriptionId, skip: bool) {
    let notification = {
      let mut state = self.lock();
      if state.disposed {
        return;
      }
      let Some(record) = state.subscribers.records.get_mut(&id) else {
        return;
      };
      if !record.valid || record.skip == skip {
        return;
      }
      record.skip = skip;
      let signature = record.signature.clone();
      let arg = record.arg.clone();

      if skip {
        self.deactivate(&mut state, &signature);
        None
      } else {
        self.activate(&mut state, &signature, &arg);
        state.notification(&signature)
      }
    };

    if let Some(notification) = notification {
      notification.dispatch();
    }
  }

  pub(crate) fn is_active(&self, id: SubscriptionId) -> bool {
    self
      .lock()
      .subscribers
      .records
      .get(&id)
      .is_some_and(Record::is_active)
  }

  pub(crate) fn unsubscribe(self: &Arc<Self>, id: SubscriptionId) {
    let mut state = self.lock();
    if state.disposed {
      return;
    }
    if let Some(record) = state.subscribers.remove(id) {
      if record.is_active() {
        self.deactivate(&mut state, &record.signature);
      }
    }
  }

  /// Evict `signature` after the grace period unless it was referenced again.
  pub(crate) fn schedule_eviction(self: &Arc<Self>, signature: RequestSignature, epoch: u64) {
    let weak = Arc::downgrade(self);
    let grace = self.config.keep_unused_for;
    self.runtime.spawn(async move {
      tokio::time::sleep(grace).await;
      if let Some(inner) = weak.upgrade() {
        inner.evict_if_unused(&signature, epoch);
      }
    });
  }

  fn evict_if_unused(&self, signature: &RequestSignature, epoch: u64) {
    let mut state = self.lock();
    if state.disposed {
      return;
    }
    if state.store.evict_if_unused(signature, epoch) {
      debug!(%signature, "Evicted unused cache entry");
    }
  }
}

/// Handle to one subscription. Dropping it unsubscribes.
pub struct Subscription {
  id: SubscriptionId,
  signature: RequestSignature,
  validation_error: Option<QueryError>,
  client: Weak<ClientInner>,
  released: bool,
}

impl Subscription {
  pub fn id(&self) -> SubscriptionId {
    self.id
  }

  pub fn signature(&self) -> &RequestSignature {
    &self.signature
  }

  /// Why the arguments were rejected, if they were.
  pub fn validation_error(&self) -> Option<&QueryError> {
    self.validation_error.as_ref()
  }

  /// Whether the subscription currently holds a reference on its entry.
  pub fn is_active(&self) -> bool {
    self
      .client
      .upgrade()
      .is_some_and(|inner| inner.is_active(self.id))
  }

  /// Enable or disable the subscription. Invalid arguments keep it skipped.
  pub fn set_skip(&self, skip: bool) {
    if let Some(inner) = self.client.upgrade() {
      inner.set_skip(self.id, skip);
    }
  }

  /// Refetch the entry now, joining any fetch already in flight.
  pub fn refetch(&self) -> Option<SharedFetch> {
    let inner = self.client.upgrade()?;
    if !inner.is_active(self.id) {
      return None;
    }
    inner.refetch(&self.signature)
  }

  pub fn snapshot(&self) -> Option<EntrySnapshot> {
    let inner = self.client.upgrade()?;
    let state = inner.lock();
    state.store.snapshot(&self.signature)
  }

  pub fn unsubscribe(mut self) {
    self.release();
  }

  fn release(&mut self) {
    if self.released {
      return;
    }
    self.released = true;
    if let Some(inner) = self.client.upgrade() {
      inner.unsubscribe(self.id);
    }
  }
}

impl Drop for Subscription {
  fn drop(&mut self) {
    self.release();
  }
}

impl std::fmt::Debug for Subscription {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Subscription")
      .field("id", &self.id)
      .field("signature", &self.signature)
      .field("validation_error", &self.validation_error)
      .finish_non_exhaustive()
  }
}
