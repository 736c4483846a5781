//! Query client: the store, the subscription manager and the invalidation
//! dispatcher behind one explicit handle.
//!
//! There is no global cache. Create a client with [`QueryClient::init`], pass it
//! (it is cheap to clone) to whoever needs it, and call [`QueryClient::dispose`]
//! when done. Several isolated clients can live side by side.
//!
//! # Example
//!
//! ```ignore
//! let client = QueryClient::init(Arc::new(transport), CacheConfig::default())?;
//!
//! let mut labels = client.use_query::<ListLabels>(&ListLabelsArg::new("O1"), Default::default())?;
//! let result = labels.settled().await;
//!
//! client
//!   .mutate::<CreateLabel>(&CreateLabelArg::new("O1", "Bug"))
//!   .await?;
//! // `labels` is now stale and refetching
//! ```

use futures::FutureExt;
use serde_json::Value;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, warn};

use super::endpoint::{EndpointRegistry, MutationEndpoint, QueryEndpoint};
use super::entry::{EntrySnapshot, SharedFetch};
use super::error::QueryError;
use super::handle::{MutationTrigger, QueryHandle};
use super::signature::RequestSignature;
use super::store::{CacheStore, FetchStart};
use super::subscription::{Listener, SubscribeOptions, SubscriberRegistry, Subscription};
use super::tag::Tag;
use crate::transport::Transport;

/// Tuning knobs for a [`QueryClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
  /// Grace period before an unreferenced entry is evicted.
  pub keep_unused_for: Duration,
  /// Successful data older than this is refetched when a new subscriber arrives.
  pub stale_time: Option<Duration>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      keep_unused_for: Duration::from_secs(60),
      stale_time: None,
    }
  }
}

impl CacheConfig {
  pub fn new(keep_unused_for: Duration) -> Self {
    Self {
      keep_unused_for,
      ..Self::default()
    }
  }

  pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
    self.stale_time = Some(stale_time);
    self
  }
}

/// Shared mutable state, always accessed under one lock.
pub(crate) struct CacheState {
  pub(crate) store: CacheStore,
  pub(crate) subscribers: SubscriberRegistry,
  pub(crate) disposed: bool,
}

pub(crate) struct ClientInner {
  state: Mutex<CacheState>,
  pub(crate) registry: EndpointRegistry,
  transport: Arc<dyn Transport>,
  pub(crate) config: CacheConfig,
  pub(crate) runtime: Handle,
}

impl ClientInner {
  pub(crate) fn lock(&self) -> MutexGuard<'_, CacheState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Start a fetch for `signature`, or join the one already in flight.
  ///
  /// Must be called with the state lock held so the dedup check and the
  /// installation of the pending fetch are one step.
  pub(crate) fn start_fetch(
    self: &Arc<Self>,
    state: &mut CacheState,
    signature: &RequestSignature,
  ) -> Option<SharedFetch> {
    let arg = state.store.get(signature)?.arg().clone();
    let decl = match self.registry.query(signature.endpoint()) {
      Ok(decl) => decl,
      Err(e) => {
        warn!(%signature, error = %e, "Cannot fetch entry");
        return None;
      }
    };

    let transport = Arc::clone(&self.transport);
    let weak = Arc::downgrade(self);
    let fetch_signature = signature.clone();

    let start = state.store.begin_fetch(signature, move |generation, dispatched| {
      async move {
        let result = match decl.build_request(&arg) {
          Ok(request) => {
            debug!(signature = %fetch_signature, %request, generation, "Fetching");
            dispatched.mark();
            transport.execute(request).await
          }
          Err(e) => Err(e),
        };
        let outcome = result.and_then(|data| {
          let tags = decl.provides_tags(&data, &arg)?;
          Ok((data, tags))
        });
        let reply = outcome.as_ref().map(|(data, _)| data.clone()).map_err(Clone::clone);

        if let Some(inner) = weak.upgrade() {
          inner.finish_fetch(&fetch_signature, generation, outcome);
        }
        reply
      }
      .boxed()
    })?;

    match start {
      FetchStart::Started { future, generation } => {
        let driver = future.clone();
        let task = self.runtime.spawn(async move {
          let _ = driver.await;
        });
        state
          .store
          .attach_task(signature, generation, task.abort_handle());
        Some(future)
      }
      FetchStart::Joined(future) => Some(future),
    }
  }

  fn finish_fetch(
    self: &Arc<Self>,
    signature: &RequestSignature,
    generation: u64,
    outcome: Result<(Value, Vec<Tag>), QueryError>,
  ) {
    if let Err(e) = &outcome {
      warn!(%signature, error = %e, "Fetch failed");
    }

    let notification = {
      let mut state = self.lock();
      if state.disposed {
        return;
      }
      let Some(completion) = state.store.complete_fetch(signature, generation, outcome) else {
        debug!(%signature, generation, "Ignored completion of superseded fetch");
        return;
      };
      if completion.refetch {
        debug!(%signature, "Invalidated while in flight, refetching");
        self.start_fetch(&mut state, signature);
      }
      if completion.unreferenced {
        self.schedule_eviction(signature.clone(), completion.eviction_epoch);
      }
      state.notification(signature)
    };

    if let Some(notification) = notification {
      notification.dispatch();
    }
  }

  pub(crate) fn refetch(self: &Arc<Self>, signature: &RequestSignature) -> Option<SharedFetch> {
    let (future, notification) = {
      let mut state = self.lock();
      if state.disposed {
        return None;
      }
      let future = self.start_fetch(&mut state, signature)?;
      (future, state.notification(signature))
    };
    if let Some(notification) = notification {
      notification.dispatch();
    }
    Some(future)
  }
}

/// Result of a successful mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct MutationOutcome {
  pub data: Value,
  /// Tags the mutation invalidated.
  pub invalidated: Vec<Tag>,
  /// Cache entries those tags staled.
  pub affected: Vec<RequestSignature>,
}

/// Handle to one isolated query cache. Clones share the same cache.
#[derive(Clone)]
pub struct QueryClient {
  inner: Arc<ClientInner>,
}

impl QueryClient {
  /// Create a client that drives fetches on the current tokio runtime.
  pub fn init(transport: Arc<dyn Transport>, config: CacheConfig) -> Result<Self, QueryError> {
    let runtime = Handle::try_current().map_err(|_| QueryError::NoRuntime)?;
    Ok(Self::with_runtime(transport, config, runtime))
  }

  /// Create a client that drives fetches on `runtime`.
  pub fn with_runtime(transport: Arc<dyn Transport>, config: CacheConfig, runtime: Handle) -> Self {
    Self {
      inner: Arc::new(ClientInner {
        state: Mutex::new(CacheState {
          store: CacheStore::new(),
          subscribers: SubscriberRegistry::default(),
          disposed: false,
        }),
        registry: EndpointRegistry::new(),
        transport,
        config,
        runtime,
      }),
    }
  }

  /// Drop every entry and subscription and abort in-flight fetch drivers.
  pub fn dispose(&self) {
    let tasks = {
      let mut state = self.inner.lock();
      if state.disposed {
        return;
      }
      state.disposed = true;
      state.subscribers.clear();
      state.store.clear()
    };
    for task in tasks {
      task.abort();
    }
    debug!("Query client disposed");
  }

  pub fn is_disposed(&self) -> bool {
    self.inner.lock().disposed
  }

  pub fn config(&self) -> &CacheConfig {
    &self.inner.config
  }

  pub fn registry(&self) -> &EndpointRegistry {
    &self.inner.registry
  }

  pub fn register_query<E: QueryEndpoint>(&self) -> &Self {
    self.inner.registry.register_query::<E>();
    self
  }

  pub fn register_mutation<E: MutationEndpoint>(&self) -> &Self {
    self.inner.registry.register_mutation::<E>();
    self
  }

  /// Signature of `E` called with `arg`.
  pub fn signature<E: QueryEndpoint>(arg: &E::Arg) -> Result<RequestSignature, QueryError> {
    Ok(RequestSignature::new(E::NAME, &serde_json::to_value(arg)?))
  }

  /// Look up the entry for `E(arg)`, creating it uninitialized if absent.
  ///
  /// Does not fetch and does not take a reference. A new entry is evicted after
  /// the grace period unless something subscribes to it first.
  pub fn get_or_create<E: QueryEndpoint>(&self, arg: &E::Arg) -> Result<EntrySnapshot, QueryError> {
    self.inner.registry.register_query::<E>();
    E::build_request(arg)?;
    let arg = serde_json::to_value(arg)?;
    let signature = RequestSignature::new(E::NAME, &arg);

    let mut state = self.inner.lock();
    if state.disposed {
      return Err(QueryError::Disposed);
    }
    let created = state.store.get(&signature).is_none();
    let entry = state.store.get_or_create(&signature, &arg);
    let (snapshot, epoch) = (entry.snapshot(), entry.eviction_epoch);
    if created {
      // Nobody holds a reference yet
      self.inner.schedule_eviction(signature, epoch);
    }
    Ok(snapshot)
  }

  pub fn snapshot(&self, signature: &RequestSignature) -> Option<EntrySnapshot> {
    self.inner.lock().store.snapshot(signature)
  }

  /// Every cached entry, oldest first.
  pub fn entries(&self) -> Vec<EntrySnapshot> {
    self.inner.lock().store.snapshots()
  }

  /// Observe `E(arg)`; `listener` sees a snapshot after every change.
  pub fn subscribe<E, F>(
    &self,
    arg: &E::Arg,
    options: SubscribeOptions,
    listener: F,
  ) -> Result<Subscription, QueryError>
  where
    E: QueryEndpoint,
    F: Fn(&EntrySnapshot) + Send + Sync + 'static,
  {
    self.inner.registry.register_query::<E>();
    let arg = serde_json::to_value(arg)?;
    self.subscribe_value(E::NAME, arg, options, Arc::new(listener))
  }

  /// Observe a registered endpoint by name with JSON arguments.
  pub fn subscribe_value(
    &self,
    endpoint: &str,
    arg: Value,
    options: SubscribeOptions,
    listener: Listener,
  ) -> Result<Subscription, QueryError> {
    let decl = self.inner.registry.query(endpoint)?;
    self.inner.subscribe(decl, arg, options, listener)
  }

  /// Subscribe and expose the entry as a typed, awaitable handle.
  pub fn use_query<E: QueryEndpoint>(
    &self,
    arg: &E::Arg,
    options: SubscribeOptions,
  ) -> Result<QueryHandle<E::Output>, QueryError> {
    self.inner.registry.register_query::<E>();
    self.use_query_value(E::NAME, serde_json::to_value(arg)?, options)
  }

  /// Untyped form of [`use_query`](Self::use_query), for endpoints addressed by name.
  pub fn use_query_value<T>(
    &self,
    endpoint: &str,
    arg: Value,
    options: SubscribeOptions,
  ) -> Result<QueryHandle<T>, QueryError> {
    let (tx, rx) = watch::channel(None);
    let listener: Listener = Arc::new(move |snapshot: &EntrySnapshot| {
      tx.send_replace(Some(snapshot.clone()));
    });
    let subscription = self.subscribe_value(endpoint, arg, options, listener)?;
    Ok(QueryHandle::new(subscription, rx))
  }

  /// Fetch `E(arg)` through the cache once and release the reference.
  pub async fn query<E: QueryEndpoint>(&self, arg: &E::Arg) -> Result<E::Output, QueryError> {
    let mut handle = self.use_query::<E>(arg, SubscribeOptions::default())?;
    if let Some(e) = handle.subscription().validation_error() {
      return Err(e.clone());
    }
    handle.settled().await.into_result()
  }

  /// Untyped form of [`query`](Self::query).
  pub async fn query_value(&self, endpoint: &str, arg: Value) -> Result<Value, QueryError> {
    let mut handle: QueryHandle<Value> =
      self.use_query_value(endpoint, arg, SubscribeOptions::default())?;
    if let Some(e) = handle.subscription().validation_error() {
      return Err(e.clone());
    }
    handle.settled().await.into_result()
  }

  /// A reusable trigger for mutation `E` that tracks its last outcome.
  pub fn use_mutation<E: MutationEndpoint>(&self) -> MutationTrigger<E> {
    self.inner.registry.register_mutation::<E>();
    MutationTrigger::new(self.clone())
  }

  /// Run mutation `E` and invalidate the tags it declares on success.
  pub async fn mutate<E: MutationEndpoint>(&self, arg: &E::Arg) -> Result<E::Output, QueryError> {
    self.inner.registry.register_mutation::<E>();
    let outcome = self.mutate_value(E::NAME, serde_json::to_value(arg)?).await?;
    Ok(serde_json::from_value(outcome.data)?)
  }

  /// Untyped form of [`mutate`](Self::mutate).
  pub async fn mutate_value(&self, endpoint: &str, arg: Value) -> Result<MutationOutcome, QueryError> {
    if self.is_disposed() {
      return Err(QueryError::Disposed);
    }
    let decl = self.inner.registry.mutation(endpoint)?;
    let request = decl.build_request(&arg)?;
    debug!(endpoint, %request, "Mutating");

    let result = self.inner.transport.execute(request).await;
    let (invalidated, affected) = self.inner.on_mutation_settled(&decl, &arg, &result);
    result.map(|data| MutationOutcome {
      data,
      invalidated,
      affected,
    })
  }

  /// Stale every entry hit by `tags` and refetch the subscribed ones.
  pub fn invalidate_tags(&self, tags: &[Tag]) -> Vec<RequestSignature> {
    self.inner.invalidate(tags)
  }

  /// Refetch `signature` now, joining any fetch in flight.
  pub fn refetch(&self, signature: &RequestSignature) -> Option<SharedFetch> {
    self.inner.refetch(signature)
  }
}

impl std::fmt::Debug for QueryClient {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let state = self.inner.lock();
    f.debug_struct("QueryClient")
      .field("entries", &state.store.len())
      .field("disposed", &state.disposed)
      .field("config", &self.inner.config)
      .finish_non_exhaustive()
  }
}
