//! Typed views over subscriptions and mutations.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::marker::PhantomData;
use tokio::sync::watch;

use super::client::QueryClient;
use super::endpoint::MutationEndpoint;
use super::entry::{EntryId, EntrySnapshot, EntryStatus, SharedFetch};
use super::error::QueryError;
use super::subscription::Subscription;
use super::tag::Tag;

/// The state of a query as seen by one subscriber.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryResult<T> {
  pub entry_id: Option<EntryId>,
  pub status: EntryStatus,
  pub data: Option<T>,
  pub error: Option<QueryError>,
  pub is_fetching: bool,
}

impl<T> QueryResult<T> {
  fn uninitialized() -> Self {
    Self {
      entry_id: None,
      status: EntryStatus::Uninitialized,
      data: None,
      error: None,
      is_fetching: false,
    }
  }

  /// No data yet and a first fetch is in flight.
  pub fn is_loading(&self) -> bool {
    self.status == EntryStatus::Loading
  }

  pub fn is_success(&self) -> bool {
    self.status == EntryStatus::Success
  }

  pub fn is_error(&self) -> bool {
    self.status == EntryStatus::Error
  }

  pub fn is_stale(&self) -> bool {
    self.status == EntryStatus::Stale
  }

  /// Settled data, or the error that replaced it.
  pub fn into_result(self) -> Result<T, QueryError> {
    if let Some(error) = self.error.filter(|_| self.status == EntryStatus::Error) {
      return Err(error);
    }
    self
      .data
      .ok_or_else(|| QueryError::Decode(format!("no data in {:?} entry", self.status)))
  }
}

impl<T: DeserializeOwned> QueryResult<T> {
  fn from_snapshot(snapshot: &EntrySnapshot) -> Self {
    let (data, decode_error) = match snapshot.data.clone().map(serde_json::from_value::<T>) {
      Some(Ok(data)) => (Some(data), None),
      Some(Err(e)) => (None, Some(QueryError::from(e))),
      None => (None, None),
    };
    Self {
      entry_id: Some(snapshot.id),
      status: if decode_error.is_some() {
        EntryStatus::Error
      } else {
        snapshot.status
      },
      data,
      error: decode_error.or_else(|| snapshot.error.clone()),
      is_fetching: snapshot.is_fetching,
    }
  }
}

fn is_settled(snapshot: &EntrySnapshot) -> bool {
  !snapshot.is_fetching
    && !matches!(snapshot.status, EntryStatus::Uninitialized | EntryStatus::Loading)
}

/// A subscription that keeps its latest snapshot and decodes it on demand.
///
/// Dropping the handle unsubscribes.
pub struct QueryHandle<T> {
  subscription: Subscription,
  rx: watch::Receiver<Option<EntrySnapshot>>,
  _output: PhantomData<fn() -> T>,
}

impl<T> QueryHandle<T> {
  pub(crate) fn new(subscription: Subscription, rx: watch::Receiver<Option<EntrySnapshot>>) -> Self {
    Self {
      subscription,
      rx,
      _output: PhantomData,
    }
  }

  pub fn subscription(&self) -> &Subscription {
    &self.subscription
  }

  /// Latest snapshot delivered to this subscriber.
  pub fn snapshot(&self) -> Option<EntrySnapshot> {
    self.rx.borrow().clone()
  }

  pub fn refetch(&self) -> Option<SharedFetch> {
    self.subscription.refetch()
  }

  pub fn set_skip(&self, skip: bool) {
    self.subscription.set_skip(skip);
  }

  /// Wait for the next notification. Returns `false` once the client is gone.
  pub async fn changed(&mut self) -> bool {
    self.rx.changed().await.is_ok()
  }
}

impl<T: DeserializeOwned> QueryHandle<T> {
  /// Current state of the query.
  ///
  /// Rejected arguments look like a skipped query; the reason is on
  /// [`Subscription::validation_error`].
  pub fn result(&self) -> QueryResult<T> {
    if self.subscription.validation_error().is_some() {
      return QueryResult::uninitialized();
    }
    match self.rx.borrow().as_ref() {
      Some(snapshot) => QueryResult::from_snapshot(snapshot),
      None => QueryResult::uninitialized(),
    }
  }

  pub fn data(&self) -> Option<T> {
    self.result().data
  }

  pub fn error(&self) -> Option<QueryError> {
    self.result().error
  }

  pub fn is_loading(&self) -> bool {
    self.result().is_loading()
  }

  pub fn is_error(&self) -> bool {
    self.result().is_error()
  }

  pub fn is_fetching(&self) -> bool {
    self.rx.borrow().as_ref().is_some_and(|s| s.is_fetching)
  }

  /// Wait until no fetch is in flight and the entry has a result.
  ///
  /// Resolves immediately for rejected arguments. Never resolves while skipped.
  pub async fn settled(&mut self) -> QueryResult<T> {
    if self.subscription.validation_error().is_some() {
      return self.result();
    }
    loop {
      let done = self.rx.borrow_and_update().as_ref().is_some_and(is_settled);
      if done || self.rx.changed().await.is_err() {
        return self.result();
      }
    }
  }
}

impl<T> std::fmt::Debug for QueryHandle<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("QueryHandle")
      .field("subscription", &self.subscription)
      .field("snapshot", &*self.rx.borrow())
      .finish()
  }
}

/// Progress of the last mutation run through a [`MutationTrigger`].
#[derive(Debug, Clone, PartialEq)]
pub enum MutationState<T> {
  Idle,
  Pending,
  Success(T),
  Error(QueryError),
}

impl<T> MutationState<T> {
  pub fn data(&self) -> Option<&T> {
    match self {
      MutationState::Success(data) => Some(data),
      _ => None,
    }
  }

  pub fn is_pending(&self) -> bool {
    matches!(self, MutationState::Pending)
  }

  pub fn is_success(&self) -> bool {
    matches!(self, MutationState::Success(_))
  }

  pub fn is_error(&self) -> bool {
    matches!(self, MutationState::Error(_))
  }
}

/// Reusable trigger for one mutation endpoint.
pub struct MutationTrigger<E: MutationEndpoint> {
  client: QueryClient,
  state: MutationState<E::Output>,
  invalidated: Vec<Tag>,
}

impl<E: MutationEndpoint> MutationTrigger<E> {
  pub(crate) fn new(client: QueryClient) -> Self {
    Self {
      client,
      state: MutationState::Idle,
      invalidated: Vec::new(),
    }
  }

  pub fn state(&self) -> &MutationState<E::Output> {
    &self.state
  }

  /// Tags invalidated by the last successful run.
  pub fn invalidated(&self) -> &[Tag] {
    &self.invalidated
  }

  pub fn reset(&mut self) {
    self.state = MutationState::Idle;
    self.invalidated.clear();
  }

  /// Run the mutation and resolve with its data or the error that rejected it.
  ///
  /// Invalidation has happened by the time this returns. The outcome is also
  /// kept in [`state`](Self::state).
  pub async fn trigger(&mut self, arg: &E::Arg) -> Result<E::Output, QueryError> {
    self.state = MutationState::Pending;
    self.invalidated.clear();

    let outcome = match serde_json::to_value(arg) {
      Ok(arg) => self.client.mutate_value(E::NAME, arg).await,
      Err(e) => Err(e.into()),
    };
    let decoded = outcome.and_then(|o| {
      let recorded = <E::Output as Deserialize>::deserialize(&o.data)?;
      let data: E::Output = serde_json::from_value(o.data)?;
      Ok((recorded, data, o.invalidated))
    });

    match decoded {
      Ok((recorded, data, invalidated)) => {
        self.invalidated = invalidated;
        self.state = MutationState::Success(recorded);
        Ok(data)
      }
      Err(e) => {
        self.state = MutationState::Error(e.clone());
        Err(e)
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::{client_with, labels_route, CreateLabelLite, LabelDraft, ListLabelsLite};
  use crate::cache::SubscribeOptions;
  use crate::transport::{Method, MockTransport};
  use serde_json::{json, Value};

  fn snapshot(status: EntryStatus, data: Option<Value>, is_fetching: bool) -> EntrySnapshot {
    EntrySnapshot {
      id: EntryId(1),
      signature: crate::cache::RequestSignature::new("listLabels", &json!("O1")),
      status,
      data,
      error: None,
      tags: Default::default(),
      subscriber_count: 1,
      is_fetching,
      fetched_at: None,
    }
  }

  #[test]
  fn test_settled_states() {
    assert!(!is_settled(&snapshot(EntryStatus::Loading, None, true)));
    assert!(!is_settled(&snapshot(EntryStatus::Stale, Some(json!([])), true)));
    assert!(!is_settled(&snapshot(EntryStatus::Success, Some(json!([])), true)));
    assert!(is_settled(&snapshot(EntryStatus::Success, Some(json!([])), false)));
    assert!(is_settled(&snapshot(EntryStatus::Error, None, false)));
  }

  #[test]
  fn test_decode_failure_is_an_error_result() {
    let result: QueryResult<Vec<String>> =
      QueryResult::from_snapshot(&snapshot(EntryStatus::Success, Some(json!({"not": "a list"})), false));
    assert!(result.is_error());
    assert!(matches!(result.error, Some(QueryError::Decode(_))));
  }

  #[test]
  fn test_into_result_prefers_error_status() {
    let result = QueryResult {
      entry_id: None,
      status: EntryStatus::Error,
      data: Some(1),
      error: Some(QueryError::Network("down".into())),
      is_fetching: false,
    };
    assert_eq!(result.into_result(), Err(QueryError::Network("down".into())));

    let stale = QueryResult {
      entry_id: None,
      status: EntryStatus::Stale,
      data: Some(1),
      error: None,
      is_fetching: false,
    };
    assert_eq!(stale.into_result(), Ok(1));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_data_stays_visible_while_refetching() {
    let mock = MockTransport::new().with_delay(std::time::Duration::from_millis(10));
    labels_route(&mock, "O1", json!(["a"]));
    let (client, _mock) = client_with(mock);

    let mut handle = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    handle.settled().await;

    client.invalidate_tags(&[Tag::category("Label")]);
    let during = handle.result();
    assert!(during.is_stale());
    assert!(during.is_fetching);
    assert_eq!(during.data, Some(json!(["a"])));

    assert!(handle.settled().await.is_success());
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutation_trigger_states() {
    let mock = MockTransport::new();
    mock.route(Method::Post, "/organizations/O1/labels", |_| Ok(json!({"id": "L1"})));
    let (client, _mock) = client_with(mock);

    let mut trigger = client.use_mutation::<CreateLabelLite>();
    assert_eq!(trigger.state(), &MutationState::Idle);

    let data = trigger.trigger(&LabelDraft::new("O1", "Bug")).await.unwrap();
    assert_eq!(data, json!({"id": "L1"}));
    assert_eq!(trigger.state().data(), Some(&json!({"id": "L1"})));
    assert_eq!(trigger.invalidated(), &[Tag::category("Label")]);

    let err = trigger.trigger(&LabelDraft::new("", "Bug")).await.unwrap_err();
    assert!(err.is_validation());
    assert!(matches!(trigger.state(), MutationState::Error(e) if e.is_validation()));
    assert!(trigger.invalidated().is_empty());

    trigger.reset();
    assert_eq!(trigger.state(), &MutationState::Idle);
  }
}
