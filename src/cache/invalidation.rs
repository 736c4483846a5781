//! Invalidation dispatcher.
//!
//! A settled mutation is turned into tags. Every entry hit by at least one tag
//! is staled first; only then are refetches started, and only for entries that
//! still have subscribers. Unreferenced entries stay stale until someone asks.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::client::ClientInner;
use super::endpoint::MutationDecl;
use super::error::QueryError;
use super::signature::RequestSignature;
use super::tag::Tag;

impl ClientInner {
  /// Invalidate what a mutation declares once it has settled.
  ///
  /// A failed mutation invalidates nothing. Returns the tags and the staled entries.
  pub(crate) fn on_mutation_settled(
    self: &Arc<Self>,
    decl: &MutationDecl,
    arg: &Value,
    result: &Result<Value, QueryError>,
  ) -> (Vec<Tag>, Vec<RequestSignature>) {
    let data = match result {
      Ok(data) => data,
      Err(e) => {
        debug!(endpoint = decl.name, error = %e, "Mutation failed, nothing invalidated");
        return (Vec::new(), Vec::new());
      }
    };

    let tags = match decl.invalidates_tags(data, arg) {
      Ok(tags) => tags,
      Err(e) => {
        warn!(endpoint = decl.name, error = %e, "Cannot compute invalidated tags");
        return (Vec::new(), Vec::new());
      }
    };

    let affected = self.invalidate(&tags);
    (tags, affected)
  }

  /// Stale every entry hit by `tags`, then refetch the subscribed ones.
  pub(crate) fn invalidate(self: &Arc<Self>, tags: &[Tag]) -> Vec<RequestSignature> {
    if tags.is_empty() {
      return Vec::new();
    }

    let (affected, notifications) = {
      let mut state = self.lock();
      if state.disposed {
        return Vec::new();
      }

      let affected = state.store.matching(tags);
      for signature in &affected {
        state.store.mark_stale(signature);
      }

      for signature in &affected {
        let refetch = state
          .store
          .get(signature)
          .is_some_and(|entry| entry.subscriber_count() > 0 && !entry.is_fetching());
        if refetch {
          self.start_fetch(&mut state, signature);
        }
      }

      let notifications: Vec<_> = affected
        .iter()
        .filter_map(|signature| state.notification(signature))
        .collect();
      (affected, notifications)
    };

    info!(
      tags = %tags.iter().map(Tag::to_string).collect::<Vec<_>>().join(", "),
      entries = affected.len(),
      "Invalidated"
    );
    for notification in notifications {
      notification.dispatch();
    }
    affected
  }
}

#[cfg(test)]
mod tests {
  use crate::cache::entry::EntryStatus;
  use crate::cache::testing::{client_with, labels_route, CreateLabelLite, LabelDraft, ListLabelsLite};
  use crate::cache::{require, MutationEndpoint, QueryError, SubscribeOptions, Tag};
  use crate::transport::{Method, MockTransport, RequestDescriptor};
  use serde_json::{json, Value};
  use std::time::Duration;

  #[tokio::test(start_paused = true)]
  async fn test_successful_mutation_refetches_subscribers() {
    let mock = MockTransport::new();
    labels_route(&mock, "O1", json!([]));
    labels_route(&mock, "O2", json!([]));
    mock.route(Method::Post, "/organizations/O1/labels", |_| Ok(json!({"id": "L1"})));
    let (client, mock) = client_with(mock);

    let mut o1 = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    o1.settled().await;

    let outcome = client
      .mutate_value("createLabelLite", json!({"organizationId": "O1", "name": "Bug"}))
      .await;
    // Not registered yet: looked up by name
    assert!(outcome.is_err());

    client.register_mutation::<CreateLabelLite>();
    let outcome = client
      .mutate_value("createLabelLite", json!({"organizationId": "O1", "name": "Bug"}))
      .await
      .unwrap();
    assert_eq!(outcome.invalidated, vec![Tag::category("Label")]);
    assert_eq!(outcome.affected.len(), 1);

    let result = o1.settled().await;
    assert!(result.is_success());
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O1/labels"), 2);
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O2/labels"), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_mutation_invalidates_nothing() {
    let mock = MockTransport::new();
    labels_route(&mock, "O1", json!([]));
    mock.route(Method::Post, "/organizations/O1/labels", |_| {
      Err(QueryError::Server {
        status: 500,
        payload: json!("boom"),
      })
    });
    let (client, mock) = client_with(mock);

    let mut o1 = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    o1.settled().await;

    let err = client
      .mutate::<CreateLabelLite>(&LabelDraft::new("O1", "Bug"))
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(500));

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(o1.result().status, EntryStatus::Success);
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O1/labels"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unsubscribed_entries_stay_stale() {
    let mock = MockTransport::new();
    labels_route(&mock, "O1", json!([]));
    let (client, mock) = client_with(mock);

    let mut handle = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    handle.settled().await;
    drop(handle);

    let affected = client.invalidate_tags(&[Tag::category("Label")]);
    assert_eq!(affected.len(), 1);

    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(client.entries()[0].status, EntryStatus::Stale);
    assert_eq!(mock.call_count(), 1);

    // The next subscriber refetches
    let mut again = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    assert!(again.settled().await.is_success());
    assert_eq!(mock.call_count(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_invalidation_during_fetch_refetches_after() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(100));
    labels_route(&mock, "O1", json!([]));
    let (client, mock) = client_with(mock);

    let mut handle = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    handle.settled().await;
    let _refetch = handle.refetch();

    tokio::time::sleep(Duration::from_millis(50)).await;
    client.invalidate_tags(&[Tag::category("Label")]);
    assert_eq!(mock.call_count(), 2, "no extra request while one is in flight");

    // The in-flight result lands stale and is fetched once more
    tokio::time::sleep(Duration::from_millis(60)).await;
    assert!(handle.result().is_fetching);
    assert_eq!(mock.call_count(), 3);

    assert!(handle.settled().await.is_success());
    assert_eq!(mock.call_count(), 3);
  }

  struct RenameLabelLite;

  impl MutationEndpoint for RenameLabelLite {
    type Arg = String;
    type Output = Value;
    const NAME: &'static str = "renameLabelLite";

    fn build_request(id: &String) -> Result<RequestDescriptor, QueryError> {
      let id = require(Self::NAME, "id", id)?;
      Ok(RequestDescriptor::patch(format!("/labels/{}", id), json!({"name": "Renamed"})))
    }

    fn invalidates_tags(_result: &Value, id: &String) -> Vec<Tag> {
      vec![Tag::with_id("Label", id)]
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_back_to_back_mutations_share_one_refetch() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(50));
    labels_route(&mock, "O1", json!([]));
    labels_route(&mock, "O2", json!([]));
    mock.route(Method::Post, "/organizations/O1/labels", |_| Ok(json!({"id": "L1"})));
    mock.route(Method::Patch, "/labels/L7", |_| Ok(json!({"id": "L7"})));
    let (client, mock) = client_with(mock);

    let mut o1 = client
      .use_query::<ListLabelsLite>(&"O1".to_string(), SubscribeOptions::default())
      .unwrap();
    let mut o2 = client
      .use_query::<ListLabelsLite>(&"O2".to_string(), SubscribeOptions::default())
      .unwrap();
    o1.settled().await;
    o2.settled().await;
    let lists = vec![o1.subscription().signature().clone(), o2.subscription().signature().clone()];
    let mut expected = lists.clone();
    expected.sort();

    client.register_mutation::<CreateLabelLite>();
    client.register_mutation::<RenameLabelLite>();
    let (created, renamed) = tokio::join!(
      client.mutate_value("createLabelLite", json!({"organizationId": "O1", "name": "Bug"})),
      client.mutate_value("renameLabelLite", json!("L7")),
    );
    let (created, renamed) = (created.unwrap(), renamed.unwrap());

    // Both matched against the tags the lists had before any refetch landed
    assert_eq!(created.affected, expected);
    assert_eq!(renamed.affected, expected);
    for signature in &lists {
      let entry = client.snapshot(signature).unwrap();
      assert_eq!(entry.status, EntryStatus::Stale);
      assert!(entry.is_fetching);
    }

    assert!(o1.settled().await.is_success());
    assert!(o2.settled().await.is_success());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O1/labels"), 2);
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O2/labels"), 2);
  }

  #[tokio::test]
  async fn test_empty_tags_are_a_no_op() {
    let (client, _mock) = client_with(MockTransport::new());
    assert!(client.invalidate_tags(&[]).is_empty());
  }
}
