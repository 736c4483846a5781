//! Organization labels.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{list_tags, IdArg, OrganizationArg};
use crate::cache::{require, EndpointRegistry, MutationEndpoint, QueryEndpoint, QueryError, Tag};
use crate::transport::RequestDescriptor;

pub const LABEL: &str = "Label";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Label {
  pub id: String,
  pub organization_id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewLabel {
  pub organization_id: String,
  pub name: String,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

impl NewLabel {
  pub fn new(organization_id: impl Into<String>, name: impl Into<String>) -> Self {
    Self {
      organization_id: organization_id.into(),
      name: name.into(),
      color: None,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelUpdates {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub name: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLabelArg {
  pub id: String,
  pub updates: LabelUpdates,
}

pub struct ListLabels;

impl QueryEndpoint for ListLabels {
  type Arg = OrganizationArg;
  type Output = Vec<Label>;
  const NAME: &'static str = "listLabels";

  fn build_request(arg: &OrganizationArg) -> Result<RequestDescriptor, QueryError> {
    let organization_id = require(Self::NAME, "organizationId", &arg.organization_id)?;
    Ok(RequestDescriptor::get(format!("/organizations/{}/labels", organization_id)))
  }

  fn provides_tags(labels: &Vec<Label>, _arg: &OrganizationArg) -> Vec<Tag> {
    list_tags(LABEL, labels.iter().map(|l| l.id.as_str()))
  }
}

pub struct GetLabel;

impl QueryEndpoint for GetLabel {
  type Arg = IdArg;
  type Output = Label;
  const NAME: &'static str = "getLabel";

  fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::get(format!("/labels/{}", require(Self::NAME, "id", &arg.id)?)))
  }

  fn provides_tags(label: &Label, _arg: &IdArg) -> Vec<Tag> {
    vec![Tag::with_id(LABEL, &label.id)]
  }
}

pub struct CreateLabel;

impl MutationEndpoint for CreateLabel {
  type Arg = NewLabel;
  type Output = Label;
  const NAME: &'static str = "createLabel";

  fn build_request(arg: &NewLabel) -> Result<RequestDescriptor, QueryError> {
    let organization_id = require(Self::NAME, "organizationId", &arg.organization_id)?;
    require(Self::NAME, "name", &arg.name)?;
    Ok(RequestDescriptor::post(
      format!("/organizations/{}/labels", organization_id),
      serde_json::to_value(arg)?,
    ))
  }

  fn invalidates_tags(_label: &Label, _arg: &NewLabel) -> Vec<Tag> {
    vec![Tag::category(LABEL)]
  }
}

pub struct UpdateLabel;

impl MutationEndpoint for UpdateLabel {
  type Arg = UpdateLabelArg;
  type Output = Label;
  const NAME: &'static str = "updateLabel";

  fn build_request(arg: &UpdateLabelArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::patch(
      format!("/labels/{}", require(Self::NAME, "id", &arg.id)?),
      serde_json::to_value(&arg.updates)?,
    ))
  }

  fn invalidates_tags(_label: &Label, arg: &UpdateLabelArg) -> Vec<Tag> {
    vec![Tag::with_id(LABEL, &arg.id)]
  }
}

pub struct DeleteLabel;

impl MutationEndpoint for DeleteLabel {
  type Arg = IdArg;
  type Output = Value;
  const NAME: &'static str = "deleteLabel";

  fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::delete(format!("/labels/{}", require(Self::NAME, "id", &arg.id)?)))
  }

  fn invalidates_tags(_result: &Value, _arg: &IdArg) -> Vec<Tag> {
    vec![Tag::category(LABEL)]
  }
}

pub(crate) fn register(registry: &EndpointRegistry) {
  registry.register_query::<ListLabels>();
  registry.register_query::<GetLabel>();
  registry.register_mutation::<CreateLabel>();
  registry.register_mutation::<UpdateLabel>();
  registry.register_mutation::<DeleteLabel>();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, EntryStatus, QueryClient, SubscribeOptions};
  use crate::transport::{Method, MockTransport};
  use serde_json::json;
  use std::sync::{Arc, Mutex};

  fn label(id: &str, name: &str) -> Value {
    json!({"id": id, "organizationId": "O1", "name": name})
  }

  /// Serve `/organizations/O1/labels` from a list that POSTs append to.
  fn label_server() -> MockTransport {
    let mock = MockTransport::new();
    let labels = Arc::new(Mutex::new(vec![label("L1", "Feature")]));

    let list = Arc::clone(&labels);
    mock.route(Method::Get, "/organizations/O1/labels", move |_| {
      Ok(Value::Array(list.lock().unwrap().clone()))
    });
    let created = Arc::clone(&labels);
    mock.route(Method::Post, "/organizations/O1/labels", move |req| {
      let name = req.body.as_ref().and_then(|b| b["name"].as_str()).unwrap_or_default();
      let new = label(&format!("L{}", created.lock().unwrap().len() + 1), name);
      created.lock().unwrap().push(new.clone());
      Ok(new)
    });
    mock.route(Method::Get, "/labels/L1", |_| Ok(label("L1", "Feature")));
    mock.route(Method::Patch, "/labels/L1", |_| {
      Err(QueryError::Server {
        status: 422,
        payload: json!({"message": "name must not be empty"}),
      })
    });
    mock
  }

  fn client(mock: &MockTransport) -> QueryClient {
    QueryClient::init(Arc::new(mock.clone()), CacheConfig::default()).unwrap()
  }

  #[test]
  fn test_requests_and_tags() {
    let request = ListLabels::build_request(&OrganizationArg::new("O1")).unwrap();
    assert_eq!(request, RequestDescriptor::get("/organizations/O1/labels"));

    let labels: Vec<Label> = serde_json::from_value(json!([label("L1", "a"), label("L2", "b")])).unwrap();
    assert_eq!(
      ListLabels::provides_tags(&labels, &OrganizationArg::new("O1")),
      vec![Tag::category(LABEL), Tag::with_id(LABEL, "L1"), Tag::with_id(LABEL, "L2")]
    );

    let err = CreateLabel::build_request(&NewLabel::new("", "Bug")).unwrap_err();
    assert!(err.is_validation());
  }

  #[tokio::test(start_paused = true)]
  async fn test_create_label_refetches_list() {
    let mock = label_server();
    let client = client(&mock);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&statuses);
    let _listener = client
      .subscribe::<ListLabels, _>(&OrganizationArg::new("O1"), SubscribeOptions::default(), move |s| {
        seen.lock().unwrap().push(s.status);
      })
      .unwrap();
    let mut labels = client
      .use_query::<ListLabels>(&OrganizationArg::new("O1"), SubscribeOptions::default())
      .unwrap();
    assert_eq!(labels.settled().await.data.unwrap().len(), 1);

    let created = client.mutate::<CreateLabel>(&NewLabel::new("O1", "Bug")).await.unwrap();
    assert_eq!(created.name, "Bug");

    let result = labels.settled().await;
    let names: Vec<_> = result.data.unwrap().into_iter().map(|l| l.name).collect();
    assert_eq!(names, vec!["Feature", "Bug"]);

    let mut statuses = statuses.lock().unwrap().clone();
    statuses.dedup();
    assert_eq!(
      statuses,
      vec![EntryStatus::Loading, EntryStatus::Success, EntryStatus::Stale, EntryStatus::Success]
    );
    assert_eq!(mock.calls_to(Method::Get, "/organizations/O1/labels"), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_update_leaves_cache_untouched() {
    let mock = label_server();
    let client = client(&mock);

    let mut list = client
      .use_query::<ListLabels>(&OrganizationArg::new("O1"), SubscribeOptions::default())
      .unwrap();
    let mut single = client
      .use_query::<GetLabel>(&IdArg::new("L1"), SubscribeOptions::default())
      .unwrap();
    list.settled().await;
    single.settled().await;
    let before = client.entries();

    let err = client
      .mutate::<UpdateLabel>(&UpdateLabelArg {
        id: "L1".to_string(),
        updates: LabelUpdates {
          name: Some(String::new()),
          color: None,
        },
      })
      .await
      .unwrap_err();
    assert_eq!(err.status(), Some(422));

    tokio::time::sleep(std::time::Duration::from_millis(1)).await;
    assert_eq!(client.entries(), before);
    assert_eq!(mock.call_count(), 3);
  }
}
