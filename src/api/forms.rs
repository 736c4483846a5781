//! Organization intake forms.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{list_tags, IdArg, OrganizationArg};
use crate::cache::{require, EndpointRegistry, MutationEndpoint, QueryEndpoint, QueryError, Tag};
use crate::transport::RequestDescriptor;

pub const FORM: &str = "Form";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
  pub name: String,
  pub kind: String,
  #[serde(default)]
  pub required: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Form {
  pub id: String,
  pub organization_id: String,
  pub title: String,
  #[serde(default)]
  pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewForm {
  pub organization_id: String,
  pub title: String,
  #[serde(default)]
  pub fields: Vec<FormField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateFormArg {
  pub id: String,
  pub updates: Value,
}

pub struct ListForms;

impl QueryEndpoint for ListForms {
  type Arg = OrganizationArg;
  type Output = Vec<Form>;
  const NAME: &'static str = "listForms";

  fn build_request(arg: &OrganizationArg) -> Result<RequestDescriptor, QueryError> {
    let organization_id = require(Self::NAME, "organizationId", &arg.organization_id)?;
    Ok(RequestDescriptor::get(format!("/organizations/{}/forms", organization_id)))
  }

  fn provides_tags(forms: &Vec<Form>, _arg: &OrganizationArg) -> Vec<Tag> {
    list_tags(FORM, forms.iter().map(|f| f.id.as_str()))
  }
}

pub struct GetForm;

impl QueryEndpoint for GetForm {
  type Arg = IdArg;
  type Output = Form;
  const NAME: &'static str = "getForm";

  fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::get(format!("/forms/{}", require(Self::NAME, "id", &arg.id)?)))
  }

  fn provides_tags(form: &Form, _arg: &IdArg) -> Vec<Tag> {
    vec![Tag::with_id(FORM, &form.id)]
  }
}

pub struct CreateForm;

impl MutationEndpoint for CreateForm {
  type Arg = NewForm;
  type Output = Form;
  const NAME: &'static str = "createForm";

  fn build_request(arg: &NewForm) -> Result<RequestDescriptor, QueryError> {
    let organization_id = require(Self::NAME, "organizationId", &arg.organization_id)?;
    require(Self::NAME, "title", &arg.title)?;
    Ok(RequestDescriptor::post(
      format!("/organizations/{}/forms", organization_id),
      serde_json::to_value(arg)?,
    ))
  }

  fn invalidates_tags(_form: &Form, _arg: &NewForm) -> Vec<Tag> {
    vec![Tag::category(FORM)]
  }
}

pub struct UpdateForm;

impl MutationEndpoint for UpdateForm {
  type Arg = UpdateFormArg;
  type Output = Form;
  const NAME: &'static str = "updateForm";

  fn build_request(arg: &UpdateFormArg) -> Result<RequestDescriptor, QueryError> {
    let id = require(Self::NAME, "id", &arg.id)?;
    if !arg.updates.is_object() {
      return Err(QueryError::validation(Self::NAME, "updates must be an object"));
    }
    Ok(RequestDescriptor::patch(format!("/forms/{}", id), arg.updates.clone()))
  }

  fn invalidates_tags(_form: &Form, arg: &UpdateFormArg) -> Vec<Tag> {
    vec![Tag::with_id(FORM, &arg.id)]
  }
}

pub struct DeleteForm;

impl MutationEndpoint for DeleteForm {
  type Arg = IdArg;
  type Output = Value;
  const NAME: &'static str = "deleteForm";

  fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::delete(format!("/forms/{}", require(Self::NAME, "id", &arg.id)?)))
  }

  fn invalidates_tags(_result: &Value, _arg: &IdArg) -> Vec<Tag> {
    vec![Tag::category(FORM)]
  }
}

pub(crate) fn register(registry: &EndpointRegistry) {
  registry.register_query::<ListForms>();
  registry.register_query::<GetForm>();
  registry.register_mutation::<CreateForm>();
  registry.register_mutation::<UpdateForm>();
  registry.register_mutation::<DeleteForm>();
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::{CacheConfig, QueryClient, SubscribeOptions};
  use crate::transport::{Method, MockTransport};
  use serde_json::json;
  use std::sync::Arc;

  fn form(id: &str, title: &str) -> Value {
    json!({"id": id, "organizationId": "O1", "title": title})
  }

  #[test]
  fn test_update_requires_object() {
    let arg = UpdateFormArg {
      id: "F1".to_string(),
      updates: json!("title"),
    };
    assert!(UpdateForm::build_request(&arg).unwrap_err().is_validation());
  }

  #[tokio::test(start_paused = true)]
  async fn test_update_hits_list_and_item() {
    let mock = MockTransport::new();
    mock.route(Method::Get, "/organizations/O1/forms", |_| {
      Ok(json!([form("F1", "Intake"), form("F2", "Bug report")]))
    });
    mock.route(Method::Get, "/forms/F1", |_| Ok(form("F1", "Intake")));
    mock.route(Method::Get, "/forms/F2", |_| Ok(form("F2", "Bug report")));
    mock.route(Method::Patch, "/forms/F1", |_| Ok(form("F1", "Intake v2")));
    let client = QueryClient::init(Arc::new(mock.clone()), CacheConfig::default()).unwrap();

    let mut list = client
      .use_query::<ListForms>(&OrganizationArg::new("O1"), SubscribeOptions::default())
      .unwrap();
    let mut f1 = client
      .use_query::<GetForm>(&IdArg::new("F1"), SubscribeOptions::default())
      .unwrap();
    let mut f2 = client
      .use_query::<GetForm>(&IdArg::new("F2"), SubscribeOptions::default())
      .unwrap();
    assert_eq!(list.settled().await.data.unwrap().len(), 2);
    f1.settled().await;
    f2.settled().await;

    client
      .mutate::<UpdateForm>(&UpdateFormArg {
        id: "F1".to_string(),
        updates: json!({"title": "Intake v2"}),
      })
      .await
      .unwrap();
    list.settled().await;
    f1.settled().await;

    assert_eq!(mock.calls_to(Method::Get, "/organizations/O1/forms"), 2);
    assert_eq!(mock.calls_to(Method::Get, "/forms/F1"), 2);
    assert_eq!(mock.calls_to(Method::Get, "/forms/F2"), 1);
  }
}
