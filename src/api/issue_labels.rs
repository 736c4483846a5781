//! Labels attached to issues.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use super::labels::Label;
use super::{issue_list_tag, IssueArg};
use crate::cache::{require, EndpointRegistry, MutationEndpoint, QueryEndpoint, QueryError, Tag};
use crate::transport::RequestDescriptor;

pub const ISSUE_LABEL: &str = "IssueLabel";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueLabelArg {
  pub issue_id: String,
  pub label_id: String,
}

impl IssueLabelArg {
  pub fn new(issue_id: impl Into<String>, label_id: impl Into<String>) -> Self {
    Self {
      issue_id: issue_id.into(),
      label_id: label_id.into(),
    }
  }

  fn validate(&self, endpoint: &str) -> Result<(), QueryError> {
    require(endpoint, "issueId", &self.issue_id)?;
    require(endpoint, "labelId", &self.label_id)?;
    Ok(())
  }
}

pub struct ListIssueLabels;

impl QueryEndpoint for ListIssueLabels {
  type Arg = IssueArg;
  type Output = Vec<Label>;
  const NAME: &'static str = "listIssueLabels";

  fn build_request(arg: &IssueArg) -> Result<RequestDescriptor, QueryError> {
    let issue_id = require(Self::NAME, "issueId", &arg.issue_id)?;
    Ok(RequestDescriptor::get(format!("/issues/{}/labels", issue_id)))
  }

  fn provides_tags(_labels: &Vec<Label>, arg: &IssueArg) -> Vec<Tag> {
    vec![issue_list_tag(ISSUE_LABEL, &arg.issue_id)]
  }
}

pub struct AddIssueLabel;

impl MutationEndpoint for AddIssueLabel {
  type Arg = IssueLabelArg;
  type Output = Value;
  const NAME: &'static str = "addIssueLabel";

  fn build_request(arg: &IssueLabelArg) -> Result<RequestDescriptor, QueryError> {
    arg.validate(Self::NAME)?;
    Ok(RequestDescriptor::post(
      format!("/issues/{}/labels", arg.issue_id),
      json!({ "labelId": arg.label_id }),
    ))
  }

  fn invalidates_tags(_result: &Value, arg: &IssueLabelArg) -> Vec<Tag> {
    vec![issue_list_tag(ISSUE_LABEL, &arg.issue_id)]
  }
}

pub struct RemoveIssueLabel;

impl MutationEndpoint for RemoveIssueLabel {
  type Arg = IssueLabelArg;
  type Output = Value;
  const NAME: &'static str = "removeIssueLabel";

  fn build_request(arg: &IssueLabelArg) -> Result<RequestDescriptor, QueryError> {
    arg.validate(Self::NAME)?;
    Ok(RequestDescriptor::delete(format!(
      "/issues/{}/labels/{}",
      arg.issue_id, arg.label_id
    )))
  }

  fn invalidates_tags(_result: &Value, arg: &IssueLabelArg) -> Vec<Tag> {
    vec![issue_list_tag(ISSUE_LABEL, &arg.issue_id)]
  }
}

pub(crate) fn register(registry: &EndpointRegistry) {
  registry.register_query::<ListIssueLabels>();
  registry.register_mutation::<AddIssueLabel>();
  registry.register_mutation::<RemoveIssueLabel>();
}
