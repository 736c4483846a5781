//! Time logged against issues.
//!
//! Lists are tagged per issue (`WorkLog:LIST-ISSUE-<id>`) and per item, with no
//! category-wide tag, so a change to one issue's log never refetches another's.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{issue_list_tag, IdArg, IssueArg};
use crate::cache::{require, EndpointRegistry, MutationEndpoint, QueryEndpoint, QueryError, Tag};
use crate::transport::RequestDescriptor;

pub const WORK_LOG: &str = "WorkLog";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLog {
  pub id: String,
  pub issue_id: String,
  pub minutes: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub logged_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewWorkLog {
  pub issue_id: String,
  pub minutes: u32,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLogUpdates {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub minutes: Option<u32>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateWorkLogArg {
  pub id: String,
  pub issue_id: String,
  pub updates: WorkLogUpdates,
}

/// Identifies a work log together with the issue whose list it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkLogRef {
  pub id: String,
  pub issue_id: String,
}

impl WorkLogRef {
  pub fn new(id: impl Into<String>, issue_id: impl Into<String>) -> Self {
    Self {
      id: id.into(),
      issue_id: issue_id.into(),
    }
  }
}

fn item_and_list_tags(id: &str, issue_id: &str) -> Vec<Tag> {
  vec![Tag::with_id(WORK_LOG, id), issue_list_tag(WORK_LOG, issue_id)]
}

pub struct ListWorkLogs;

impl QueryEndpoint for ListWorkLogs {
  type Arg = IssueArg;
  type Output = Vec<WorkLog>;
  const NAME: &'static str = "listWorkLogs";

  fn build_request(arg: &IssueArg) -> Result<RequestDescriptor, QueryError> {
    let issue_id = require(Self::NAME, "issueId", &arg.issue_id)?;
    Ok(RequestDescriptor::get(format!("/issues/{}/work-logs", issue_id)))
  }

  fn provides_tags(logs: &Vec<WorkLog>, arg: &IssueArg) -> Vec<Tag> {
    std::iter::once(issue_list_tag(WORK_LOG, &arg.issue_id))
      .chain(logs.iter().map(|log| Tag::with_id(WORK_LOG, &log.id)))
      .collect()
  }
}

pub struct GetWorkLog;

impl QueryEndpoint for GetWorkLog {
  type Arg = IdArg;
  type Output = WorkLog;
  const NAME: &'static str = "getWorkLog";

  fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
    Ok(RequestDescriptor::get(format!("/work-logs/{}", require(Self::NAME, "id", &arg.id)?)))
  }

  fn provides_tags(log: &WorkLog, _arg: &IdArg) -> Vec<Tag> {
    vec![Tag::with_id(WORK_LOG, &log.id)]
  }
}

pub struct CreateWorkLog;

impl MutationEndpoint for CreateWorkLog {
  type Arg = NewWorkLog;
  type Output = WorkLog;
  const NAME: &'static str = "createWorkLog";

  fn build_request(arg: &NewWorkLog) -> Result<RequestDescriptor, QueryError> {
    let issue_id = require(Self::NAME, "issueId", &arg.issue_id)?;
    if arg.minutes == 0 {
      return Err(QueryError::validation(Self::NAME, "minutes must be positive"));
    }
    Ok(RequestDescriptor::post(
      format!("/issues/{}/work-logs", issue_id),
      serde_json::to_value(arg)?,
    ))
  }

  fn invalidates_tags(_log: &WorkLog, arg: &NewWorkLog) -> Vec<Tag> {
    vec![issue_list_tag(WORK_LOG, &arg.issue_id)]
  }
}

pub struct UpdateWorkLog;

impl MutationEndpoint for UpdateWorkLog {
  type Arg = UpdateWorkLogArg;
  type Output = WorkLog;
  const NAME: &'static str = "updateWorkLog";

  fn build_request(arg: &UpdateWorkLogArg) -> Result<RequestDescriptor, QueryError> {
    let id = require(Self::NAME, "id", &arg.id)?;
    require(Self::NAME, "issueId", &arg.issue_id)?;
    Ok(RequestDescriptor::patch(
      format!("/work-logs/{}", id),
      serde_json::to_value(&arg.updates)?,
    ))
  }

  fn invalidates_tags(_log: &WorkLog, arg: &UpdateWorkLogArg) -> Vec<Tag> {
    item_and_list_tags(&arg.id, &arg.issue_id)
  }
}

pub struct DeleteWorkLog;

impl MutationEndpoint for DeleteWorkLog {
  type Arg = WorkLogRef;
  type Output = Value;
  const NAME: &'static str = "deleteWorkLog";

  fn build_request(arg: &WorkLogRef) -> Result<RequestDescriptor, QueryError> {
    let id = require(Self::NAME, "id", &arg.id)?;
    require(Self::NAME, "issueId", &arg.issue_id)?;
    Ok(RequestDescriptor::delete(format!("/work-logs/{}", id)))
  }

  fn invalidates_tags(_result: &Value, arg: &WorkLogRef) -> Vec<Tag> {
    item_and_list_tags(&arg.id, &arg.issue_id)
  }
}

pub(crate) fn register(registry: &EndpointRegistry) {
  registry.register_query::<ListWorkLogs>();
  registry.register_query::<GetWorkLog>();
  registry.register_mutation::<CreateWorkLog>();
  registry.register_mutation::<UpdateWorkLog>();
  registry.register_mutation::<DeleteWorkLog>();
}
