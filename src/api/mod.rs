//! Endpoint declarations for the project-management API.
//!
//! Each module owns one tag category and declares its queries and mutations as
//! [`QueryEndpoint`](crate::cache::QueryEndpoint) and
//! [`MutationEndpoint`](crate::cache::MutationEndpoint) types.

pub mod forms;
pub mod issue_labels;
pub mod labels;
pub mod reporting;
pub mod work_logs;

use serde::{Deserialize, Serialize};

use crate::cache::{EndpointRegistry, QueryClient, Tag};

/// Argument of endpoints addressed by a single id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdArg {
  pub id: String,
}

impl IdArg {
  pub fn new(id: impl Into<String>) -> Self {
    Self { id: id.into() }
  }
}

/// Argument of endpoints scoped to an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrganizationArg {
  pub organization_id: String,
}

impl OrganizationArg {
  pub fn new(organization_id: impl Into<String>) -> Self {
    Self {
      organization_id: organization_id.into(),
    }
  }
}

/// Argument of endpoints scoped to an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IssueArg {
  pub issue_id: String,
}

impl IssueArg {
  pub fn new(issue_id: impl Into<String>) -> Self {
    Self {
      issue_id: issue_id.into(),
    }
  }
}

/// Tag qualifying a per-issue list, e.g. `WorkLog:LIST-ISSUE-I1`.
pub(crate) fn issue_list_tag(category: &str, issue_id: &str) -> Tag {
  Tag::with_id(category, format!("LIST-ISSUE-{}", issue_id))
}

/// The bare category plus one qualified tag per item.
pub(crate) fn list_tags<'a>(category: &str, ids: impl IntoIterator<Item = &'a str>) -> Vec<Tag> {
  std::iter::once(Tag::category(category))
    .chain(ids.into_iter().map(|id| Tag::with_id(category, id)))
    .collect()
}

/// Register every endpoint so it can be addressed by name.
pub fn register_all(registry: &EndpointRegistry) {
  labels::register(registry);
  issue_labels::register(registry);
  work_logs::register(registry);
  forms::register(registry);
  reporting::register(registry);
}

/// Convenience for a client with every endpoint registered.
pub fn registered(client: QueryClient) -> QueryClient {
  register_all(client.registry());
  client
}
