//! Reports at organization, project, board and issue level, plus the
//! selector that walks down that hierarchy.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;
use std::str::FromStr;

use super::IdArg;
use crate::cache::{
  require, EndpointRegistry, QueryClient, QueryEndpoint, QueryError, QueryHandle, QueryResult, Tag,
};
use crate::dependent::{DependentQueries, LevelBinding};
use crate::transport::RequestDescriptor;

pub const REPORT: &str = "Report";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportLevel {
  Organization,
  Project,
  Board,
  Issue,
}

impl ReportLevel {
  /// Topmost first.
  pub const ALL: [ReportLevel; 4] = [
    ReportLevel::Organization,
    ReportLevel::Project,
    ReportLevel::Board,
    ReportLevel::Issue,
  ];

  pub fn as_str(&self) -> &'static str {
    match self {
      ReportLevel::Organization => "organization",
      ReportLevel::Project => "project",
      ReportLevel::Board => "board",
      ReportLevel::Issue => "issue",
    }
  }

  fn endpoint(&self) -> &'static str {
    match self {
      ReportLevel::Organization => OrganizationReport::NAME,
      ReportLevel::Project => ProjectReport::NAME,
      ReportLevel::Board => BoardReport::NAME,
      ReportLevel::Issue => IssueReport::NAME,
    }
  }

  /// Tag of one report, e.g. `Report:BOARD-B1`.
  pub fn tag(&self, id: &str) -> Tag {
    Tag::with_id(REPORT, format!("{}-{}", self.as_str().to_uppercase(), id))
  }
}

impl fmt::Display for ReportLevel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl FromStr for ReportLevel {
  type Err = QueryError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    ReportLevel::ALL
      .into_iter()
      .find(|level| level.as_str() == s)
      .ok_or_else(|| QueryError::validation("reporting", format!("unknown report level {}", s)))
  }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
  pub id: String,
  #[serde(default)]
  pub issue_count: u64,
  #[serde(default)]
  pub completed_count: u64,
  #[serde(default)]
  pub logged_minutes: u64,
}

fn report_request(level: ReportLevel, arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
  let id = require(level.endpoint(), "id", &arg.id)?;
  Ok(RequestDescriptor::get(format!("/reports/{}s/{}", level.as_str(), id)))
}

macro_rules! report_endpoint {
  ($name:ident, $level:expr, $endpoint:literal) => {
    pub struct $name;

    impl QueryEndpoint for $name {
      type Arg = IdArg;
      type Output = Report;
      const NAME: &'static str = $endpoint;

      fn build_request(arg: &IdArg) -> Result<RequestDescriptor, QueryError> {
        report_request($level, arg)
      }

      fn provides_tags(_report: &Report, arg: &IdArg) -> Vec<Tag> {
        vec![$level.tag(&arg.id)]
      }
    }
  };
}

report_endpoint!(OrganizationReport, ReportLevel::Organization, "organizationReport");
report_endpoint!(ProjectReport, ReportLevel::Project, "projectReport");
report_endpoint!(BoardReport, ReportLevel::Board, "boardReport");
report_endpoint!(IssueReport, ReportLevel::Issue, "issueReport");

pub(crate) fn register(registry: &EndpointRegistry) {
  registry.register_query::<OrganizationReport>();
  registry.register_query::<ProjectReport>();
  registry.register_query::<BoardReport>();
  registry.register_query::<IssueReport>();
}

fn bindings() -> Vec<LevelBinding> {
  ReportLevel::ALL
    .into_iter()
    .map(|level| LevelBinding {
      level: level.as_str(),
      endpoint: level.endpoint(),
      arg: |ids| json!({ "id": ids.last().copied().unwrap_or_default() }),
    })
    .collect()
}

/// Organization → project → board → issue report picker.
///
/// Only the report for the chosen level is fetched, and only once every level
/// above it has a selection.
pub struct ReportSelector {
  queries: DependentQueries<Report>,
}

impl ReportSelector {
  pub fn new(client: QueryClient) -> Result<Self, QueryError> {
    register(client.registry());
    Ok(Self {
      queries: DependentQueries::new(client, bindings())?,
    })
  }

  pub fn level(&self) -> ReportLevel {
    // Levels are built from ReportLevel::ALL, so the name always parses
    self
      .queries
      .hierarchy()
      .target()
      .parse()
      .unwrap_or(ReportLevel::Organization)
  }

  pub fn selected(&self, level: ReportLevel) -> Option<&str> {
    self.queries.hierarchy().selected(level.as_str())
  }

  /// Switch the report level. Returns the levels whose selection was cleared.
  pub fn set_level(&mut self, level: ReportLevel) -> Result<Vec<ReportLevel>, QueryError> {
    let cleared = self.queries.set_target(level.as_str())?;
    Ok(parse_levels(cleared))
  }

  /// Select `id` at `level`. Returns the levels whose selection was cleared.
  pub fn select(&mut self, level: ReportLevel, id: &str) -> Result<Vec<ReportLevel>, QueryError> {
    let cleared = self.queries.select(level.as_str(), id)?;
    Ok(parse_levels(cleared))
  }

  pub fn handle(&self, level: ReportLevel) -> Option<&QueryHandle<Report>> {
    self.queries.handle(level.as_str())
  }

  /// The current report, if the chosen level is reachable.
  pub fn report(&self) -> Option<QueryResult<Report>> {
    self.queries.result()
  }

  pub async fn settled(&mut self) -> Option<QueryResult<Report>> {
    self.queries.settled().await
  }
}

fn parse_levels(levels: Vec<&'static str>) -> Vec<ReportLevel> {
  levels.into_iter().filter_map(|l| l.parse().ok()).collect()
}

impl fmt::Debug for ReportSelector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ReportSelector")
      .field("level", &self.level())
      .field("queries", &self.queries)
      .finish()
  }
}
