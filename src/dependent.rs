//! Dependent query coordinator.
//!
//! Drives a chain of queries whose arguments come from user selections made top
//! down, e.g. organization → project → board → issue. Only the target level's
//! query is ever live, and only once every ancestor has a selected id. Every
//! other level keeps a skipped subscription that holds no reference.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use tracing::debug;

use crate::cache::{QueryClient, QueryError, QueryHandle, QueryResult, SubscribeOptions};

const COORDINATOR: &str = "selection";

/// Selected ids per level plus the active target level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectionHierarchy {
  levels: Vec<&'static str>,
  selected: Vec<Option<String>>,
  target: usize,
  /// (current target, changed level) → levels to clear.
  resets: HashMap<(usize, usize), Vec<usize>>,
}

impl SelectionHierarchy {
  /// Build a hierarchy from level names, topmost first. The target starts at the top.
  pub fn new(levels: &[&'static str]) -> Result<Self, QueryError> {
    if levels.is_empty() {
      return Err(QueryError::validation(COORDINATOR, "at least one level is required"));
    }
    let n = levels.len();

    // Any change at a level clears everything strictly below it
    let mut resets = HashMap::new();
    for current in 0..n {
      for changed in 0..n {
        resets.insert((current, changed), (changed + 1..n).collect());
      }
    }

    Ok(Self {
      levels: levels.to_vec(),
      selected: vec![None; n],
      target: 0,
      resets,
    })
  }

  pub fn levels(&self) -> &[&'static str] {
    &self.levels
  }

  pub fn index_of(&self, level: &str) -> Result<usize, QueryError> {
    self
      .levels
      .iter()
      .position(|l| *l == level)
      .ok_or_else(|| QueryError::validation(COORDINATOR, format!("unknown level {}", level)))
  }

  pub fn selected(&self, level: &str) -> Option<&str> {
    let idx = self.index_of(level).ok()?;
    self.selected[idx].as_deref()
  }

  pub fn target(&self) -> &'static str {
    self.levels[self.target]
  }

  pub(crate) fn target_index(&self) -> usize {
    self.target
  }

  /// Select `id` at `level`, clearing every level below it.
  ///
  /// An empty id clears the level. Reselecting the current id changes nothing.
  /// Levels below the target cannot be selected. Returns the levels cleared.
  pub fn select(&mut self, level: &str, id: &str) -> Result<Vec<&'static str>, QueryError> {
    let idx = self.index_of(level)?;
    if idx > self.target {
      return Err(QueryError::validation(
        COORDINATOR,
        format!("{} is below the target level {}", level, self.target()),
      ));
    }

    let id = Some(id.trim()).filter(|id| !id.is_empty()).map(str::to_string);
    if self.selected[idx] == id {
      return Ok(Vec::new());
    }
    self.selected[idx] = id;
    Ok(self.reset(idx))
  }

  /// Make `level` the target, clearing selections strictly below it.
  pub fn set_target(&mut self, level: &str) -> Result<Vec<&'static str>, QueryError> {
    let idx = self.index_of(level)?;
    if idx == self.target {
      return Ok(Vec::new());
    }
    let cleared = self.reset(idx);
    self.target = idx;
    Ok(cleared)
  }

  fn reset(&mut self, changed: usize) -> Vec<&'static str> {
    let clear = self
      .resets
      .get(&(self.target, changed))
      .cloned()
      .unwrap_or_default();
    clear
      .into_iter()
      .filter(|&idx| self.selected[idx].take().is_some())
      .map(|idx| self.levels[idx])
      .collect()
  }

  fn ancestors_selected(&self, idx: usize) -> bool {
    self.selected[..idx].iter().all(Option::is_some)
  }

  /// Every ancestor is selected and the target is at or below `level`.
  pub fn is_active(&self, level: &str) -> bool {
    self
      .index_of(level)
      .is_ok_and(|idx| idx <= self.target && self.ancestors_selected(idx))
  }

  /// Whether `level`'s query should be live.
  pub fn is_enabled(&self, level: &str) -> bool {
    self.index_of(level).is_ok_and(|idx| self.is_enabled_at(idx))
  }

  fn is_enabled_at(&self, idx: usize) -> bool {
    idx == self.target && self.ancestors_selected(idx)
  }

  /// The single level whose query is live, if any.
  pub fn enabled_level(&self) -> Option<&'static str> {
    self
      .is_enabled_at(self.target)
      .then(|| self.levels[self.target])
  }

  /// Selected ids from the top down to `idx`, empty where unselected.
  pub(crate) fn ids_through(&self, idx: usize) -> Vec<&str> {
    self.selected[..=idx]
      .iter()
      .map(|id| id.as_deref().unwrap_or_default())
      .collect()
  }
}

/// How one level maps onto a query endpoint.
#[derive(Debug, Clone, Copy)]
pub struct LevelBinding {
  pub level: &'static str,
  pub endpoint: &'static str,
  /// Build the query argument from the ids down to this level.
  pub arg: fn(&[&str]) -> Value,
}

struct Slot<T> {
  arg: Value,
  handle: QueryHandle<T>,
}

/// Keeps one subscription per level in step with a [`SelectionHierarchy`].
pub struct DependentQueries<T> {
  client: QueryClient,
  hierarchy: SelectionHierarchy,
  bindings: Vec<LevelBinding>,
  slots: Vec<Slot<T>>,
}

impl<T: DeserializeOwned> DependentQueries<T> {
  pub fn new(client: QueryClient, bindings: Vec<LevelBinding>) -> Result<Self, QueryError> {
    let levels: Vec<_> = bindings.iter().map(|b| b.level).collect();
    let hierarchy = SelectionHierarchy::new(&levels)?;

    let mut slots = Vec::with_capacity(bindings.len());
    for (idx, binding) in bindings.iter().enumerate() {
      let arg = (binding.arg)(&hierarchy.ids_through(idx));
      let handle = client.use_query_value(binding.endpoint, arg.clone(), SubscribeOptions::skip(true))?;
      slots.push(Slot { arg, handle });
    }

    let mut queries = Self {
      client,
      hierarchy,
      bindings,
      slots,
    };
    queries.sync()?;
    Ok(queries)
  }

  pub fn hierarchy(&self) -> &SelectionHierarchy {
    &self.hierarchy
  }

  pub fn select(&mut self, level: &str, id: &str) -> Result<Vec<&'static str>, QueryError> {
    let cleared = self.hierarchy.select(level, id)?;
    debug!(level, id, ?cleared, "Selected");
    self.sync()?;
    Ok(cleared)
  }

  pub fn set_target(&mut self, level: &str) -> Result<Vec<&'static str>, QueryError> {
    let cleared = self.hierarchy.set_target(level)?;
    debug!(level, ?cleared, "Changed target level");
    self.sync()?;
    Ok(cleared)
  }

  /// Handle of `level`'s query, live or skipped.
  pub fn handle(&self, level: &str) -> Option<&QueryHandle<T>> {
    let idx = self.hierarchy.index_of(level).ok()?;
    self.slots.get(idx).map(|slot| &slot.handle)
  }

  /// Result of the live query, if a level is enabled.
  pub fn result(&self) -> Option<QueryResult<T>> {
    self.hierarchy.enabled_level()?;
    let slot = self.slots.get(self.hierarchy.target_index())?;
    Some(slot.handle.result())
  }

  /// Wait for the live query to settle.
  pub async fn settled(&mut self) -> Option<QueryResult<T>> {
    self.hierarchy.enabled_level()?;
    let slot = self.slots.get_mut(self.hierarchy.target_index())?;
    Some(slot.handle.settled().await)
  }

  /// Bring every subscription in line with the hierarchy.
  ///
  /// Disabled levels are skipped before the enabled one goes live.
  fn sync(&mut self) -> Result<(), QueryError> {
    let enabled = self
      .hierarchy
      .enabled_level()
      .map(|_| self.hierarchy.target_index());

    for idx in (0..self.slots.len()).filter(|&idx| Some(idx) != enabled) {
      self.update_slot(idx, true)?;
    }
    if let Some(idx) = enabled {
      self.update_slot(idx, false)?;
    }
    Ok(())
  }

  fn update_slot(&mut self, idx: usize, skip: bool) -> Result<(), QueryError> {
    let binding = self.bindings[idx];
    let arg = (binding.arg)(&self.hierarchy.ids_through(idx));
    let slot = &mut self.slots[idx];

    if slot.arg == arg {
      slot.handle.set_skip(skip);
      return Ok(());
    }

    slot.handle.set_skip(true);
    let handle = self
      .client
      .use_query_value(binding.endpoint, arg.clone(), SubscribeOptions::skip(skip))?;
    *slot = Slot { arg, handle };
    Ok(())
  }
}

impl<T> std::fmt::Debug for DependentQueries<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("DependentQueries")
      .field("hierarchy", &self.hierarchy)
      .finish_non_exhaustive()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::testing::{client_with, GetThing};
  use crate::transport::{Method, MockTransport};
  use serde_json::json;

  const LEVELS: [&str; 4] = ["organization", "project", "board", "issue"];

  fn hierarchy() -> SelectionHierarchy {
    SelectionHierarchy::new(&LEVELS).unwrap()
  }

  #[test]
  fn test_new_hierarchy() {
    let h = hierarchy();
    assert_eq!(h.target(), "organization");
    assert_eq!(h.enabled_level(), Some("organization"));
    assert!(h.selected("organization").is_none());
    assert!(SelectionHierarchy::new(&[]).unwrap_err().is_validation());
  }

  #[test]
  fn test_ancestor_change_clears_descendants() {
    let mut h = hierarchy();
    h.set_target("issue").unwrap();
    for (level, id) in LEVELS.iter().zip(["O1", "P1", "B1", "I1"]) {
      h.select(level, id).unwrap();
    }

    let cleared = h.select("organization", "O2").unwrap();
    assert_eq!(cleared, vec!["project", "board", "issue"]);
    assert_eq!(h.selected("organization"), Some("O2"));
    assert!(h.selected("board").is_none());
    assert!(h.selected("issue").is_none());
    assert_eq!(h.target(), "issue");
  }

  #[test]
  fn test_reselecting_same_id_keeps_descendants() {
    let mut h = hierarchy();
    h.set_target("board").unwrap();
    h.select("organization", "O1").unwrap();
    h.select("project", "P1").unwrap();

    assert!(h.select("organization", "O1").unwrap().is_empty());
    assert_eq!(h.selected("project"), Some("P1"));
  }

  #[test]
  fn test_empty_id_clears_level() {
    let mut h = hierarchy();
    h.set_target("project").unwrap();
    h.select("organization", "O1").unwrap();
    h.select("project", "P1").unwrap();

    assert_eq!(h.select("organization", "  ").unwrap(), vec!["project"]);
    assert!(h.selected("organization").is_none());
  }

  #[test]
  fn test_target_change_clears_below_new_target() {
    let mut h = hierarchy();
    h.set_target("issue").unwrap();
    h.select("organization", "O1").unwrap();
    h.select("project", "P1").unwrap();
    h.select("board", "B1").unwrap();

    let cleared = h.set_target("project").unwrap();
    assert_eq!(cleared, vec!["board"]);
    assert_eq!(h.selected("project"), Some("P1"));

    // Moving down keeps what is already selected above
    assert!(h.set_target("board").unwrap().is_empty());
    assert_eq!(h.selected("organization"), Some("O1"));
    assert_eq!(h.enabled_level(), Some("board"));
  }

  #[test]
  fn test_select_below_target_rejected() {
    let mut h = hierarchy();
    let err = h.select("board", "B1").unwrap_err();
    assert!(err.is_validation());
    assert!(h.select("sprint", "S1").unwrap_err().is_validation());
  }

  #[test]
  fn test_activity_rules() {
    let mut h = hierarchy();
    h.set_target("board").unwrap();
    assert!(h.is_active("organization"));
    assert!(!h.is_active("project"));
    assert_eq!(h.enabled_level(), None);

    h.select("organization", "O1").unwrap();
    h.select("project", "P1").unwrap();
    assert!(h.is_active("board"));
    assert!(!h.is_active("issue"));
    assert!(h.is_enabled("board"));
    assert!(!h.is_enabled("project"));
    assert_eq!(h.ids_through(2), vec!["O1", "P1", ""]);
  }

  fn bindings() -> Vec<LevelBinding> {
    LEVELS
      .iter()
      .map(|&level| LevelBinding {
        level,
        endpoint: "getThing",
        arg: |ids| json!(ids.last().copied().unwrap_or_default()),
      })
      .collect()
  }

  fn live_subscriptions(client: &QueryClient) -> usize {
    client.entries().iter().map(|e| e.subscriber_count).sum()
  }

  #[tokio::test(start_paused = true)]
  async fn test_only_target_level_is_live() {
    let mock = MockTransport::new();
    for id in ["O1", "P1", "B1", "B2"] {
      mock.route(Method::Get, &format!("/things/{}", id), move |_| Ok(json!({"id": id})));
    }
    let (client, mock) = client_with(mock);
    client.register_query::<GetThing>();

    let mut queries: DependentQueries<Value> = DependentQueries::new(client.clone(), bindings()).unwrap();
    // Organization is the target but has no id yet: malformed, so nothing is fetched
    assert_eq!(mock.call_count(), 0);

    queries.select("organization", "O1").unwrap();
    assert_eq!(queries.settled().await.unwrap().data, Some(json!({"id": "O1"})));

    queries.set_target("board").unwrap();
    assert!(queries.result().is_none(), "project not selected yet");
    assert_eq!(live_subscriptions(&client), 0);

    queries.select("project", "P1").unwrap();
    queries.select("board", "B1").unwrap();
    assert_eq!(queries.settled().await.unwrap().data, Some(json!({"id": "B1"})));
    assert_eq!(live_subscriptions(&client), 1);
    assert!(queries.handle("board").unwrap().subscription().is_active());
    assert!(!queries.handle("organization").unwrap().subscription().is_active());

    queries.select("board", "B2").unwrap();
    assert_eq!(queries.settled().await.unwrap().data, Some(json!({"id": "B2"})));
    assert_eq!(live_subscriptions(&client), 1);
    assert_eq!(mock.calls_to(Method::Get, "/things/P1"), 0);
  }

  #[tokio::test(start_paused = true)]
  async fn test_switching_level_up_reuses_cache() {
    let mock = MockTransport::new();
    for id in ["O1", "P1"] {
      mock.route(Method::Get, &format!("/things/{}", id), move |_| Ok(json!(id)));
    }
    let (client, mock) = client_with(mock);
    client.register_query::<GetThing>();

    let mut queries: DependentQueries<String> = DependentQueries::new(client.clone(), bindings()).unwrap();
    queries.select("organization", "O1").unwrap();
    queries.settled().await;

    queries.set_target("project").unwrap();
    queries.select("project", "P1").unwrap();
    assert_eq!(queries.settled().await.unwrap().data.as_deref(), Some("P1"));

    queries.set_target("organization").unwrap();
    assert!(queries.hierarchy().selected("project").is_none());
    assert_eq!(queries.settled().await.unwrap().data.as_deref(), Some("O1"));
    assert_eq!(mock.calls_to(Method::Get, "/things/O1"), 1);
    assert_eq!(live_subscriptions(&client), 1);
  }
}
