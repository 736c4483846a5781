//! Invalidation tags.
//!
//! Endpoint declarations may describe tags either as a bare category string
//! (`"Label"`) or as a `{type, id}` object. Both shapes are normalised into
//! [`Tag`] at the boundary so the rest of the cache only sees one form.

use serde::{Deserialize, Serialize};
use std::fmt;

/// An invalidation marker: a category, optionally scoped to one identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tag {
  pub category: String,
  pub id: Option<String>,
}

impl Tag {
  /// Category-wide tag, e.g. `Label`.
  pub fn category(category: impl Into<String>) -> Self {
    Self {
      category: category.into(),
      id: None,
    }
  }

  /// Identifier-qualified tag, e.g. `(Label, "123")`.
  pub fn with_id(category: impl Into<String>, id: impl Into<String>) -> Self {
    Self {
      category: category.into(),
      id: Some(id.into()),
    }
  }

  pub fn is_bare(&self) -> bool {
    self.id.is_none()
  }

  /// Whether a cached tag (`self`) is hit by an invalidation of `requested`.
  ///
  /// A bare request hits every tag of its category. A qualified request hits the
  /// exact tag and the bare form of its category.
  pub fn is_hit_by(&self, requested: &Tag) -> bool {
    if self.category != requested.category {
      return false;
    }
    match (&requested.id, &self.id) {
      (None, _) => true,
      (Some(_), None) => true,
      (Some(wanted), Some(have)) => wanted == have,
    }
  }
}

impl fmt::Display for Tag {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.id {
      Some(id) => write!(f, "{}:{}", self.category, id),
      None => write!(f, "{}", self.category),
    }
  }
}

impl From<&str> for Tag {
  fn from(category: &str) -> Self {
    Tag::category(category)
  }
}

impl<C: Into<String>, I: Into<String>> From<(C, I)> for Tag {
  fn from((category, id): (C, I)) -> Self {
    Tag::with_id(category, id)
  }
}

/// Wire shape of a tag as written in declarations or JSON input.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TagSpec {
  Bare(String),
  Qualified {
    #[serde(rename = "type")]
    kind: String,
    id: String,
  },
}

impl From<TagSpec> for Tag {
  fn from(spec: TagSpec) -> Self {
    match spec {
      TagSpec::Bare(category) => Tag::category(category),
      TagSpec::Qualified { kind, id } => Tag::with_id(kind, id),
    }
  }
}

impl From<Tag> for TagSpec {
  fn from(tag: Tag) -> Self {
    match tag.id {
      Some(id) => TagSpec::Qualified {
        kind: tag.category,
        id,
      },
      None => TagSpec::Bare(tag.category),
    }
  }
}

/// Parse a JSON array of tag specs (`["Label", {"type": "WorkLog", "id": "W1"}]`).
pub fn parse_tags(value: &serde_json::Value) -> serde_json::Result<Vec<Tag>> {
  let specs: Vec<TagSpec> = serde_json::from_value(value.clone())?;
  Ok(specs.into_iter().map(Tag::from).collect())
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_bare_request_hits_whole_category() {
    let requested = Tag::category("Label");
    assert!(Tag::category("Label").is_hit_by(&requested));
    assert!(Tag::with_id("Label", "L1").is_hit_by(&requested));
    assert!(!Tag::category("WorkLog").is_hit_by(&requested));
  }

  #[test]
  fn test_qualified_request_hits_exact_and_bare() {
    let requested = Tag::with_id("Label", "LIST");
    assert!(Tag::with_id("Label", "LIST").is_hit_by(&requested));
    assert!(Tag::category("Label").is_hit_by(&requested));
    assert!(!Tag::with_id("Label", "L1").is_hit_by(&requested));
    assert!(!Tag::with_id("WorkLog", "LIST").is_hit_by(&requested));
  }

  #[test]
  fn test_parse_mixed_shapes() {
    let tags = parse_tags(&json!(["Label", {"type": "WorkLog", "id": "W1"}])).unwrap();
    assert_eq!(
      tags,
      vec![Tag::category("Label"), Tag::with_id("WorkLog", "W1")]
    );
  }

  #[test]
  fn test_display() {
    assert_eq!(Tag::category("Form").to_string(), "Form");
    assert_eq!(
      Tag::with_id("WorkLog", "LIST-ISSUE-I1").to_string(),
      "WorkLog:LIST-ISSUE-I1"
    );
  }

  #[test]
  fn test_spec_round_trip_shape() {
    let spec: TagSpec = Tag::with_id("Label", "L1").into();
    assert_eq!(serde_json::to_value(&spec).unwrap(), json!({"type": "Label", "id": "L1"}));
  }
}
