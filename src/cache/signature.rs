//! Request signatures: the cache key for one endpoint + argument combination.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;

/// Deterministic key derived from an endpoint name and its serialized arguments.
///
/// Structurally equal arguments produce the same signature regardless of the
/// order in which object fields were written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestSignature {
  endpoint: String,
  hash: String,
}

impl RequestSignature {
  pub fn new(endpoint: &str, arg: &Value) -> Self {
    let canonical = canonical_json(arg);

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(endpoint.as_bytes());
    hasher.update(b"\0");
    hasher.update(canonical.as_bytes());
    let result = hasher.finalize();

    Self {
      endpoint: endpoint.to_string(),
      hash: hex::encode(result),
    }
  }

  /// Name of the endpoint this signature belongs to.
  pub fn endpoint(&self) -> &str {
    &self.endpoint
  }

  pub fn hash(&self) -> &str {
    &self.hash
  }
}

impl fmt::Display for RequestSignature {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}:{}", self.endpoint, &self.hash[..12])
  }
}

/// Compact JSON with object keys sorted at every depth.
///
/// `serde_json::Map` is a `BTreeMap` as long as its `preserve_order` feature
/// stays off, so plain serialization is already canonical.
fn canonical_json(value: &Value) -> String {
  value.to_string()
}
