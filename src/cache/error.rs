//! Error taxonomy shared by queries, mutations and the transport.

use serde_json::Value;
use thiserror::Error;

/// Error type for query and mutation operations.
///
/// `Clone` because one in-flight fetch hands the same outcome to every waiter.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum QueryError {
  /// The transport could not reach the server.
  #[error("Network error: {0}")]
  Network(String),

  /// The server answered with a non-2xx status.
  #[error("Server responded with status {status}")]
  Server { status: u16, payload: Value },

  /// Arguments were rejected before a request was built.
  #[error("Invalid arguments for {endpoint}: {reason}")]
  ClientValidation { endpoint: String, reason: String },

  /// The payload did not match the endpoint's output type.
  #[error("Failed to decode response: {0}")]
  Decode(String),

  #[error("Unknown endpoint: {0}")]
  UnknownEndpoint(String),

  #[error("Query client has been disposed")]
  Disposed,

  #[error("No tokio runtime available to drive fetches")]
  NoRuntime,
}

impl QueryError {
  /// Shorthand for a validation failure on `endpoint`.
  pub fn validation(endpoint: &str, reason: impl Into<String>) -> Self {
    Self::ClientValidation {
      endpoint: endpoint.to_string(),
      reason: reason.into(),
    }
  }

  pub fn is_validation(&self) -> bool {
    matches!(self, Self::ClientValidation { .. })
  }

  /// HTTP status for server errors.
  pub fn status(&self) -> Option<u16> {
    match self {
      Self::Server { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<serde_json::Error> for QueryError {
  fn from(e: serde_json::Error) -> Self {
    Self::Decode(e.to_string())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_error_display() {
    let err = QueryError::Network("connection refused".to_string());
    assert_eq!(err.to_string(), "Network error: connection refused");

    let err = QueryError::Server {
      status: 422,
      payload: serde_json::json!({"message": "name must not be empty"}),
    };
    assert_eq!(err.to_string(), "Server responded with status 422");
    assert_eq!(err.status(), Some(422));

    let err = QueryError::validation("listLabels", "organizationId is required");
    assert_eq!(
      err.to_string(),
      "Invalid arguments for listLabels: organizationId is required"
    );
    assert!(err.is_validation());
    assert_eq!(err.status(), None);
  }

  #[test]
  fn test_from_serde_error() {
    let parse: Result<u32, _> = serde_json::from_str("\"nope\"");
    let err: QueryError = parse.unwrap_err().into();
    assert!(matches!(err, QueryError::Decode(_)));
  }
}
