//! Transport collaborator: executes one request descriptor.
//!
//! The cache never talks HTTP directly. It hands a [`RequestDescriptor`] to a
//! [`Transport`] and receives either a JSON payload or a [`QueryError`].
//! Authentication refresh lives entirely inside the transport implementation.

mod http;
pub mod mock;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::cache::QueryError;

pub use http::HttpTransport;
pub use mock::MockTransport;

/// HTTP method of a request descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    };
    f.write_str(name)
  }
}

/// Description of one request: relative url, method and optional JSON body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestDescriptor {
  pub url: String,
  pub method: Method,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub body: Option<Value>,
}

impl RequestDescriptor {
  pub fn get(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: Method::Get,
      body: None,
    }
  }

  pub fn post(url: impl Into<String>, body: Value) -> Self {
    Self {
      url: url.into(),
      method: Method::Post,
      body: Some(body),
    }
  }

  pub fn patch(url: impl Into<String>, body: Value) -> Self {
    Self {
      url: url.into(),
      method: Method::Patch,
      body: Some(body),
    }
  }

  pub fn delete(url: impl Into<String>) -> Self {
    Self {
      url: url.into(),
      method: Method::Delete,
      body: None,
    }
  }
}

impl fmt::Display for RequestDescriptor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{} {}", self.method, self.url)
  }
}

/// Executes request descriptors.
///
/// Implementations must be cheap to share; the cache holds them behind an `Arc`
/// and may call `execute` from any task.
pub trait Transport: Send + Sync + 'static {
  fn execute(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Value, QueryError>>;
}
