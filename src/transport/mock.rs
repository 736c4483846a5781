//! Scripted in-memory transport.
//!
//! `MockTransport` answers requests from registered route handlers, records every
//! call it receives, and can hold each response for a fixed delay so tests can
//! observe in-flight state deterministically (pair it with `tokio::time::pause`).
//!
//! ```
//! use tagcache::transport::{Method, MockTransport};
//! use serde_json::json;
//!
//! let mock = MockTransport::new();
//! mock.route(Method::Get, "/organizations/O1/labels", |_| Ok(json!([])));
//! assert_eq!(mock.call_count(), 0);
//! ```

use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use super::{Method, RequestDescriptor, Transport};
use crate::cache::QueryError;

type Handler = Arc<dyn Fn(&RequestDescriptor) -> Result<Value, QueryError> + Send + Sync>;

#[derive(Default)]
struct MockState {
  routes: HashMap<(Method, String), Handler>,
  calls: Vec<RequestDescriptor>,
  delay: Duration,
}

/// Transport that serves canned or computed responses. Cloning shares state.
#[derive(Clone, Default)]
pub struct MockTransport {
  state: Arc<Mutex<MockState>>,
}

impl MockTransport {
  pub fn new() -> Self {
    Self::default()
  }

  /// Hold every response for `delay` before resolving.
  pub fn with_delay(self, delay: Duration) -> Self {
    self.lock().delay = delay;
    self
  }

  /// Register a handler for `method url`, replacing any previous one.
  pub fn route<F>(&self, method: Method, url: &str, handler: F)
  where
    F: Fn(&RequestDescriptor) -> Result<Value, QueryError> + Send + Sync + 'static,
  {
    self
      .lock()
      .routes
      .insert((method, url.to_string()), Arc::new(handler));
  }

  /// Number of requests executed so far.
  pub fn call_count(&self) -> usize {
    self.lock().calls.len()
  }

  /// Number of requests executed for `method url`.
  pub fn calls_to(&self, method: Method, url: &str) -> usize {
    self
      .lock()
      .calls
      .iter()
      .filter(|c| c.method == method && c.url == url)
      .count()
  }

  pub fn calls(&self) -> Vec<RequestDescriptor> {
    self.lock().calls.clone()
  }

  fn lock(&self) -> MutexGuard<'_, MockState> {
    self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }
}

impl Transport for MockTransport {
  fn execute(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Value, QueryError>> {
    let (handler, delay) = {
      let mut state = self.lock();
      state.calls.push(request.clone());
      let handler = state
        .routes
        .get(&(request.method, request.url.clone()))
        .cloned();
      (handler, state.delay)
    };

    async move {
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      match handler {
        Some(handler) => handler(&request),
        None => Err(QueryError::Server {
          status: 404,
          payload: Value::String(format!("no route for {}", request)),
        }),
      }
    }
    .boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[tokio::test]
  async fn test_routes_and_records_calls() {
    let mock = MockTransport::new();
    mock.route(Method::Get, "/labels/L1", |_| Ok(json!({"id": "L1"})));

    let ok = mock.execute(RequestDescriptor::get("/labels/L1")).await;
    assert_eq!(ok, Ok(json!({"id": "L1"})));

    let missing = mock.execute(RequestDescriptor::get("/labels/L2")).await;
    assert_eq!(missing.unwrap_err().status(), Some(404));

    assert_eq!(mock.call_count(), 2);
    assert_eq!(mock.calls_to(Method::Get, "/labels/L1"), 1);
  }

  #[tokio::test(start_paused = true)]
  async fn test_delay_holds_response() {
    let mock = MockTransport::new().with_delay(Duration::from_millis(50));
    mock.route(Method::Get, "/slow", |_| Ok(json!(1)));

    let start = tokio::time::Instant::now();
    let result = mock.execute(RequestDescriptor::get("/slow")).await;
    assert_eq!(result, Ok(json!(1)));
    assert!(start.elapsed() >= Duration::from_millis(50));
  }
}
