//! reqwest-backed transport with bearer auth and refresh-on-401.

use futures::future::BoxFuture;
use futures::FutureExt;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};
use url::Url;

use super::{Method, RequestDescriptor, Transport};
use crate::cache::QueryError;
use crate::config::{ApiConfig, Config};

#[derive(Debug, Clone)]
struct Credentials {
  access_token: Option<String>,
  /// Bumped on every successful refresh so concurrent 401s refresh once.
  generation: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
  access_token: String,
}

struct Inner {
  client: reqwest::Client,
  base_url: Url,
  refresh_path: Option<String>,
  refresh_token: Option<String>,
  credentials: RwLock<Credentials>,
  refresh_lock: Mutex<()>,
}

/// HTTP transport for the dashboard API.
#[derive(Clone)]
pub struct HttpTransport {
  inner: Arc<Inner>,
}

impl HttpTransport {
  pub fn new(api: &ApiConfig, access_token: Option<String>) -> Result<Self, QueryError> {
    let base_url = Url::parse(&api.base_url)
      .map_err(|e| QueryError::Network(format!("Invalid base url {}: {}", api.base_url, e)))?;

    let client = reqwest::Client::builder()
      .gzip(true)
      .build()
      .map_err(|e| QueryError::Network(format!("Failed to build HTTP client: {}", e)))?;

    Ok(Self {
      inner: Arc::new(Inner {
        client,
        base_url,
        refresh_path: api.refresh_path.clone(),
        refresh_token: Config::get_refresh_token(),
        credentials: RwLock::new(Credentials {
          access_token,
          generation: 0,
        }),
        refresh_lock: Mutex::new(()),
      }),
    })
  }
}

impl Inner {
  fn resolve(&self, path: &str) -> Result<Url, QueryError> {
    self
      .base_url
      .join(path.trim_start_matches('/'))
      .map_err(|e| QueryError::Network(format!("Invalid request url {}: {}", path, e)))
  }

  async fn send_once(
    &self,
    request: &RequestDescriptor,
  ) -> Result<(reqwest::Response, u64), QueryError> {
    let url = self.resolve(&request.url)?;
    let method = match request.method {
      Method::Get => reqwest::Method::GET,
      Method::Post => reqwest::Method::POST,
      Method::Put => reqwest::Method::PUT,
      Method::Patch => reqwest::Method::PATCH,
      Method::Delete => reqwest::Method::DELETE,
    };

    let credentials = self.credentials.read().await.clone();
    let mut builder = self.client.request(method, url);
    if let Some(token) = &credentials.access_token {
      builder = builder.bearer_auth(token);
    }
    if let Some(body) = &request.body {
      builder = builder.json(body);
    }

    let response = builder
      .send()
      .await
      .map_err(|e| QueryError::Network(e.to_string()))?;
    Ok((response, credentials.generation))
  }

  /// Exchange the refresh token for a new access token.
  ///
  /// `seen_generation` is the credential generation the failing request used; if
  /// another task already refreshed past it, nothing is sent.
  async fn refresh(&self, seen_generation: u64) -> Result<(), QueryError> {
    let _guard = self.refresh_lock.lock().await;
    if self.credentials.read().await.generation != seen_generation {
      return Ok(());
    }

    let (Some(path), Some(refresh_token)) = (&self.refresh_path, &self.refresh_token) else {
      return Err(QueryError::Server {
        status: 401,
        payload: Value::String("Unauthorized and no refresh configured".to_string()),
      });
    };

    debug!("Refreshing access token");
    let response = self
      .client
      .post(self.resolve(path)?)
      .json(&serde_json::json!({ "refreshToken": refresh_token }))
      .send()
      .await
      .map_err(|e| QueryError::Network(e.to_string()))?;

    let status = response.status();
    if !status.is_success() {
      warn!("Token refresh failed with status {}", status);
      return Err(QueryError::Server {
        status: status.as_u16(),
        payload: read_payload(response).await,
      });
    }

    let refreshed: RefreshResponse = response
      .json()
      .await
      .map_err(|e| QueryError::Decode(e.to_string()))?;

    let mut credentials = self.credentials.write().await;
    credentials.access_token = Some(refreshed.access_token);
    credentials.generation += 1;
    Ok(())
  }

  async fn execute(&self, request: RequestDescriptor) -> Result<Value, QueryError> {
    let (mut response, generation) = self.send_once(&request).await?;

    if response.status() == reqwest::StatusCode::UNAUTHORIZED && self.refresh_path.is_some() {
      self.refresh(generation).await?;
      response = self.send_once(&request).await?.0;
    }

    let status = response.status();
    if !status.is_success() {
      return Err(QueryError::Server {
        status: status.as_u16(),
        payload: read_payload(response).await,
      });
    }

    let bytes = response
      .bytes()
      .await
      .map_err(|e| QueryError::Network(e.to_string()))?;
    if bytes.is_empty() {
      return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(&bytes)?)
  }
}

/// Best-effort body of an error response: JSON if it parses, text otherwise.
async fn read_payload(response: reqwest::Response) -> Value {
  match response.text().await {
    Ok(text) => serde_json::from_str(&text).unwrap_or(Value::String(text)),
    Err(_) => Value::Null,
  }
}

impl Transport for HttpTransport {
  fn execute(&self, request: RequestDescriptor) -> BoxFuture<'static, Result<Value, QueryError>> {
    let inner = Arc::clone(&self.inner);
    async move { inner.execute(request).await }.boxed()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn api(base_url: &str) -> ApiConfig {
    ApiConfig {
      base_url: base_url.to_string(),
      refresh_path: None,
    }
  }

  #[test]
  fn test_resolve_joins_relative_paths() {
    let transport = HttpTransport::new(&api("https://example.test/api/"), None).unwrap();
    let url = transport.inner.resolve("/labels/L1").unwrap();
    assert_eq!(url.as_str(), "https://example.test/api/labels/L1");
  }

  #[test]
  fn test_invalid_base_url() {
    let result = HttpTransport::new(&api("not a url"), None);
    assert!(matches!(result, Err(QueryError::Network(_))));
  }
}
