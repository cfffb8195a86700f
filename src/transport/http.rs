//! HTTP transport implementation using reqwest.

use futures::future::BoxFuture;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use super::{
  Method, TokenProvider, Transport, TransportError, TransportRequest, TransportResponse,
  TransportResult,
};

/// JSON-over-HTTP transport against a fixed API base URL.
#[derive(Clone)]
pub struct HttpTransport {
  client: reqwest::Client,
  base: Url,
  tokens: Arc<dyn TokenProvider>,
}

impl HttpTransport {
  /// Create a transport for `base_url` (e.g. `https://host/api/v1`).
  pub fn new(
    base_url: &str,
    timeout: Duration,
    tokens: Arc<dyn TokenProvider>,
  ) -> TransportResult<Self> {
    let base = Url::parse(base_url).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;
    let client = reqwest::Client::builder()
      .timeout(timeout)
      .build()
      .map_err(|e| TransportError::Request(e.to_string()))?;

    Ok(Self {
      client,
      base,
      tokens,
    })
  }

  /// Resolve the full URL of a request, encoding read parameters as query
  /// pairs.
  fn url_for(&self, request: &TransportRequest) -> TransportResult<Url> {
    let joined = format!(
      "{}/{}",
      self.base.as_str().trim_end_matches('/'),
      request.path.trim_start_matches('/')
    );
    let mut url = Url::parse(&joined).map_err(|e| TransportError::InvalidUrl(e.to_string()))?;

    if !request.method.is_mutating() {
      if let Some(Value::Object(params)) = &request.body {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
          match value {
            Value::Null => {}
            Value::String(s) => {
              pairs.append_pair(name, s);
            }
            other => {
              pairs.append_pair(name, &other.to_string());
            }
          }
        }
      }
    }

    Ok(url)
  }
}

fn to_reqwest_method(method: Method) -> reqwest::Method {
  match method {
    Method::Get => reqwest::Method::GET,
    Method::Post => reqwest::Method::POST,
    Method::Put => reqwest::Method::PUT,
    Method::Patch => reqwest::Method::PATCH,
    Method::Delete => reqwest::Method::DELETE,
  }
}

fn classify(e: reqwest::Error) -> TransportError {
  if e.is_timeout() {
    TransportError::Timeout
  } else if e.is_connect() {
    TransportError::Connect(e.to_string())
  } else {
    TransportError::Request(e.to_string())
  }
}

/// Parse a response body, keeping non-JSON bodies as a string.
fn parse_body(bytes: &[u8]) -> Value {
  if bytes.is_empty() {
    return Value::Null;
  }
  serde_json::from_slice(bytes)
    .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

impl Transport for HttpTransport {
  fn send<'a>(
    &'a self,
    request: &'a TransportRequest,
  ) -> BoxFuture<'a, TransportResult<TransportResponse>> {
    Box::pin(async move {
      let url = self.url_for(request)?;
      let mut builder = self
        .client
        .request(to_reqwest_method(request.method), url)
        .header(ACCEPT, "application/json");

      if let Some(token) = self.tokens.token() {
        builder = builder.bearer_auth(token);
      }

      if request.method.is_mutating() {
        if let Some(body) = &request.body {
          let bytes = serde_json::to_vec(body)
            .map_err(|e| TransportError::Request(format!("failed to encode body: {}", e)))?;
          builder = builder.header(CONTENT_TYPE, "application/json").body(bytes);
        }
      }

      let response = builder.send().await.map_err(classify)?;
      let status = response.status().as_u16();
      let bytes = response.bytes().await.map_err(|e| {
        if e.is_timeout() {
          TransportError::Timeout
        } else {
          TransportError::InvalidResponse(e.to_string())
        }
      })?;

      tracing::debug!(method = %request.method, path = %request.path, status, "api response");

      Ok(TransportResponse {
        status,
        body: parse_body(&bytes),
      })
    })
  }
}
