//! Transport abstraction for the remote API.
//!
//! Provides a trait-based transport layer that enables:
//! - Real HTTP calls for production ([`HttpTransport`])
//! - Scripted transports for unit testing
//!
//! A transport only moves bytes. It returns every HTTP status as a response;
//! deciding which statuses are terminal and which are worth retrying is the
//! sync engine's job.

mod auth;
mod http;

pub use auth::{EnvToken, StaticToken, TokenProvider};
pub use http::HttpTransport;

use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::fmt;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
  Get,
  Post,
  Put,
  Patch,
  Delete,
}

impl Method {
  /// Whether the request changes server state. Only mutating requests are
  /// ever queued.
  pub fn is_mutating(self) -> bool {
    !matches!(self, Method::Get)
  }

  pub fn as_str(self) -> &'static str {
    match self {
      Method::Get => "GET",
      Method::Post => "POST",
      Method::Put => "PUT",
      Method::Patch => "PATCH",
      Method::Delete => "DELETE",
    }
  }
}

impl fmt::Display for Method {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

impl std::str::FromStr for Method {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.to_ascii_uppercase().as_str() {
      "GET" => Ok(Method::Get),
      "POST" => Ok(Method::Post),
      "PUT" => Ok(Method::Put),
      "PATCH" => Ok(Method::Patch),
      "DELETE" => Ok(Method::Delete),
      other => Err(format!("unsupported method: {}", other)),
    }
  }
}

/// A request as handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportRequest {
  pub method: Method,
  /// Path relative to the API base, e.g. `/shipments/42/status`.
  pub path: String,
  /// Query parameters for reads, JSON body for writes.
  pub body: Option<serde_json::Value>,
}

/// Raw outcome of an HTTP exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct TransportResponse {
  pub status: u16,
  pub body: serde_json::Value,
}

impl TransportResponse {
  pub fn is_success(&self) -> bool {
    (200..300).contains(&self.status)
  }

  pub fn is_client_error(&self) -> bool {
    (400..500).contains(&self.status)
  }
}

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
  /// The request did not complete in time.
  #[error("request timed out")]
  Timeout,

  /// Connection failed.
  #[error("connection failed: {0}")]
  Connect(String),

  /// Request failed mid-flight.
  #[error("request failed: {0}")]
  Request(String),

  /// The response body could not be read.
  #[error("invalid response: {0}")]
  InvalidResponse(String),

  /// The request path could not be joined onto the base URL.
  #[error("invalid url: {0}")]
  InvalidUrl(String),
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

/// Transport trait for request/response exchanges with the API.
pub trait Transport: Send + Sync {
  /// Send a request and wait for the response.
  fn send<'a>(&'a self, request: &'a TransportRequest) -> BoxFuture<'a, TransportResult<TransportResponse>>;
}

impl<T: Transport + ?Sized> Transport for std::sync::Arc<T> {
  fn send<'a>(&'a self, request: &'a TransportRequest) -> BoxFuture<'a, TransportResult<TransportResponse>> {
    (**self).send(request)
  }
}
