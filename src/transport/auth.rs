//! Auth token sources for the transport.
//!
//! Acquiring and refreshing tokens happens elsewhere; the transport only asks
//! for the current one on every request.

/// Supplies the bearer token injected into each request.
pub trait TokenProvider: Send + Sync {
  /// Current token, or `None` to send the request unauthenticated.
  fn token(&self) -> Option<String>;
}

/// A fixed token.
#[derive(Clone)]
pub struct StaticToken(pub String);

impl TokenProvider for StaticToken {
  fn token(&self) -> Option<String> {
    Some(self.0.clone())
  }
}

impl std::fmt::Debug for StaticToken {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str("StaticToken(..)")
  }
}

/// Reads the token from an environment variable on every request, so a
/// refreshed token is picked up without rebuilding the transport.
#[derive(Debug, Clone)]
pub struct EnvToken {
  var: String,
}

impl EnvToken {
  pub fn new(var: impl Into<String>) -> Self {
    Self { var: var.into() }
  }
}

impl TokenProvider for EnvToken {
  fn token(&self) -> Option<String> {
    std::env::var(&self.var).ok().filter(|t| !t.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_static_token_debug_hides_secret() {
    let token = StaticToken("s3cret".into());
    assert_eq!(token.token().as_deref(), Some("s3cret"));
    assert!(!format!("{:?}", token).contains("s3cret"));
  }

  #[test]
  fn test_env_token_missing_var() {
    let token = EnvToken::new("SHIPSYNC_TEST_TOKEN_THAT_IS_NEVER_SET");
    assert_eq!(token.token(), None);
  }
}
