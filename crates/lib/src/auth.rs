//! Auth flow boundary.
//!
//! Requests arrive as `/auth/{provider}/{action}` and are routed to the
//! [`Adapter`] registered for the provider. Adapters either answer with an
//! HTTP-style [`Response`] or hand back a [`Session`] directive for the
//! embedding application to turn into a session or token.
//!
//! An unknown or malformed provider never escapes as a failure: it is offered
//! to the error hook, and if the hook does not answer the caller gets a 400.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, warn};

const ROUTE_PREFIX: &str = "auth";

/// An incoming auth request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthEvent {
  pub path: String,
  #[serde(default)]
  pub query: BTreeMap<String, String>,
  #[serde(default)]
  pub headers: BTreeMap<String, String>,
  pub body: Option<String>,
}

impl AuthEvent {
  pub fn new(path: impl Into<String>) -> Self {
    Self {
      path: path.into(),
      ..Default::default()
    }
  }

  /// `(provider, action)` for `/auth/{provider}/{action}`.
  pub fn route(&self) -> Option<(&str, &str)> {
    let mut segments = self.path.split('/').filter(|s| !s.is_empty());
    if segments.next()? != ROUTE_PREFIX {
      return None;
    }
    let provider = segments.next()?;
    let action = segments.next()?;
    segments.next().is_none().then_some((provider, action))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
  pub status_code: u16,
  pub headers: BTreeMap<String, String>,
  pub body: String,
}

impl Response {
  pub fn new(status_code: u16, body: impl Into<String>) -> Self {
    Self {
      status_code,
      headers: BTreeMap::from([("Content-Type".to_string(), "text/plain".to_string())]),
      body: body.into(),
    }
  }

  pub fn redirect(location: impl Into<String>) -> Self {
    Self {
      status_code: 302,
      headers: BTreeMap::from([("Location".to_string(), location.into())]),
      body: String::new(),
    }
  }

  fn bad_request(body: impl Into<String>) -> Self {
    Self::new(400, body)
  }
}

/// Ask the application to start a session or issue a token for an
/// authenticated identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
  #[serde(rename = "type")]
  pub kind: String,
  pub properties: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "lowercase")]
pub enum AuthOutcome {
  Response(Response),
  Session(Session),
}

impl AuthOutcome {
  pub fn status_code(&self) -> Option<u16> {
    match self {
      AuthOutcome::Response(response) => Some(response.status_code),
      AuthOutcome::Session(_) => None,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown auth provider \"{provider}\" in {path}")]
pub struct UnknownProviderError {
  pub provider: String,
  pub path: String,
}

/// One identity provider.
pub trait Adapter: Send + Sync {
  fn handle(&self, action: &str, event: &AuthEvent) -> AuthOutcome;
}

impl<F> Adapter for F
where
  F: Fn(&str, &AuthEvent) -> AuthOutcome + Send + Sync,
{
  fn handle(&self, action: &str, event: &AuthEvent) -> AuthOutcome {
    self(action, event)
  }
}

type ErrorHook = Arc<dyn Fn(&UnknownProviderError, &AuthEvent) -> Option<Response> + Send + Sync>;

#[derive(Clone, Default)]
pub struct AuthHandler {
  providers: HashMap<String, Arc<dyn Adapter>>,
  on_error: Option<ErrorHook>,
}

impl std::fmt::Debug for AuthHandler {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let mut providers: Vec<_> = self.providers.keys().collect();
    providers.sort();
    f.debug_struct("AuthHandler")
      .field("providers", &providers)
      .field("on_error", &self.on_error.is_some())
      .finish()
  }
}

impl AuthHandler {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn provider(mut self, name: impl Into<String>, adapter: impl Adapter + 'static) -> Self {
    self.providers.insert(name.into(), Arc::new(adapter));
    self
  }

  /// Called for unknown providers. Returning `None` falls back to a 400.
  pub fn on_error<F>(mut self, hook: F) -> Self
  where
    F: Fn(&UnknownProviderError, &AuthEvent) -> Option<Response> + Send + Sync + 'static,
  {
    self.on_error = Some(Arc::new(hook));
    self
  }

  pub fn handle(&self, event: &AuthEvent) -> AuthOutcome {
    match self.dispatch(event) {
      Ok(outcome) => outcome,
      Err(err) => {
        warn!(path = %event.path, provider = %err.provider, "unknown auth provider");
        let answered = self.on_error.as_ref().and_then(|hook| hook(&err, event));
        AuthOutcome::Response(answered.unwrap_or_else(|| Response::bad_request(err.to_string())))
      }
    }
  }

  /// Route without the 400 fallback.
  pub fn dispatch(&self, event: &AuthEvent) -> Result<AuthOutcome, UnknownProviderError> {
    let unknown = |provider: &str| UnknownProviderError {
      provider: provider.to_string(),
      path: event.path.clone(),
    };
    let (provider, action) = event.route().ok_or_else(|| unknown(""))?;
    let adapter = self.providers.get(provider).ok_or_else(|| unknown(provider))?;
    debug!(provider = %provider, action = %action, "dispatching auth request");
    Ok(adapter.handle(action, event))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  fn github(action: &str, event: &AuthEvent) -> AuthOutcome {
    match action {
      "authorize" => AuthOutcome::Response(Response::redirect("https://github.com/login/oauth/authorize")),
      "callback" => AuthOutcome::Session(Session {
        kind: "user".into(),
        properties: json!({ "code": event.query.get("code") }),
      }),
      _ => AuthOutcome::Response(Response::new(404, "no such action")),
    }
  }

  #[test]
  fn routes_to_the_registered_adapter() {
    let handler = AuthHandler::new().provider("github", github);

    let outcome = handler.handle(&AuthEvent::new("/auth/github/authorize"));
    assert_eq!(outcome.status_code(), Some(302));

    let mut callback = AuthEvent::new("/auth/github/callback");
    callback.query.insert("code".into(), "abc".into());
    match handler.handle(&callback) {
      AuthOutcome::Session(session) => assert_eq!(session.properties["code"], "abc"),
      other => panic!("expected a session, got {other:?}"),
    }
  }

  #[test]
  fn unknown_provider_is_a_readable_400() {
    let handler = AuthHandler::new().provider("github", github);
    let outcome = handler.handle(&AuthEvent::new("/auth/gitlab/authorize"));
    match outcome {
      AuthOutcome::Response(response) => {
        assert_eq!(response.status_code, 400);
        assert!(response.body.contains("unknown auth provider \"gitlab\""));
      }
      other => panic!("expected a response, got {other:?}"),
    }
  }

  #[test]
  fn malformed_path_is_a_400() {
    let handler = AuthHandler::new().provider("github", github);
    for path in ["/auth", "/auth/github", "/login/github/authorize", "/auth/github/callback/extra"] {
      assert_eq!(handler.handle(&AuthEvent::new(path)).status_code(), Some(400), "{path}");
    }
  }

  #[test]
  fn error_hook_can_answer() {
    let handler = AuthHandler::new()
      .provider("github", github)
      .on_error(|err, _| (err.provider == "legacy").then(|| Response::redirect("/login")));

    assert_eq!(handler.handle(&AuthEvent::new("/auth/legacy/authorize")).status_code(), Some(302));
    assert_eq!(handler.handle(&AuthEvent::new("/auth/other/authorize")).status_code(), Some(400));
  }

  #[test]
  fn dispatch_reports_the_provider() {
    let handler = AuthHandler::new();
    let err = handler.dispatch(&AuthEvent::new("/auth/google/callback")).unwrap_err();
    assert_eq!(err.provider, "google");
  }
}
