//! Error types shared across the crate.
//!
//! `ConfigError` covers malformed or unsupported declarations. It is raised
//! synchronously while the application graph is declared and is never retried.
//! Build pipeline failures live in [`crate::site::SiteError`].

use thiserror::Error;

use crate::site::SiteError;

/// Malformed or unsupported user-supplied declarations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
  #[error("unsupported permission value: {0}")]
  UnsupportedPermissionValue(String),

  #[error("unsupported permission entry: {0}")]
  UnsupportedPermissionEntry(String),

  #[error("unknown resource \"{0}\" referenced in permissions")]
  UnknownResource(String),

  #[error("{family} \"{id}\" has no grant method \"{method}\"")]
  UnknownGrantMethod { family: String, id: String, method: String },

  #[error("cannot attach a grant to a policy")]
  GrantOnPolicy,

  #[error("duplicate stack: \"{0}\" is already registered for this app")]
  DuplicateStack(String),

  #[error("wrong order: stack \"{0}\" has not been registered yet")]
  WrongOrder(String),

  #[error("stack dependency cycle involving \"{0}\"")]
  StackCycle(String),

  #[error("construct id \"{id}\" is already used in stack \"{stack}\"")]
  DuplicateConstruct { stack: String, id: String },

  #[error("construct id \"{id}\" maps to logical id \"{logical_id}\", already used in stack \"{stack}\"")]
  LogicalIdCollision { stack: String, id: String, logical_id: String },

  #[error("path does not exist: {0}")]
  MissingPath(String),

  #[error("timeout of {timeout}s exceeds the {limit}s limit for {target} execution")]
  TimeoutTooLarge { timeout: u32, limit: u32, target: &'static str },

  #[error("invalid mode \"{0}\" (expected deploy, local or test)")]
  InvalidMode(String),
}

/// Top-level error for application builds.
#[derive(Debug, Error)]
pub enum Error {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Site(#[from] SiteError),

  #[error("failed to write templates: {0}")]
  Io(#[from] std::io::Error),

  #[error("failed to serialize template: {0}")]
  Serialize(#[from] serde_json::Error),
}
