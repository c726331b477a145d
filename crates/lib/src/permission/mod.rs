//! Permission resolution.
//!
//! Constructs accept permissions in several shapes: the all-access marker,
//! service shorthands (`"s3"`, `"s3:GetObject"`), references to declared
//! resources, raw statements and `(resource, method)` grant tuples.
//! [`resolve`] normalizes them into allow statements plus an ordered list of
//! grant calls. Resolution is pure; applying the result is done by
//! [`attach_permissions_to_role`] or [`attach_permissions_to_policy`].
//!
//! # Submodules
//!
//! - [`grantable`] - the [`Grantable`] capability and resource families
//! - [`attach`] - applying resolved permissions to roles and policies
//! - [`json`] - parsing permission lists from manifests

pub mod attach;
pub mod grantable;
pub mod json;

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::error::ConfigError;

pub use attach::{Policy, Role, attach_permissions_to_policy, attach_permissions_to_role};
pub use grantable::{Grantable, PolicyStatement, ResourceFamily, ResourceHandle};
pub use json::{ResourceLookup, from_json};

/// One entry of a permission list.
#[derive(Clone)]
pub enum PermissionEntry {
  /// `"*"` inside a list.
  Wildcard,
  /// `"s3"` or `"s3:GetObject"`.
  Service(String),
  /// Full access to a declared resource.
  Resource(Arc<dyn Grantable>),
  Statement(PolicyStatement),
  /// Invoke a named grant method of `target` on the consumer.
  Grant { target: Arc<dyn Grantable>, method: String },
}

impl PermissionEntry {
  pub fn service(action: impl Into<String>) -> Self {
    PermissionEntry::Service(action.into())
  }

  pub fn resource<G: Grantable + 'static>(target: G) -> Self {
    PermissionEntry::Resource(Arc::new(target))
  }

  pub fn grant<G: Grantable + 'static>(target: G, method: impl Into<String>) -> Self {
    PermissionEntry::Grant {
      target: Arc::new(target),
      method: method.into(),
    }
  }
}

impl fmt::Debug for PermissionEntry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      PermissionEntry::Wildcard => write!(f, "Wildcard"),
      PermissionEntry::Service(s) => f.debug_tuple("Service").field(s).finish(),
      PermissionEntry::Resource(r) => f.debug_tuple("Resource").field(&r.handle().id).finish(),
      PermissionEntry::Statement(s) => f.debug_tuple("Statement").field(s).finish(),
      PermissionEntry::Grant { target, method } => f
        .debug_struct("Grant")
        .field("target", &target.handle().id)
        .field("method", method)
        .finish(),
    }
  }
}

/// A permission declaration as accepted by constructs.
#[derive(Debug, Clone)]
pub enum Permissions {
  /// Every action on every resource. Not combinable with a list.
  All,
  List(Vec<PermissionEntry>),
}

impl Default for Permissions {
  fn default() -> Self {
    Permissions::List(Vec::new())
  }
}

impl From<Vec<PermissionEntry>> for Permissions {
  fn from(entries: Vec<PermissionEntry>) -> Self {
    Permissions::List(entries)
  }
}

/// A grant method to invoke against the consumer.
#[derive(Clone)]
pub struct GrantCall {
  pub target: Arc<dyn Grantable>,
  pub method: String,
}

impl fmt::Debug for GrantCall {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}.{}", self.target.handle().id, self.method)
  }
}

/// Output of [`resolve`]: statements in declaration order, then grants in
/// declaration order.
#[derive(Debug, Clone, Default)]
pub struct ResolvedGrant {
  pub statements: Vec<PolicyStatement>,
  pub grants: Vec<GrantCall>,
}

/// `"s3"` means `s3:*`; anything with a colon is taken as is.
fn service_statement(action: &str) -> PolicyStatement {
  match action.split_once(':') {
    Some((service, rest)) => PolicyStatement::new([format!("{service}:{rest}")], ["*"]),
    None => PolicyStatement::new([format!("{action}:*")], ["*"]),
  }
}

/// Normalize a permission declaration.
pub fn resolve(permissions: &Permissions) -> Result<ResolvedGrant, ConfigError> {
  let entries = match permissions {
    Permissions::All => {
      return Ok(ResolvedGrant {
        statements: vec![PolicyStatement::all_access()],
        grants: Vec::new(),
      });
    }
    Permissions::List(entries) => entries,
  };

  let mut resolved = ResolvedGrant::default();
  for entry in entries {
    match entry {
      PermissionEntry::Wildcard => resolved.statements.push(PolicyStatement::all_access()),
      PermissionEntry::Service(action) => resolved.statements.push(service_statement(action)),
      PermissionEntry::Resource(target) => resolved.statements.extend(target.describe_grant()),
      PermissionEntry::Statement(statement) => resolved.statements.push(statement.clone()),
      PermissionEntry::Grant { target, method } => {
        if !target.has_grant_method(method) {
          let handle = target.handle();
          return Err(ConfigError::UnknownGrantMethod {
            family: handle.family.name().to_string(),
            id: handle.id.clone(),
            method: method.clone(),
          });
        }
        resolved.grants.push(GrantCall {
          target: target.clone(),
          method: method.clone(),
        });
      }
    }
  }

  trace!(
    statements = resolved.statements.len(),
    grants = resolved.grants.len(),
    "permissions resolved"
  );
  Ok(resolved)
}
