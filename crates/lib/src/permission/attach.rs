//! Applying resolved permissions to roles and policies.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ConfigError;
use crate::permission::{Permissions, PolicyStatement, resolve};

/// An execution role. Grants can target it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Role {
  pub name: String,
  pub statements: Vec<PolicyStatement>,
  /// `{resource}.{method}` for every grant applied, in order.
  pub grants: Vec<String>,
}

impl Role {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }

  pub fn add_statement(&mut self, statement: PolicyStatement) {
    if !self.statements.contains(&statement) {
      self.statements.push(statement);
    }
  }
}

/// A standalone policy document. Grants cannot target it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Policy {
  pub name: String,
  pub statements: Vec<PolicyStatement>,
}

impl Policy {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      ..Default::default()
    }
  }
}

/// Add the statements, then invoke each grant against the role in order.
pub fn attach_permissions_to_role(role: &mut Role, permissions: &Permissions) -> Result<(), ConfigError> {
  let resolved = resolve(permissions)?;
  for statement in resolved.statements {
    role.add_statement(statement);
  }
  for call in resolved.grants {
    for statement in call.target.grant(&call.method)? {
      role.add_statement(statement);
    }
    role.grants.push(format!("{}.{}", call.target.handle().id, call.method));
  }
  debug!(role = %role.name, statements = role.statements.len(), "permissions attached");
  Ok(())
}

/// Add the statements to a policy. Fails if any grant tuple is present.
pub fn attach_permissions_to_policy(policy: &mut Policy, permissions: &Permissions) -> Result<(), ConfigError> {
  let resolved = resolve(permissions)?;
  if !resolved.grants.is_empty() {
    return Err(ConfigError::GrantOnPolicy);
  }
  policy.statements.extend(resolved.statements);
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::permission::{PermissionEntry, ResourceFamily, ResourceHandle};

  fn topic() -> ResourceHandle {
    ResourceHandle::new("Alerts", ResourceFamily::Topic, "arn:aws:sns:us-east-1:1:alerts")
  }

  #[test]
  fn role_applies_statements_then_grants() {
    let mut role = Role::new("ApiRole");
    let permissions = Permissions::List(vec![
      PermissionEntry::grant(topic(), "grantPublish"),
      PermissionEntry::service("s3"),
    ]);
    attach_permissions_to_role(&mut role, &permissions).unwrap();

    assert_eq!(role.statements[0], PolicyStatement::new(["s3:*"], ["*"]));
    assert_eq!(role.statements[1].actions, vec!["sns:Publish"]);
    assert_eq!(role.grants, vec!["Alerts.grantPublish"]);
  }

  #[test]
  fn policy_rejects_grants() {
    let mut policy = Policy::new("Extra");
    let permissions = Permissions::List(vec![PermissionEntry::grant(topic(), "grantPublish")]);
    assert_eq!(
      attach_permissions_to_policy(&mut policy, &permissions),
      Err(ConfigError::GrantOnPolicy)
    );
    assert!(policy.statements.is_empty());
  }

  #[test]
  fn policy_accepts_statements() {
    let mut policy = Policy::new("Extra");
    attach_permissions_to_policy(&mut policy, &Permissions::All).unwrap();
    assert_eq!(policy.statements, vec![PolicyStatement::all_access()]);
  }
}
