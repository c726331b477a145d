//! Permission lists in manifest form.
//!
//! ```json
//! "*"
//! ["s3", "sqs:SendMessage", "*",
//!  { "resource": "Uploads" },
//!  { "actions": ["ses:SendEmail"], "resources": ["*"] },
//!  ["Jobs", "grantSendMessages"]]
//! ```
//!
//! Resource references are looked up by construct id; they are never matched
//! by shape.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;

use crate::error::ConfigError;
use crate::permission::{Grantable, PermissionEntry, Permissions, PolicyStatement};

/// Finds declared grantable constructs by id.
pub trait ResourceLookup {
  fn lookup(&self, id: &str) -> Option<Arc<dyn Grantable>>;
}

impl ResourceLookup for HashMap<String, Arc<dyn Grantable>> {
  fn lookup(&self, id: &str) -> Option<Arc<dyn Grantable>> {
    self.get(id).cloned()
  }
}

pub fn from_json(value: &Value, lookup: &dyn ResourceLookup) -> Result<Permissions, ConfigError> {
  match value {
    Value::String(s) if s == "*" => Ok(Permissions::All),
    Value::Array(entries) => entries
      .iter()
      .map(|entry| entry_from_json(entry, lookup))
      .collect::<Result<Vec<_>, _>>()
      .map(Permissions::List),
    other => Err(ConfigError::UnsupportedPermissionValue(other.to_string())),
  }
}

fn resolve_id(id: &str, lookup: &dyn ResourceLookup) -> Result<Arc<dyn Grantable>, ConfigError> {
  lookup.lookup(id).ok_or_else(|| ConfigError::UnknownResource(id.to_string()))
}

fn entry_from_json(entry: &Value, lookup: &dyn ResourceLookup) -> Result<PermissionEntry, ConfigError> {
  let unsupported = || ConfigError::UnsupportedPermissionEntry(entry.to_string());

  match entry {
    Value::String(s) if s == "*" => Ok(PermissionEntry::Wildcard),
    Value::String(s) if !s.is_empty() => Ok(PermissionEntry::Service(s.clone())),
    Value::Object(map) => {
      if let Some(id) = map.get("resource") {
        let id = id.as_str().ok_or_else(unsupported)?;
        return Ok(PermissionEntry::Resource(resolve_id(id, lookup)?));
      }
      if map.contains_key("actions") {
        let statement: PolicyStatement = serde_json::from_value(entry.clone()).map_err(|_| unsupported())?;
        return Ok(PermissionEntry::Statement(statement));
      }
      Err(unsupported())
    }
    Value::Array(tuple) => match tuple.as_slice() {
      [Value::String(id), Value::String(method)] => Ok(PermissionEntry::Grant {
        target: resolve_id(id, lookup)?,
        method: method.clone(),
      }),
      _ => Err(unsupported()),
    },
    _ => Err(unsupported()),
  }
}
