//! Declarative resources handed to the provisioning backend.
//!
//! Constructs never talk to the backend directly. They emit [`Resource`]
//! records into their stack, and values that only exist after deployment are
//! expressed as [`Token`]s the backend resolves while materializing the graph.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Kind of a declared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
  Bucket,
  Queue,
  Table,
  Topic,
  EventBus,
  KinesisStream,
  RdsCluster,
  Secret,
  Function,
  HttpApi,
  Asset,
  Distribution,
  CustomResource,
}

/// A single declared resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
  pub logical_id: String,
  #[serde(rename = "type")]
  pub kind: ResourceKind,
  pub properties: Value,
  #[serde(default, skip_serializing_if = "Vec::is_empty")]
  pub depends_on: Vec<String>,
}

impl Resource {
  pub fn new(logical_id: impl Into<String>, kind: ResourceKind, properties: Value) -> Self {
    Self {
      logical_id: logical_id.into(),
      kind,
      properties,
      depends_on: Vec::new(),
    }
  }

  pub fn with_depends_on(mut self, logical_id: impl Into<String>) -> Self {
    self.depends_on.push(logical_id.into());
    self
  }
}

/// A late-bound reference to an attribute of another resource.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Token {
  pub resource: String,
  pub attribute: String,
}

impl Token {
  pub fn new(resource: impl Into<String>, attribute: impl Into<String>) -> Self {
    Self {
      resource: resource.into(),
      attribute: attribute.into(),
    }
  }

  /// JSON form embedded in resource properties.
  pub fn to_json(&self) -> Value {
    json!({ "ref": format!("{}.{}", self.resource, self.attribute) })
  }
}

impl fmt::Display for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "${{Token[{}.{}]}}", self.resource, self.attribute)
  }
}

/// A backend extension point that runs a handler during materialization.
///
/// The backend re-runs the handler only when the service token or the
/// `version` property changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomResource {
  pub service_token: Token,
  pub properties: Map<String, Value>,
}

impl CustomResource {
  pub fn new(service_token: Token, version: &str) -> Self {
    let mut properties = Map::new();
    properties.insert("version".to_string(), Value::String(version.to_string()));
    Self {
      service_token,
      properties,
    }
  }

  pub fn with_property(mut self, key: &str, value: Value) -> Self {
    self.properties.insert(key.to_string(), value);
    self
  }

  pub fn version(&self) -> Option<&str> {
    self.properties.get("version").and_then(Value::as_str)
  }

  /// Whether the backend must invoke the handler again compared to `previous`.
  pub fn requires_rerun(&self, previous: &CustomResource) -> bool {
    self.service_token != previous.service_token || self.version() != previous.version()
  }

  pub fn into_resource(self, logical_id: impl Into<String>) -> Resource {
    Resource::new(
      logical_id,
      ResourceKind::CustomResource,
      json!({
        "serviceToken": self.service_token.to_json(),
        "properties": Value::Object(self.properties),
      }),
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn token_display_and_json() {
    let token = Token::new("SiteDistribution", "DomainName");
    assert_eq!(token.to_string(), "${Token[SiteDistribution.DomainName]}");
    assert_eq!(token.to_json(), json!({ "ref": "SiteDistribution.DomainName" }));
  }

  #[test]
  fn custom_resource_reruns_only_on_version_change() {
    let token = Token::new("Handler", "Arn");
    let first = CustomResource::new(token.clone(), "abc").with_property("paths", json!(["/*"]));
    let same = CustomResource::new(token.clone(), "abc").with_property("paths", json!(["/*"]));
    let changed = CustomResource::new(token, "def");

    assert!(!same.requires_rerun(&first));
    assert!(changed.requires_rerun(&first));
  }

  #[test]
  fn resource_serializes_type_field() {
    let resource = Resource::new("Uploads", ResourceKind::Bucket, json!({ "bucketName": "x" })).with_depends_on("Other");
    let value = serde_json::to_value(&resource).unwrap();
    assert_eq!(value["type"], "Bucket");
    assert_eq!(value["depends_on"], json!(["Other"]));
  }
}
