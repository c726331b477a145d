//! Capability binding.
//!
//! Any construct can expose itself to a consumer (usually a [`Function`]) by
//! implementing [`Bindable`]. A [`Binding`] carries the environment values the
//! consumer needs plus the permissions it must be granted, so consumers never
//! depend on the concrete shape of what they bind.
//!
//! Values that only exist after deployment are [`ValueDescriptor::Deferred`]:
//! they stay tokens until the provisioning backend resolves them.
//!
//! [`Function`]: crate::constructs::Function

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::consts::{BINDING_ENV_PREFIX, CLIENT_PACKAGE};
use crate::resource::Token;

/// A value exposed through a binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum ValueDescriptor {
  /// Known at declaration time.
  Plain(String),
  /// Resolved by the backend during materialization.
  Deferred(Token),
}

impl ValueDescriptor {
  pub fn plain(value: impl Into<String>) -> Self {
    ValueDescriptor::Plain(value.into())
  }

  pub fn is_deferred(&self) -> bool {
    matches!(self, ValueDescriptor::Deferred(_))
  }

  /// The literal value, if already known.
  pub fn as_plain(&self) -> Option<&str> {
    match self {
      ValueDescriptor::Plain(v) => Some(v),
      ValueDescriptor::Deferred(_) => None,
    }
  }

  /// JSON form for resource properties: a string or a `{ "ref": .. }` object.
  pub fn to_json(&self) -> serde_json::Value {
    match self {
      ValueDescriptor::Plain(v) => serde_json::Value::String(v.clone()),
      ValueDescriptor::Deferred(token) => token.to_json(),
    }
  }
}

impl From<&str> for ValueDescriptor {
  fn from(value: &str) -> Self {
    ValueDescriptor::Plain(value.to_string())
  }
}

impl From<Token> for ValueDescriptor {
  fn from(token: Token) -> Self {
    ValueDescriptor::Deferred(token)
  }
}

/// How a consumer should interpret a bound variable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariableKind {
  Plain,
  SiteUrl,
  Secret,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindingVariable {
  #[serde(rename = "type")]
  pub kind: VariableKind,
  pub value: ValueDescriptor,
}

/// What a bindable construct exposes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Binding {
  pub client_package: String,
  pub variables: BTreeMap<String, BindingVariable>,
  /// Action to the resource identifiers it applies to.
  pub permissions: BTreeMap<String, Vec<String>>,
}

impl Binding {
  pub fn new() -> Self {
    Self {
      client_package: CLIENT_PACKAGE.to_string(),
      ..Default::default()
    }
  }

  pub fn variable(mut self, name: &str, kind: VariableKind, value: impl Into<ValueDescriptor>) -> Self {
    self.variables.insert(
      name.to_string(),
      BindingVariable {
        kind,
        value: value.into(),
      },
    );
    self
  }

  pub fn permission(mut self, action: &str, resources: Vec<String>) -> Self {
    self.permissions.entry(action.to_string()).or_default().extend(resources);
    self
  }
}

/// A construct that can be bound to a consumer.
pub trait Bindable: Send + Sync {
  /// Construct id within its stack.
  fn id(&self) -> &str;

  /// Construct type name used in environment variable names, e.g. `Bucket`.
  fn construct_name(&self) -> &'static str;

  fn binding(&self) -> Binding;
}

/// Environment variable carrying a bound property:
/// `SITESTACK_{Construct}_{property}_{id}`.
pub fn env_var_name(construct: &str, property: &str, id: &str) -> String {
  format!("{BINDING_ENV_PREFIX}_{construct}_{property}_{id}")
}

/// Flatten a binding into environment variables for a consumer.
pub fn binding_env(bindable: &dyn Bindable) -> BTreeMap<String, ValueDescriptor> {
  bindable
    .binding()
    .variables
    .into_iter()
    .map(|(property, variable)| {
      (
        env_var_name(bindable.construct_name(), &property, bindable.id()),
        variable.value,
      )
    })
    .collect()
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  struct Fake;

  impl Bindable for Fake {
    fn id(&self) -> &str {
      "Web"
    }

    fn construct_name(&self) -> &'static str {
      "StaticSite"
    }

    fn binding(&self) -> Binding {
      Binding::new()
        .variable("url", VariableKind::SiteUrl, Token::new("WebDistribution", "Url"))
        .variable("region", VariableKind::Plain, "us-east-1")
        .permission("s3:*", vec!["arn:aws:s3:::web".into()])
    }
  }

  #[test]
  fn binding_serializes_to_contract_shape() {
    let value = serde_json::to_value(Fake.binding()).unwrap();
    assert_eq!(value["clientPackage"], "sitestack/node");
    assert_eq!(value["variables"]["url"]["type"], "site_url");
    assert_eq!(
      value["variables"]["url"]["value"],
      json!({ "kind": "deferred", "value": { "resource": "WebDistribution", "attribute": "Url" } })
    );
    assert_eq!(value["variables"]["region"]["value"], json!({ "kind": "plain", "value": "us-east-1" }));
    assert_eq!(value["permissions"]["s3:*"], json!(["arn:aws:s3:::web"]));
  }

  #[test]
  fn env_names_follow_convention() {
    let env = binding_env(&Fake);
    assert!(env.contains_key("SITESTACK_StaticSite_url_Web"));
    assert_eq!(env["SITESTACK_StaticSite_region_Web"], ValueDescriptor::plain("us-east-1"));
    assert!(env["SITESTACK_StaticSite_url_Web"].is_deferred());
  }
}
