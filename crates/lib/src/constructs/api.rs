//! HTTP APIs routed to functions.

use std::collections::BTreeMap;

use serde_json::json;
use tracing::info;

use crate::bind::{Bindable, Binding, ValueDescriptor, VariableKind};
use crate::constructs::{Function, FunctionProps};
use crate::error::ConfigError;
use crate::permission::{Grantable, Permissions, ResourceFamily, ResourceHandle};
use crate::resource::{Resource, ResourceKind, Token};
use crate::stack::Stack;
use crate::util::logical_id;

#[derive(Debug, Clone, Default)]
pub struct ApiProps {
  /// `"GET /users"` to the function serving it.
  pub routes: BTreeMap<String, FunctionProps>,
}

#[derive(Debug, Clone)]
pub struct Api {
  handle: ResourceHandle,
  logical_id: String,
  routes: BTreeMap<String, Function>,
}

impl Api {
  pub fn new(stack: &Stack, id: &str, props: ApiProps) -> Result<Self, ConfigError> {
    stack.claim_id(id)?;
    let config = stack.config();
    let logical_id = logical_id(&[id]);

    let mut routes = BTreeMap::new();
    for (route, function_props) in props.routes {
      let function_id = format!("{id}{}", logical_id_for_route(&route));
      let function = Function::new(stack, &function_id, function_props)?;
      routes.insert(route, function);
    }

    let integrations: BTreeMap<&str, &str> = routes.iter().map(|(r, f)| (r.as_str(), f.logical_id())).collect();
    stack.add_resource(Resource::new(
      logical_id.clone(),
      ResourceKind::HttpApi,
      json!({ "name": config.physical_name(id), "routes": integrations }),
    ));
    info!(stack = %stack.name(), id, routes = routes.len(), "api declared");

    Ok(Self {
      handle: ResourceHandle::new(id, ResourceFamily::HttpApi, config.arn("execute-api", &format!("{logical_id}/*"))),
      logical_id,
      routes,
    })
  }

  /// Resolved by the backend once the API is deployed.
  pub fn url(&self) -> ValueDescriptor {
    ValueDescriptor::Deferred(Token::new(&self.logical_id, "Url"))
  }

  pub fn route_function(&self, route: &str) -> Option<&Function> {
    self.routes.get(route)
  }

  pub fn routes(&self) -> impl Iterator<Item = &str> {
    self.routes.keys().map(String::as_str)
  }

  /// Attach the same permissions to every route function.
  pub fn attach_permissions(&self, permissions: &Permissions) -> Result<(), ConfigError> {
    for function in self.routes.values() {
      function.attach_permissions(permissions)?;
    }
    Ok(())
  }

  pub fn bind(&self, bindables: &[&dyn Bindable]) -> Result<(), ConfigError> {
    for function in self.routes.values() {
      function.bind(bindables)?;
    }
    Ok(())
  }
}

fn logical_id_for_route(route: &str) -> String {
  let id = logical_id(&[route]);
  if id.is_empty() { "Root".to_string() } else { id }
}

impl Grantable for Api {
  fn handle(&self) -> &ResourceHandle {
    &self.handle
  }
}

impl Bindable for Api {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Api"
  }

  fn binding(&self) -> Binding {
    Binding::new()
      .variable("url", VariableKind::Plain, self.url())
      .permission("execute-api:Invoke", vec![self.handle.arn.clone()])
  }
}
