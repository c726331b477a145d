//! Compute functions.
//!
//! A [`Function`] keeps gaining environment entries and permissions after it is
//! declared (bindings, site servers, upload handlers), so its resource is
//! produced at synthesis time from shared state.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use tracing::debug;

use crate::bind::{Bindable, Binding, ValueDescriptor, VariableKind, binding_env};
use crate::consts::{EDGE_TIMEOUT_LIMIT_SECS, REGIONAL_TIMEOUT_LIMIT_SECS};
use crate::error::ConfigError;
use crate::permission::{
  Grantable, PermissionEntry, Permissions, PolicyStatement, ResourceFamily, ResourceHandle, Role,
  attach_permissions_to_role,
};
use crate::resource::{Resource, ResourceKind};
use crate::stack::{Stack, Synthesize};
use crate::util::{lock, logical_id};

/// Where a function executes. Edge execution has a stricter timeout ceiling.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Placement {
  #[default]
  Regional,
  Edge,
}

impl Placement {
  pub fn timeout_limit(self) -> u32 {
    match self {
      Placement::Regional => REGIONAL_TIMEOUT_LIMIT_SECS,
      Placement::Edge => EDGE_TIMEOUT_LIMIT_SECS,
    }
  }

  pub fn name(self) -> &'static str {
    match self {
      Placement::Regional => "regional",
      Placement::Edge => "edge",
    }
  }

  /// Fails when `timeout` exceeds this placement's ceiling.
  pub fn check_timeout(self, timeout: u32) -> Result<(), ConfigError> {
    let limit = self.timeout_limit();
    if timeout > limit {
      return Err(ConfigError::TimeoutTooLarge {
        timeout,
        limit,
        target: self.name(),
      });
    }
    Ok(())
  }
}

#[derive(Clone)]
pub struct FunctionProps {
  /// `path/to/file.export`, relative to the app root.
  pub handler: String,
  pub runtime: String,
  pub timeout_secs: Option<u32>,
  pub memory_mb: Option<u32>,
  pub placement: Placement,
  pub environment: BTreeMap<String, ValueDescriptor>,
  pub bind: Vec<Arc<dyn Bindable>>,
  pub permissions: Permissions,
}

impl Default for FunctionProps {
  fn default() -> Self {
    Self {
      handler: String::new(),
      runtime: "nodejs18.x".to_string(),
      timeout_secs: None,
      memory_mb: None,
      placement: Placement::Regional,
      environment: BTreeMap::new(),
      bind: Vec::new(),
      permissions: Permissions::default(),
    }
  }
}

impl FunctionProps {
  pub fn handler(handler: impl Into<String>) -> Self {
    Self {
      handler: handler.into(),
      ..Default::default()
    }
  }
}

impl std::fmt::Debug for FunctionProps {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("FunctionProps")
      .field("handler", &self.handler)
      .field("runtime", &self.runtime)
      .field("timeout_secs", &self.timeout_secs)
      .field("placement", &self.placement)
      .field("bind", &self.bind.iter().map(|b| b.id().to_string()).collect::<Vec<_>>())
      .finish()
  }
}

#[derive(Debug)]
struct FunctionState {
  handler: String,
  runtime: String,
  timeout_secs: Option<u32>,
  memory_mb: Option<u32>,
  placement: Placement,
  code: Option<Value>,
  environment: BTreeMap<String, ValueDescriptor>,
  role: Role,
}

/// Cloning yields another handle to the same function.
#[derive(Debug, Clone)]
pub struct Function {
  handle: ResourceHandle,
  logical_id: String,
  function_name: String,
  state: Arc<Mutex<FunctionState>>,
}

impl Function {
  pub fn new(stack: &Stack, id: &str, props: FunctionProps) -> Result<Self, ConfigError> {
    if let Some(timeout) = props.timeout_secs {
      props.placement.check_timeout(timeout)?;
    }
    stack.claim_id(id)?;

    let config = stack.config();
    let logical_id = logical_id(&[id]);
    let function_name = config.physical_name(id);
    let function = Self {
      handle: ResourceHandle::new(
        id,
        ResourceFamily::Function,
        config.arn("lambda", &format!("function:{function_name}")),
      ),
      state: Arc::new(Mutex::new(FunctionState {
        handler: props.handler,
        runtime: props.runtime,
        timeout_secs: props.timeout_secs,
        memory_mb: props.memory_mb,
        placement: props.placement,
        code: None,
        environment: props.environment,
        role: Role::new(format!("{logical_id}Role")),
      })),
      logical_id,
      function_name,
    };

    let bound: Vec<&dyn Bindable> = props.bind.iter().map(|b| b.as_ref()).collect();
    function.bind(&bound)?;
    function.attach_permissions(&props.permissions)?;

    stack.add_construct(Arc::new(function.clone()));
    debug!(stack = %stack.name(), id, "function declared");
    Ok(function)
  }

  pub fn logical_id(&self) -> &str {
    &self.logical_id
  }

  pub fn function_name(&self) -> &str {
    &self.function_name
  }

  pub fn function_arn(&self) -> &str {
    &self.handle.arn
  }

  pub fn placement(&self) -> Placement {
    lock(&self.state).placement
  }

  /// Expose every binding variable as an environment entry and attach every
  /// binding permission to the function role.
  pub fn bind(&self, bindables: &[&dyn Bindable]) -> Result<(), ConfigError> {
    for bindable in bindables {
      let env = binding_env(*bindable);
      let entries: Vec<PermissionEntry> = bindable
        .binding()
        .permissions
        .into_iter()
        .map(|(action, resources)| PermissionEntry::Statement(PolicyStatement::new([action], resources)))
        .collect();

      lock(&self.state).environment.extend(env);
      self.attach_permissions(&Permissions::List(entries))?;
      debug!(function = %self.handle.id, bound = %bindable.id(), "bound");
    }
    Ok(())
  }

  pub fn attach_permissions(&self, permissions: &Permissions) -> Result<(), ConfigError> {
    let mut role = lock(&self.state).role.clone();
    attach_permissions_to_role(&mut role, permissions)?;
    lock(&self.state).role = role;
    Ok(())
  }

  pub fn add_environment(&self, key: &str, value: impl Into<ValueDescriptor>) {
    lock(&self.state).environment.insert(key.to_string(), value.into());
  }

  pub fn environment(&self) -> BTreeMap<String, ValueDescriptor> {
    lock(&self.state).environment.clone()
  }

  pub fn role(&self) -> Role {
    lock(&self.state).role.clone()
  }

  /// Point the function at prebuilt code instead of its handler source.
  pub fn set_code(&self, code: Value) {
    lock(&self.state).code = Some(code);
  }
}

impl Grantable for Function {
  fn handle(&self) -> &ResourceHandle {
    &self.handle
  }
}

impl Bindable for Function {
  fn id(&self) -> &str {
    &self.handle.id
  }

  fn construct_name(&self) -> &'static str {
    "Function"
  }

  fn binding(&self) -> Binding {
    Binding::new()
      .variable("functionName", VariableKind::Plain, self.function_name.as_str())
      .permission("lambda:*", vec![self.handle.arn.clone()])
  }
}

impl Synthesize for Function {
  fn synthesize(&self) -> Vec<Resource> {
    let state = lock(&self.state);
    let environment: Map<String, Value> = state
      .environment
      .iter()
      .map(|(key, value)| (key.clone(), value.to_json()))
      .collect();
    let statements: Vec<Value> = state.role.statements.iter().map(PolicyStatement::to_json).collect();

    vec![Resource::new(
      self.logical_id.clone(),
      ResourceKind::Function,
      json!({
        "functionName": self.function_name,
        "handler": state.handler,
        "runtime": state.runtime,
        "timeout": state.timeout_secs,
        "memorySize": state.memory_mb,
        "placement": state.placement,
        "code": state.code,
        "environment": environment,
        "role": { "name": state.role.name, "statements": statements },
      }),
    )]
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::app::AppConfig;
  use crate::constructs::{Bucket, BucketProps, Topic};
  use crate::events::EventBus;
  use crate::stack::StackProps;
  use crate::tasks::TaskQueue;

  fn stack() -> Stack {
    Stack::new(
      "Api",
      StackProps::default(),
      Arc::new(AppConfig::new("shop")),
      EventBus::default(),
      TaskQueue::new(),
    )
  }

  #[test]
  fn bind_sets_env_and_permissions() {
    let stack = stack();
    let bucket = Bucket::new(&stack, "Uploads", BucketProps::default()).unwrap();
    let function = Function::new(
      &stack,
      "Handler",
      FunctionProps {
        bind: vec![Arc::new(bucket.clone())],
        ..FunctionProps::handler("src/api.handler")
      },
    )
    .unwrap();

    let env = function.environment();
    assert_eq!(
      env["SITESTACK_Bucket_bucketName_Uploads"],
      ValueDescriptor::plain(bucket.bucket_name())
    );
    let role = function.role();
    assert_eq!(role.statements.len(), 1);
    assert_eq!(role.statements[0].actions, vec!["s3:*"]);
  }

  #[test]
  fn grants_are_applied_to_the_role() {
    let stack = stack();
    let topic = Topic::new(&stack, "Alerts").unwrap();
    let function = Function::new(&stack, "Worker", FunctionProps::handler("src/worker.handler")).unwrap();

    function
      .attach_permissions(&Permissions::List(vec![PermissionEntry::grant(topic, "grantPublish")]))
      .unwrap();
    assert_eq!(function.role().grants, vec!["Alerts.grantPublish"]);
  }

  #[test]
  fn timeout_ceilings_depend_on_placement() {
    let stack = stack();
    let regional = FunctionProps {
      timeout_secs: Some(180),
      ..FunctionProps::handler("a.handler")
    };
    Function::new(&stack, "Slow", regional).unwrap();

    let edge = FunctionProps {
      timeout_secs: Some(31),
      placement: Placement::Edge,
      ..FunctionProps::handler("b.handler")
    };
    let err = Function::new(&stack, "Edge", edge).unwrap_err();
    assert_eq!(
      err,
      ConfigError::TimeoutTooLarge {
        timeout: 31,
        limit: 30,
        target: "edge"
      }
    );
  }

  #[test]
  fn synthesized_after_later_changes() {
    let stack = stack();
    let function = Function::new(&stack, "Handler", FunctionProps::handler("src/api.handler")).unwrap();
    function.add_environment("STAGE", "dev");

    let template = stack.template();
    assert_eq!(template.resources.len(), 1);
    assert_eq!(template.resources[0].properties["environment"]["STAGE"], "dev");
  }
}
