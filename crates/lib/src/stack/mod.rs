//! Stacks: named, deployable collections of declared resources.
//!
//! A [`Stack`] is a cheap handle. Constructs hold one to add their resources,
//! to register deferred tasks and to publish events.
//!
//! # Submodules
//!
//! - [`registry`] - functional stack definitions and their per-app registry
//! - [`order`] - dependency ordering of stacks for synthesis

pub mod order;
pub mod registry;

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::app::AppConfig;
use crate::error::ConfigError;
use crate::events::EventBus;
use crate::resource::Resource;
use crate::tasks::TaskQueue;
use crate::util::{lock, logical_id};

pub use registry::{DefinitionId, StackContext, StackDefinition, StackRegistry};

/// Something that produces resources at synthesis time.
///
/// Constructs whose state keeps changing after declaration (functions gaining
/// bindings, for instance) register themselves instead of a fixed resource.
pub trait Synthesize: Send + Sync {
  fn synthesize(&self) -> Vec<Resource>;
}

/// Options applied when a stack is registered.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StackProps {
  /// Overrides the physical stack name (`{stage}-{app}-{id}` by default).
  pub name: Option<String>,
}

/// The synthesized form of one stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackTemplate {
  pub name: String,
  pub dependencies: Vec<String>,
  pub resources: Vec<Resource>,
}

#[derive(Default)]
struct StackState {
  construct_ids: HashSet<String>,
  logical_ids: HashSet<String>,
  resources: Vec<Resource>,
  constructs: Vec<Arc<dyn Synthesize>>,
  dependencies: Vec<String>,
  shared: HashMap<String, Arc<dyn Any + Send + Sync>>,
}

struct StackInner {
  id: String,
  name: String,
  config: Arc<AppConfig>,
  events: EventBus,
  tasks: TaskQueue,
  state: Mutex<StackState>,
}

#[derive(Clone)]
pub struct Stack {
  inner: Arc<StackInner>,
}

impl std::fmt::Debug for Stack {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Stack").field("name", &self.inner.name).finish()
  }
}

impl Stack {
  pub(crate) fn new(id: &str, props: StackProps, config: Arc<AppConfig>, events: EventBus, tasks: TaskQueue) -> Self {
    let name = props.name.unwrap_or_else(|| config.physical_name(id));
    Self {
      inner: Arc::new(StackInner {
        id: id.to_string(),
        name,
        config,
        events,
        tasks,
        state: Mutex::new(StackState::default()),
      }),
    }
  }

  pub fn id(&self) -> &str {
    &self.inner.id
  }

  pub fn name(&self) -> &str {
    &self.inner.name
  }

  pub fn config(&self) -> &AppConfig {
    &self.inner.config
  }

  pub fn events(&self) -> &EventBus {
    &self.inner.events
  }

  pub fn tasks(&self) -> &TaskQueue {
    &self.inner.tasks
  }

  /// Reserve a construct id, and the logical id derived from it, within this
  /// stack.
  pub fn claim_id(&self, id: &str) -> Result<(), ConfigError> {
    let mut state = lock(&self.inner.state);
    if state.construct_ids.contains(id) {
      return Err(ConfigError::DuplicateConstruct {
        stack: self.inner.name.clone(),
        id: id.to_string(),
      });
    }
    let logical = logical_id(&[id]);
    if state.logical_ids.contains(&logical) {
      return Err(ConfigError::LogicalIdCollision {
        stack: self.inner.name.clone(),
        id: id.to_string(),
        logical_id: logical,
      });
    }
    state.construct_ids.insert(id.to_string());
    state.logical_ids.insert(logical);
    Ok(())
  }

  pub fn add_resource(&self, resource: Resource) {
    lock(&self.inner.state).resources.push(resource);
  }

  pub fn has_resource(&self, logical_id: &str) -> bool {
    lock(&self.inner.state).resources.iter().any(|r| r.logical_id == logical_id)
  }

  pub fn add_construct(&self, construct: Arc<dyn Synthesize>) {
    lock(&self.inner.state).constructs.push(construct);
  }

  /// Get the stack-wide construct stored under `key`, creating it with `init`
  /// on first use.
  pub fn shared<T, E>(&self, key: &str, init: impl FnOnce() -> Result<T, E>) -> Result<T, E>
  where
    T: Clone + Send + Sync + 'static,
  {
    let existing = lock(&self.inner.state).shared.get(key).cloned();
    if let Some(value) = existing.and_then(|v| v.downcast_ref::<T>().cloned()) {
      return Ok(value);
    }
    // init may declare constructs in this stack, so the lock is not held
    let value = init()?;
    lock(&self.inner.state)
      .shared
      .insert(key.to_string(), Arc::new(value.clone()));
    Ok(value)
  }

  /// Record that this stack must be deployed after `stack`.
  pub fn add_dependency(&self, stack: &Stack) {
    let mut state = lock(&self.inner.state);
    if !state.dependencies.iter().any(|d| d == stack.name()) {
      state.dependencies.push(stack.name().to_string());
    }
  }

  pub fn dependencies(&self) -> Vec<String> {
    lock(&self.inner.state).dependencies.clone()
  }

  pub fn template(&self) -> StackTemplate {
    let (mut resources, constructs, dependencies) = {
      let state = lock(&self.inner.state);
      (state.resources.clone(), state.constructs.clone(), state.dependencies.clone())
    };
    for construct in constructs {
      resources.extend(construct.synthesize());
    }
    StackTemplate {
      name: self.inner.name.clone(),
      dependencies,
      resources,
    }
  }

  pub fn ptr_eq(&self, other: &Stack) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::resource::ResourceKind;
  use serde_json::json;

  fn stack(id: &str) -> Stack {
    Stack::new(
      id,
      StackProps::default(),
      Arc::new(AppConfig::new("shop")),
      EventBus::default(),
      TaskQueue::new(),
    )
  }

  struct Counter;

  impl Synthesize for Counter {
    fn synthesize(&self) -> Vec<Resource> {
      vec![Resource::new("Late", ResourceKind::Function, json!({}))]
    }
  }

  #[test]
  fn name_follows_stage_and_app() {
    assert_eq!(stack("web").name(), "dev-shop-web");
  }

  #[test]
  fn construct_ids_are_unique_per_stack() {
    let s = stack("web");
    s.claim_id("Site").unwrap();
    assert!(matches!(s.claim_id("Site"), Err(ConfigError::DuplicateConstruct { .. })));
    stack("api").claim_id("Site").unwrap();
  }

  #[test]
  fn ids_differing_only_in_separators_collide() {
    let s = stack("web");
    s.claim_id("my-site").unwrap();
    let err = s.claim_id("mysite").unwrap_err();
    assert!(matches!(err, ConfigError::LogicalIdCollision { logical_id: ref collided, .. } if collided == "mysite"));
    s.claim_id("my-site-2").unwrap();
  }

  #[test]
  fn template_includes_synthesized_constructs_after_resources() {
    let s = stack("web");
    s.add_resource(Resource::new("Early", ResourceKind::Bucket, json!({})));
    s.add_construct(Arc::new(Counter));

    let template = s.template();
    let ids: Vec<_> = template.resources.iter().map(|r| r.logical_id.as_str()).collect();
    assert_eq!(ids, vec!["Early", "Late"]);
  }

  #[test]
  fn shared_values_are_created_once() {
    let s = stack("web");
    let mut calls = 0;
    for _ in 0..3 {
      let value: Result<String, ConfigError> = s.shared("handler", || {
        calls += 1;
        Ok("created".to_string())
      });
      assert_eq!(value.unwrap(), "created");
    }
    assert_eq!(calls, 1);
  }

  #[test]
  fn dependencies_are_deduplicated() {
    let web = stack("web");
    let data = stack("data");
    web.add_dependency(&data);
    web.add_dependency(&data);
    assert_eq!(web.dependencies(), vec!["dev-shop-data"]);
  }
}
