//! The application build context.
//!
//! An [`App`] owns everything that is scoped to one application build: the
//! stack registry, the deferred task queue and the event bus. Nothing here is
//! process-global, so independent builds in one process never interfere.
//!
//! A build runs in three phases:
//! 1. declare stacks with [`App::stack`] (synchronous construct declaration)
//! 2. [`App::finish`] drains the deferred tasks (site builds and packaging)
//! 3. [`App::synth`] collects every stack template in dependency order

mod config;

pub use config::{AppConfig, AppMode};

use std::sync::{Arc, Mutex};

use serde_json::json;
use tracing::info;

use crate::error::{ConfigError, Error};
use crate::events::{EventBus, kind};
use crate::stack::{DefinitionId, Stack, StackContext, StackDefinition, StackProps, StackRegistry, order};
use crate::synth::Assembly;
use crate::tasks::TaskQueue;
use crate::util::lock;

struct AppInner {
  config: Arc<AppConfig>,
  events: EventBus,
  tasks: TaskQueue,
  registry: Mutex<StackRegistry>,
  stacks: Mutex<Vec<Stack>>,
}

/// Cloning yields another handle to the same application.
#[derive(Clone)]
pub struct App {
  inner: Arc<AppInner>,
}

impl App {
  pub fn new(config: AppConfig) -> Self {
    let events = EventBus::new(config.suppressed_events.iter().cloned());
    Self {
      inner: Arc::new(AppInner {
        config: Arc::new(config),
        events,
        tasks: TaskQueue::new(),
        registry: Mutex::new(StackRegistry::default()),
        stacks: Mutex::new(Vec::new()),
      }),
    }
  }

  pub fn config(&self) -> &AppConfig {
    &self.inner.config
  }

  pub fn mode(&self) -> AppMode {
    self.inner.config.mode
  }

  pub fn events(&self) -> &EventBus {
    &self.inner.events
  }

  pub fn tasks(&self) -> &TaskQueue {
    &self.inner.tasks
  }

  /// Register a stack definition with default props.
  pub async fn stack<T>(&self, definition: &StackDefinition<T>) -> Result<T, Error>
  where
    T: Clone + Send + Sync + 'static,
  {
    self.stack_with_props(definition, StackProps::default()).await
  }

  /// Register a stack definition.
  ///
  /// Fails with `DuplicateStack` if the definition, or another definition
  /// with the same stack name, is already registered for this app. Otherwise creates the stack, runs the definition body, awaits it
  /// and stores the output for later [`App::use_stack`] calls.
  pub async fn stack_with_props<T>(&self, definition: &StackDefinition<T>, props: StackProps) -> Result<T, Error>
  where
    T: Clone + Send + Sync + 'static,
  {
    let stack = Stack::new(
      definition.name(),
      props,
      self.inner.config.clone(),
      self.inner.events.clone(),
      self.inner.tasks.clone(),
    );
    {
      let mut stacks = lock(&self.inner.stacks);
      // Two definitions sharing a name would write the same template
      if stacks.iter().any(|existing| existing.name() == stack.name()) {
        return Err(ConfigError::DuplicateStack(definition.name().to_string()).into());
      }
      lock(&self.inner.registry).claim(definition.id(), definition.name(), stack.clone())?;
      stacks.push(stack.clone());
    }

    info!(stack = %stack.name(), "registering stack");
    let ctx = StackContext {
      app: self.clone(),
      stack: stack.clone(),
    };
    let output = definition.run(ctx).await?;

    lock(&self.inner.registry).complete(definition.id(), output.clone());
    self
      .inner
      .events
      .publish(kind::STACK_REGISTERED, json!({ "stack": stack.name() }));
    Ok(output)
  }

  /// Read the output of a registered stack.
  pub fn use_stack<T>(&self, definition: &StackDefinition<T>) -> Result<T, ConfigError>
  where
    T: Clone + Send + Sync + 'static,
  {
    lock(&self.inner.registry).output(definition.id(), definition.name())
  }

  pub(crate) fn registered_stack(&self, id: DefinitionId, name: &str) -> Result<Stack, ConfigError> {
    lock(&self.inner.registry).stack(id, name)
  }

  /// Stacks in registration order.
  pub fn stacks(&self) -> Vec<Stack> {
    lock(&self.inner.stacks).clone()
  }

  /// Run every deferred task. Call once, after all stacks are declared.
  pub async fn finish(&self) -> Result<(), Error> {
    self.inner.tasks.drain().await
  }

  /// Collect every stack template, dependencies first.
  pub fn synth(&self) -> Result<Assembly, Error> {
    let stacks = order::sort(&self.stacks())?;
    Ok(Assembly::new(
      self.inner.config.name.clone(),
      self.inner.config.stage.clone(),
      stacks.iter().map(Stack::template).collect(),
    ))
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::constructs::{Bucket, BucketProps};

  #[tokio::test]
  async fn apps_do_not_share_tasks_or_events() {
    let one = App::new(AppConfig::new("one"));
    let two = App::new(AppConfig::new("two"));

    one.tasks().add("noop", || async { Ok(()) });
    assert_eq!(one.tasks().len(), 1);
    assert!(two.tasks().is_empty());
    assert_ne!(one.events().source_id(), two.events().source_id());
  }

  #[tokio::test]
  async fn registration_publishes_event() {
    let app = App::new(AppConfig::new("shop"));
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    app.events().subscribe(kind::STACK_REGISTERED, move |e| {
      sink.lock().unwrap().push(e.properties["stack"].as_str().unwrap_or_default().to_string())
    });

    let def = StackDefinition::new("Data", |_ctx| Ok(()));
    app.stack(&def).await.unwrap();
    assert_eq!(*seen.lock().unwrap(), vec!["dev-shop-Data"]);
  }

  #[tokio::test]
  async fn distinct_definitions_with_one_name_are_duplicates() {
    let app = App::new(AppConfig::new("shop"));
    let first = StackDefinition::new("Data", |ctx| {
      Bucket::new(&ctx.stack, "Uploads", BucketProps::default())?;
      Ok(())
    });
    let second = StackDefinition::new("Data", |_ctx| Ok(()));

    app.stack(&first).await.unwrap();
    let err = app.stack(&second).await.unwrap_err();
    assert!(matches!(err, Error::Config(ConfigError::DuplicateStack(name)) if name == "Data"));

    let assembly = app.synth().unwrap();
    assert_eq!(assembly.stacks.len(), 1);
    assert_eq!(assembly.stacks[0].resources.len(), 1);
  }

  #[tokio::test]
  async fn synth_orders_dependencies_first() {
    let app = App::new(AppConfig::new("shop"));
    let web = StackDefinition::new("Web", |ctx| Ok(ctx.stack.clone()));
    let data = StackDefinition::new("Data", |ctx| {
      Bucket::new(&ctx.stack, "Uploads", BucketProps::default())?;
      Ok(ctx.stack.clone())
    });

    let web = app.stack(&web).await.unwrap();
    let data = app.stack(&data).await.unwrap();
    web.add_dependency(&data);

    let assembly = app.synth().unwrap();
    let names: Vec<_> = assembly.stacks.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["dev-shop-Data", "dev-shop-Web"]);
    assert_eq!(assembly.stacks[0].resources.len(), 1);
  }
}
