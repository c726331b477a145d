//! Functional stack definitions.
//!
//! A [`StackDefinition`] pairs a name with a body that declares the stack's
//! constructs and returns the values other stacks may consume. Every definition
//! receives a [`DefinitionId`] when it is created; that token, not the body,
//! is what the registry keys on.
//!
//! Each [`App`] keeps its own [`StackRegistry`], so the same definition can be
//! registered once per app and never twice in the same app.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::app::App;
use crate::error::{ConfigError, Error};
use crate::stack::Stack;
use crate::tasks::BoxFuture;

/// Identity of a stack definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DefinitionId(u64);

impl DefinitionId {
  fn next() -> Self {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    DefinitionId(NEXT.fetch_add(1, Ordering::Relaxed))
  }
}

type StackBody<T> = dyn Fn(StackContext) -> BoxFuture<'static, Result<T, Error>> + Send + Sync;

/// A declarative stack: a name plus a body producing the stack's outputs.
pub struct StackDefinition<T> {
  id: DefinitionId,
  name: String,
  body: Arc<StackBody<T>>,
}

impl<T> Clone for StackDefinition<T> {
  fn clone(&self) -> Self {
    Self {
      id: self.id,
      name: self.name.clone(),
      body: self.body.clone(),
    }
  }
}

impl<T> std::fmt::Debug for StackDefinition<T> {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("StackDefinition")
      .field("id", &self.id)
      .field("name", &self.name)
      .finish()
  }
}

impl<T> StackDefinition<T> {
  pub fn id(&self) -> DefinitionId {
    self.id
  }

  pub fn name(&self) -> &str {
    &self.name
  }

  pub(crate) fn run(&self, ctx: StackContext) -> BoxFuture<'static, Result<T, Error>> {
    (self.body)(ctx)
  }
}

impl<T: Send + 'static> StackDefinition<T> {
  /// A definition whose body runs synchronously.
  pub fn new<F>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(&StackContext) -> Result<T, Error> + Send + Sync + 'static,
  {
    let body = move |ctx: StackContext| -> BoxFuture<'static, Result<T, Error>> {
      let result = body(&ctx);
      Box::pin(async move { result })
    };
    Self {
      id: DefinitionId::next(),
      name: name.into(),
      body: Arc::new(body),
    }
  }

  /// A definition whose body is asynchronous. The stack counts as registered
  /// only once the returned future resolves.
  pub fn new_async<F, Fut>(name: impl Into<String>, body: F) -> Self
  where
    F: Fn(StackContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
  {
    let body = move |ctx: StackContext| -> BoxFuture<'static, Result<T, Error>> { Box::pin(body(ctx)) };
    Self {
      id: DefinitionId::next(),
      name: name.into(),
      body: Arc::new(body),
    }
  }
}

/// What a stack body receives.
#[derive(Clone)]
pub struct StackContext {
  pub app: App,
  pub stack: Stack,
}

impl StackContext {
  /// Read the output of an already registered stack.
  pub fn use_stack<T: Clone + Send + Sync + 'static>(&self, definition: &StackDefinition<T>) -> Result<T, ConfigError> {
    self.app.use_stack(definition)
  }

  /// Deploy this stack after the stack produced by `definition`.
  pub fn depends_on<T>(&self, definition: &StackDefinition<T>) -> Result<(), ConfigError> {
    let target = self.app.registered_stack(definition.id(), definition.name())?;
    self.stack.add_dependency(&target);
    Ok(())
  }
}

/// Per-app maps from definition to stack handle and to output.
#[derive(Default)]
pub struct StackRegistry {
  stacks: HashMap<DefinitionId, Stack>,
  outputs: HashMap<DefinitionId, Arc<dyn Any + Send + Sync>>,
}

impl StackRegistry {
  /// Record the stack handle for a definition, refusing duplicates.
  pub fn claim(&mut self, id: DefinitionId, name: &str, stack: Stack) -> Result<(), ConfigError> {
    if self.stacks.contains_key(&id) {
      return Err(ConfigError::DuplicateStack(name.to_string()));
    }
    self.stacks.insert(id, stack);
    Ok(())
  }

  pub fn complete<T: Send + Sync + 'static>(&mut self, id: DefinitionId, output: T) {
    self.outputs.insert(id, Arc::new(output));
  }

  pub fn stack(&self, id: DefinitionId, name: &str) -> Result<Stack, ConfigError> {
    self
      .stacks
      .get(&id)
      .cloned()
      .ok_or_else(|| ConfigError::WrongOrder(name.to_string()))
  }

  pub fn output<T: Clone + 'static>(&self, id: DefinitionId, name: &str) -> Result<T, ConfigError> {
    self
      .outputs
      .get(&id)
      .and_then(|output| output.downcast_ref::<T>())
      .cloned()
      .ok_or_else(|| ConfigError::WrongOrder(name.to_string()))
  }

  pub fn is_complete(&self, id: DefinitionId) -> bool {
    self.outputs.contains_key(&id)
  }
}
