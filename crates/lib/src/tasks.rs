//! Deferred task queue.
//!
//! Constructs register expensive work (site builds, packaging) here while the
//! application graph is declared synchronously. [`TaskQueue::drain`] runs the
//! tasks afterwards, strictly one at a time and in registration order, so a task
//! may rely on the side effects of every task queued before it.

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use tracing::{debug, error, info};

use crate::error::Error;
use crate::util::lock;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A zero-argument asynchronous unit of work.
pub type DeferredTask = Box<dyn FnOnce() -> BoxFuture<'static, Result<(), Error>> + Send>;

struct QueuedTask {
  label: String,
  task: DeferredTask,
}

/// Ordered list of deferred tasks for one application build.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct TaskQueue {
  pending: Arc<Mutex<VecDeque<QueuedTask>>>,
}

impl TaskQueue {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a task. `label` only appears in logs.
  pub fn add<F, Fut>(&self, label: impl Into<String>, task: F)
  where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), Error>> + Send + 'static,
  {
    let label = label.into();
    debug!(task = %label, "deferred task registered");
    let task: DeferredTask = Box::new(move || Box::pin(task()));
    lock(&self.pending).push_back(QueuedTask { label, task });
  }

  pub fn len(&self) -> usize {
    lock(&self.pending).len()
  }

  pub fn is_empty(&self) -> bool {
    lock(&self.pending).is_empty()
  }

  /// Run every queued task to completion, sequentially.
  ///
  /// The first failing task aborts the drain: its error is returned and the
  /// tasks behind it are discarded. Tasks queued while draining run after the
  /// ones already queued. The queue is empty afterwards either way.
  pub async fn drain(&self) -> Result<(), Error> {
    let total = self.len();
    info!(tasks = total, "draining deferred tasks");

    let mut completed = 0usize;
    loop {
      // The lock is released before the task is awaited.
      let next = lock(&self.pending).pop_front();
      let Some(QueuedTask { label, task }) = next else {
        break;
      };

      debug!(task = %label, "running deferred task");
      if let Err(e) = task().await {
        let dropped = {
          let mut pending = lock(&self.pending);
          let dropped = pending.len();
          pending.clear();
          dropped
        };
        error!(task = %label, error = %e, dropped, "deferred task failed, aborting drain");
        return Err(e);
      }
      completed += 1;
    }

    info!(completed, "deferred tasks complete");
    Ok(())
  }
}
