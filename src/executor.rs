// src/executor.rs

//! The executor seam: where submitted work and readiness continuations run.
//!
//! The runtime never runs continuations itself. Everything goes through an
//! [`Executor`], which is threaded explicitly through [`AsyncRuntime`](crate::AsyncRuntime)
//! so several independent runtimes can coexist in one process.

use std::fmt;
use std::sync::Arc;

use tokio::runtime::{Handle, Runtime};

use crate::config::{DispatchMode, RuntimeConfig};
use crate::error::RuntimeError;

/// A unit of work: a zero-argument callable run once on some pool thread.
pub type Work = Box<dyn FnOnce() + Send + 'static>;

/// Runs submitted work asynchronously on a managed thread.
///
/// Implementations make no ordering promise across submissions and must never
/// run `work` inline on the submitting thread.
pub trait Executor: Send + Sync + fmt::Debug {
  fn submit(&self, work: Work);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
  fn submit(&self, work: Work) {
    (**self).submit(work)
  }
}

/// Keeps an owned Tokio runtime alive and tears it down without blocking.
///
/// The last reference may well be released by a continuation running on one of the
/// runtime's own threads, where a blocking shutdown would panic.
struct OwnedRuntime {
  runtime: Option<Runtime>,
}

impl Drop for OwnedRuntime {
  fn drop(&mut self) {
    if let Some(runtime) = self.runtime.take() {
      tracing::debug!("Shutting down owned executor runtime in the background");
      runtime.shutdown_background();
    }
  }
}

/// An [`Executor`] backed by a Tokio multi-threaded runtime.
#[derive(Clone)]
pub struct TokioExecutor {
  handle: Handle,
  dispatch: DispatchMode,
  owned: Option<Arc<OwnedRuntime>>,
}

impl TokioExecutor {
  /// Uses a runtime owned by someone else. The runtime must outlive every
  /// submission; work submitted after it shut down is silently dropped.
  pub fn from_handle(handle: Handle, dispatch: DispatchMode) -> Self {
    Self {
      handle,
      dispatch,
      owned: None,
    }
  }

  /// Uses the runtime the calling thread is currently inside of.
  pub fn current(dispatch: DispatchMode) -> Result<Self, RuntimeError> {
    let handle = Handle::try_current().map_err(|e| RuntimeError::NoExecutor(e.to_string()))?;
    Ok(Self::from_handle(handle, dispatch))
  }

  /// Builds and owns a dedicated multi-threaded runtime.
  pub fn with_config(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
    let mut builder = tokio::runtime::Builder::new_multi_thread();
    builder.enable_time().thread_name(config.thread_name.clone());
    if let Some(workers) = config.worker_threads {
      builder.worker_threads(workers);
    }
    if let Some(max_blocking) = config.max_blocking_threads {
      builder.max_blocking_threads(max_blocking);
    }
    if let Some(stack_size) = config.thread_stack_size {
      builder.thread_stack_size(stack_size);
    }
    let runtime = builder.build()?;

    tracing::debug!(
      worker_threads = ?config.worker_threads,
      thread_name = %config.thread_name,
      dispatch = ?config.dispatch,
      "Built owned executor runtime"
    );

    Ok(Self {
      handle: runtime.handle().clone(),
      dispatch: config.dispatch,
      owned: Some(Arc::new(OwnedRuntime { runtime: Some(runtime) })),
    })
  }

  pub fn handle(&self) -> &Handle {
    &self.handle
  }

  pub fn dispatch(&self) -> DispatchMode {
    self.dispatch
  }
}

impl Executor for TokioExecutor {
  fn submit(&self, work: Work) {
    // The JoinHandles are dropped: submissions are fire-and-forget, and a panic
    // inside `work` stays contained in its task.
    match self.dispatch {
      DispatchMode::Worker => {
        self.handle.spawn(async move { work() });
      }
      DispatchMode::Blocking => {
        self.handle.spawn_blocking(work);
      }
    }
  }
}

impl fmt::Debug for TokioExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("TokioExecutor")
      .field("dispatch", &self.dispatch)
      .field("owned", &self.owned.is_some())
      .finish_non_exhaustive()
  }
}
