// src/runtime.rs

//! The runtime facade: the single entry surface used by generated code.
//!
//! [`AsyncRuntime`] owns nothing but a handle to its [`Executor`]. Objects it creates
//! are owned by the caller (through the handle returned at creation) and carry the
//! executor with them, so signaling and awaiting never consult global state.

use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use tokio::runtime::Handle;

use crate::completion::{Completion, HasCompletion};
use crate::config::{DispatchMode, RuntimeConfig};
use crate::error::RuntimeError;
use crate::executor::{Executor, TokioExecutor};
use crate::group::Group;
use crate::refcount::{self, RawHandle, RuntimeObject};
use crate::token::Token;
use crate::value::{AsyncValue, Value};

/// Creates, signals and awaits tokens, values and groups on top of an [`Executor`].
///
/// `AsyncRuntime` handles are cheap to clone and safe to share across threads.
///
/// # Blocking awaits
/// `await_token`, `await_value` and `await_group` park the calling thread. Calling
/// them from executor threads can deadlock a small pool when the awaited signal is
/// produced by work queued on that same pool; prefer the `*_then` forms there.
#[derive(Clone)]
pub struct AsyncRuntime {
  executor: Arc<dyn Executor>,
}

impl AsyncRuntime {
  /// Creates a runtime that runs work and continuations on `executor`.
  pub fn new(executor: Arc<dyn Executor>) -> Self {
    tracing::debug!(executor = ?executor, "Creating AsyncRuntime");
    Self { executor }
  }

  /// Creates a runtime backed by a dedicated thread pool built from `config`.
  pub fn with_config(config: RuntimeConfig) -> Result<Self, RuntimeError> {
    let executor = TokioExecutor::with_config(&config)?;
    Ok(Self::new(Arc::new(executor)))
  }

  /// Like [`with_config`](Self::with_config), using `ASYNCRT_*` environment overrides.
  pub fn from_env() -> Result<Self, RuntimeError> {
    Self::with_config(RuntimeConfig::from_env()?)
  }

  /// Creates a runtime on an existing Tokio runtime, dispatching to its workers.
  pub fn from_handle(handle: Handle) -> Self {
    Self::new(Arc::new(TokioExecutor::from_handle(handle, DispatchMode::Worker)))
  }

  pub fn executor(&self) -> &Arc<dyn Executor> {
    &self.executor
  }

  // --- Tokens ---

  /// Creates a new token in the not-ready state.
  pub fn create_token(&self) -> Token {
    Token::new(self.executor.clone())
  }

  /// Switches the token to the available state and schedules all its awaiters.
  pub fn set_token_available(&self, token: &Token) -> Result<(), RuntimeError> {
    token.set_available()
  }

  /// Blocks the caller thread until the token becomes ready.
  pub fn await_token(&self, token: &Token) {
    token.wait()
  }

  /// Runs `f` on the executor once the token becomes ready, without blocking the caller.
  pub fn await_token_then<F>(&self, token: &Token, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    token.on_ready(f)
  }

  // --- Values ---

  /// Creates a new value in the not-ready state with storage of the given size and alignment.
  pub fn create_value(&self, size: usize, alignment: usize) -> Result<Value, RuntimeError> {
    Value::new(size, alignment, self.executor.clone())
  }

  /// Creates a typed value in the not-ready state.
  pub fn create_async_value<T: Send + Sync + 'static>(&self) -> AsyncValue<T> {
    AsyncValue::new(self.executor.clone())
  }

  /// Returns a pointer to the value's payload storage.
  pub fn get_value_storage(&self, value: &Value) -> NonNull<u8> {
    value.storage()
  }

  /// Freezes the value's payload and schedules all its awaiters.
  pub fn set_value_available(&self, value: &Value) -> Result<(), RuntimeError> {
    value.set_available()
  }

  /// Blocks the caller thread until the value becomes available.
  pub fn await_value(&self, value: &Value) {
    value.wait()
  }

  /// Runs `f` on the executor once the value becomes available.
  pub fn await_value_then<F>(&self, value: &Value, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    value.on_ready(f)
  }

  // --- Groups ---

  /// Creates a new empty group.
  pub fn create_group(&self) -> Group {
    Group::new(self.executor.clone())
  }

  /// Adds `token` to `group`, returning the token's rank within the group.
  pub fn add_token_to_group(&self, group: &Group, token: &Token) -> Result<usize, RuntimeError> {
    group.add_token(token)
  }

  /// Blocks the caller thread until every token added to the group is ready.
  pub fn await_group(&self, group: &Group) {
    group.wait()
  }

  /// Runs `f` on the executor once every token added to the group is ready.
  pub fn await_group_then<F>(&self, group: &Group, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    group.on_ready(f)
  }

  // --- Execution ---

  /// Submits `f` to the executor and returns immediately.
  pub fn execute<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.executor.submit(Box::new(f))
  }

  // --- Introspection & reference counting ---

  /// The completion primitive owned by a token or value.
  pub fn get_async_value<O: HasCompletion>(obj: &O) -> &Completion {
    obj.completion()
  }

  /// The member tokens of `group`, in insertion (rank) order.
  pub fn get_async_values(group: &Group) -> Vec<Token> {
    group.tokens()
  }

  /// Records `count` additional owners of a raw runtime object.
  ///
  /// # Safety
  /// See [`refcount::add_ref`].
  pub unsafe fn add_ref<O: RuntimeObject>(obj: RawHandle<O>, count: usize) {
    refcount::add_ref(obj, count)
  }

  /// Releases `count` owners of a raw runtime object.
  ///
  /// # Safety
  /// See [`refcount::drop_ref`].
  pub unsafe fn drop_ref<O: RuntimeObject>(obj: RawHandle<O>, count: usize) {
    refcount::drop_ref(obj, count)
  }
}

impl fmt::Debug for AsyncRuntime {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncRuntime")
      .field("executor", &self.executor)
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_util::SpawnExecutor;
  use std::sync::mpsc;
  use std::time::Duration;

  fn runtime() -> AsyncRuntime {
    AsyncRuntime::new(Arc::new(SpawnExecutor::new()))
  }

  #[test]
  fn objects_start_with_one_owner() {
    let rt = runtime();
    assert_eq!(rt.create_token().ref_count(), 1);
    assert_eq!(rt.create_value(8, 8).unwrap().ref_count(), 1);
    assert_eq!(rt.create_group().ref_count(), 1);
    assert_eq!(rt.create_async_value::<u64>().ref_count(), 1);
  }

  #[test]
  fn get_async_value_exposes_the_embedded_completion() {
    let rt = runtime();
    let token = rt.create_token();
    assert!(!AsyncRuntime::get_async_value(&token).is_ready());
    rt.set_token_available(&token).unwrap();
    assert!(AsyncRuntime::get_async_value(&token).is_ready());

    let value = rt.create_value(4, 4).unwrap();
    assert_eq!(AsyncRuntime::get_async_value(&value).kind(), "value");
  }

  #[test]
  fn get_async_values_lists_members_by_rank() {
    let rt = runtime();
    let group = rt.create_group();
    let a = rt.create_token();
    let b = rt.create_token();
    assert_eq!(rt.add_token_to_group(&group, &a).unwrap(), 0);
    assert_eq!(rt.add_token_to_group(&group, &b).unwrap(), 1);

    let members = AsyncRuntime::get_async_values(&group);
    assert_eq!(members.len(), 2);
    assert!(members[0].ptr_eq(&a));
    assert!(members[1].ptr_eq(&b));
  }

  #[test]
  fn execute_is_fire_and_forget() {
    let rt = runtime();
    let token = rt.create_token();
    let producer_token = token.clone();
    let producer_rt = rt.clone();
    rt.execute(move || {
      producer_rt.set_token_available(&producer_token).unwrap();
    });
    rt.await_token(&token);
    assert!(token.is_ready());
  }

  #[test]
  fn runtimes_are_independent() {
    let first = Arc::new(SpawnExecutor::new());
    let second = Arc::new(SpawnExecutor::new());
    let rt1 = AsyncRuntime::new(first.clone());
    let rt2 = AsyncRuntime::new(second.clone());

    let (tx, rx) = mpsc::channel();
    let token = rt1.create_token();
    rt1.set_token_available(&token).unwrap();
    rt2.await_token_then(&token, move || tx.send(()).unwrap());
    rx.recv_timeout(Duration::from_secs(2)).unwrap();

    // Continuations run on the executor of the object, not of the facade used to register.
    assert_eq!(first.submitted(), 1);
    assert_eq!(second.submitted(), 0);
  }
}
