// src/token.rs

use std::fmt;
use std::sync::Arc;

use crate::completion::{Completion, HasCompletion, Ready};
use crate::error::RuntimeError;
use crate::executor::Executor;
use crate::refcount::{RawHandle, RuntimeObject};

/// A payload-less, single-shot completion signal.
///
/// `Token` is a cheap handle: clones share the same signal.
#[derive(Clone)]
pub struct Token {
  inner: Arc<Completion>,
}

impl Token {
  /// Creates a token in the not-ready state.
  pub fn new(executor: Arc<dyn Executor>) -> Self {
    let token = Self {
      inner: Arc::new(Completion::new(Self::KIND, executor)),
    };
    tracing::trace!(token = ?Arc::as_ptr(&token.inner), "Token created");
    token
  }

  pub fn is_ready(&self) -> bool {
    self.inner.is_ready()
  }

  /// Marks the token ready and schedules all registered continuations.
  pub fn set_available(&self) -> Result<(), RuntimeError> {
    self.inner.set_ready()
  }

  /// Blocks the calling thread until the token is ready.
  pub fn wait(&self) {
    self.inner.wait()
  }

  /// Runs `f` on the executor once the token is ready.
  pub fn on_ready<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.inner.on_ready(f)
  }

  /// Resolves once the token is ready.
  pub fn ready(&self) -> Ready {
    self.inner.ready()
  }

  /// The underlying completion primitive.
  pub fn completion(&self) -> &Completion {
    &self.inner
  }

  /// True if both handles refer to the same token.
  pub fn ptr_eq(&self, other: &Token) -> bool {
    Arc::ptr_eq(&self.inner, &other.inner)
  }
}

impl HasCompletion for Token {
  fn completion(&self) -> &Completion {
    Token::completion(self)
  }
}

impl RuntimeObject for Token {
  const KIND: &'static str = "token";

  fn into_raw(self) -> RawHandle<Self> {
    RawHandle::from_arc(self.inner)
  }

  unsafe fn from_raw(raw: RawHandle<Self>) -> Self {
    Self {
      inner: raw.into_arc::<Completion>(),
    }
  }

  fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }
}

impl fmt::Debug for Token {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Token")
      .field("ptr", &Arc::as_ptr(&self.inner))
      .field("ready", &self.is_ready())
      .finish()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::test_util::SpawnExecutor;
  use std::sync::mpsc;
  use std::thread;
  use std::time::Duration;

  fn token() -> Token {
    Token::new(Arc::new(SpawnExecutor::new()))
  }

  #[test]
  fn clones_share_one_signal() {
    let a = token();
    let b = a.clone();
    assert!(a.ptr_eq(&b));
    assert!(!b.is_ready());
    a.set_available().unwrap();
    assert!(b.is_ready());
    assert!(b.set_available().is_err());
  }

  #[test]
  fn on_ready_fires_after_set_available() {
    let t = token();
    let (tx, rx) = mpsc::channel();
    t.on_ready(move || tx.send("fired").unwrap());
    assert!(rx.recv_timeout(Duration::from_millis(30)).is_err());

    t.set_available().unwrap();
    assert_eq!(rx.recv_timeout(Duration::from_secs(2)).unwrap(), "fired");
  }

  #[test]
  fn blocking_wait_from_many_threads() {
    let t = token();
    let waiters: Vec<_> = (0..4)
      .map(|_| {
        let t = t.clone();
        thread::spawn(move || {
          t.wait();
          t.is_ready()
        })
      })
      .collect();
    thread::sleep(Duration::from_millis(10));
    t.set_available().unwrap();
    for w in waiters {
      assert!(w.join().unwrap());
    }
  }
}
