// src/completion.rs

//! The single-shot completion primitive every runtime object is built on.
//!
//! A [`Completion`] moves from pending to ready exactly once. The transition is a
//! compare-and-swap on an atomic state tag; continuations registered before it are
//! kept in a mutex-guarded list that the signaling thread drains after the swap.
//! Registration re-checks the tag under the same lock, so a continuation is either
//! drained by the signaler or dispatched by the registrant, never both and never
//! neither. Blocking waiters park on a condvar paired with that lock.
//!
//! Continuations always run on the [`Executor`], never inline: neither the signaling
//! thread's stack nor the registering thread's stack grows with the number of waiters.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use parking_lot::{Condvar, Mutex};
use tokio::sync::oneshot;

use crate::error::RuntimeError;
use crate::executor::{Executor, Work};

/// Implemented by objects built around a single [`Completion`].
pub trait HasCompletion {
  fn completion(&self) -> &Completion;
}

const PENDING: u8 = 0;
const READY: u8 = 1;

/// A thread-safe, single-shot readiness cell with a continuation list.
///
/// Outside the crate a `Completion` can be observed and awaited but not signaled;
/// a typed value can only become ready together with its payload.
///
/// ```compile_fail
/// use asyncrt::{AsyncRuntime, RuntimeConfig};
///
/// let rt = AsyncRuntime::with_config(RuntimeConfig::default()).unwrap();
/// let value = rt.create_async_value::<u32>();
/// value.completion().set_ready().unwrap();
/// ```
pub struct Completion {
  state: AtomicU8,
  waiters: Mutex<Vec<Work>>,
  ready_cv: Condvar,
  executor: Arc<dyn Executor>,
  /// Object kind, used in diagnostics ("token", "value", "group").
  kind: &'static str,
}

impl Completion {
  /// Creates a pending completion whose continuations run on `executor`.
  pub fn new(kind: &'static str, executor: Arc<dyn Executor>) -> Self {
    Self {
      state: AtomicU8::new(PENDING),
      waiters: Mutex::new(Vec::new()),
      ready_cv: Condvar::new(),
      executor,
      kind,
    }
  }

  /// Returns true once [`set_ready`](Self::set_ready) has been called. Never reverts.
  #[inline]
  pub fn is_ready(&self) -> bool {
    // Acquire pairs with the AcqRel swap in set_ready so the producer's writes are visible.
    self.state.load(Ordering::Acquire) == READY
  }

  /// Transitions to ready and dispatches every registered continuation.
  ///
  /// Single-shot: a second call returns [`RuntimeError::AlreadyAvailable`] and has
  /// no other effect. Signaling goes through the owning object, which may need to
  /// publish a payload first.
  pub(crate) fn set_ready(&self) -> Result<(), RuntimeError> {
    if self
      .state
      .compare_exchange(PENDING, READY, Ordering::AcqRel, Ordering::Acquire)
      .is_err()
    {
      tracing::warn!(
        kind = self.kind,
        "set_available called on an object that is already available"
      );
      return Err(RuntimeError::AlreadyAvailable(self.kind));
    }

    let continuations = {
      let mut waiters = self.waiters.lock();
      // Blocking waiters either hold the lock now or are parked on the condvar.
      self.ready_cv.notify_all();
      std::mem::take(&mut *waiters)
    };

    tracing::trace!(
      kind = self.kind,
      continuations = continuations.len(),
      "Completion became ready"
    );
    for work in continuations {
      self.executor.submit(work);
    }
    Ok(())
  }

  /// Registers `f` to run on the executor once this completion is ready.
  ///
  /// If it is already ready, `f` is still submitted to the executor rather than
  /// being called here.
  pub fn on_ready<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    if self.is_ready() {
      self.executor.submit(Box::new(f));
      return;
    }

    let mut waiters = self.waiters.lock();
    if self.is_ready() {
      // Lost the race with set_ready; its drain has already happened or will not see us.
      drop(waiters);
      self.executor.submit(Box::new(f));
    } else {
      waiters.push(Box::new(f));
    }
  }

  /// Blocks the calling thread until ready. Returns immediately if already ready.
  ///
  /// Do not call this from a thread the executor needs to make progress: if every
  /// pool thread blocks here on work queued behind them, nothing completes.
  pub fn wait(&self) {
    if self.is_ready() {
      return;
    }
    let mut waiters = self.waiters.lock();
    while !self.is_ready() {
      self.ready_cv.wait(&mut waiters);
    }
  }

  /// Returns a future that resolves once ready, for callers inside async tasks.
  ///
  /// The wakeup is delivered by a continuation on the executor. If the completion is
  /// destroyed while still pending, the future never resolves.
  pub fn ready(&self) -> Ready {
    if self.is_ready() {
      return Ready::done();
    }
    let (tx, rx) = oneshot::channel();
    self.on_ready(move || {
      let _ = tx.send(());
    });
    Ready {
      state: ReadyState::Waiting(rx),
    }
  }

  /// The executor continuations are dispatched to.
  pub fn executor(&self) -> &Arc<dyn Executor> {
    &self.executor
  }

  pub fn kind(&self) -> &'static str {
    self.kind
  }

  /// Number of continuations currently waiting for readiness.
  pub fn pending_continuations(&self) -> usize {
    self.waiters.lock().len()
  }
}

impl Drop for Completion {
  fn drop(&mut self) {
    let waiters = self.waiters.get_mut();
    if !waiters.is_empty() {
      tracing::trace!(
        kind = self.kind,
        abandoned = waiters.len(),
        "Completion destroyed while continuations were still waiting"
      );
    }
  }
}

impl fmt::Debug for Completion {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Completion")
      .field("kind", &self.kind)
      .field("ready", &self.is_ready())
      .finish_non_exhaustive()
  }
}

enum ReadyState {
  Done,
  Waiting(oneshot::Receiver<()>),
  Abandoned,
}

/// Future returned by [`Completion::ready`].
#[must_use = "futures do nothing unless polled"]
pub struct Ready {
  state: ReadyState,
}

impl Ready {
  /// A future that is already resolved.
  pub(crate) fn done() -> Self {
    Self {
      state: ReadyState::Done,
    }
  }
}

impl Future for Ready {
  type Output = ();

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
    let outcome = match &mut self.state {
      ReadyState::Done => return Poll::Ready(()),
      ReadyState::Abandoned => return Poll::Pending,
      ReadyState::Waiting(rx) => futures::ready!(rx.poll_unpin(cx)),
    };
    match outcome {
      Ok(()) => {
        self.state = ReadyState::Done;
        Poll::Ready(())
      }
      Err(_) => {
        // The continuation was dropped unrun: the completion died pending.
        self.state = ReadyState::Abandoned;
        Poll::Pending
      }
    }
  }
}

impl fmt::Debug for Ready {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = match self.state {
      ReadyState::Done => "done",
      ReadyState::Waiting(_) => "waiting",
      ReadyState::Abandoned => "abandoned",
    };
    f.debug_struct("Ready").field("state", &state).finish()
  }
}
