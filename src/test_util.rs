// src/test_util.rs

//! Helpers shared by the unit tests.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;

use crate::executor::{Executor, Work};

/// Runs every submission on a fresh OS thread and counts submissions.
#[derive(Debug, Default)]
pub(crate) struct SpawnExecutor {
  submitted: AtomicUsize,
}

impl SpawnExecutor {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn submitted(&self) -> usize {
    self.submitted.load(Ordering::SeqCst)
  }
}

impl Executor for SpawnExecutor {
  fn submit(&self, work: Work) {
    self.submitted.fetch_add(1, Ordering::SeqCst);
    thread::spawn(work);
  }
}

/// Queues submissions without running them until [`run_all`](Self::run_all) is called.
#[derive(Default)]
pub(crate) struct HeldExecutor {
  queue: Mutex<Vec<Work>>,
}

impl HeldExecutor {
  pub(crate) fn new() -> Self {
    Self::default()
  }

  pub(crate) fn held(&self) -> usize {
    self.queue.lock().len()
  }

  /// Runs everything queued so far on the calling thread.
  pub(crate) fn run_all(&self) {
    let queued = std::mem::take(&mut *self.queue.lock());
    for work in queued {
      work();
    }
  }
}

impl Executor for HeldExecutor {
  fn submit(&self, work: Work) {
    self.queue.lock().push(work);
  }
}

impl fmt::Debug for HeldExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("HeldExecutor").field("held", &self.held()).finish()
  }
}
