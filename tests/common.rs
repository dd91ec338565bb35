// tests/common.rs
#![allow(dead_code)] // Not every test binary uses every helper.

use asyncrt::{AsyncRuntime, Executor, RuntimeConfig, Work};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use std::collections::HashSet;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const LONG_TIMEOUT: Duration = Duration::from_secs(5);

static TRACING_INIT: Once = Once::new();

// Honors RUST_LOG; defaults to debug output for the crate.
pub fn setup_tracing() {
  TRACING_INIT.call_once(|| {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("asyncrt=debug,warn"));
    let subscriber = FmtSubscriber::builder()
      .with_env_filter(env_filter)
      .with_target(true)
      .with_line_number(true)
      .with_test_writer()
      .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set global tracing subscriber");
  });
}

/// A runtime on its own small Tokio pool.
pub fn test_runtime(worker_threads: usize) -> AsyncRuntime {
  setup_tracing();
  let config = RuntimeConfig {
    worker_threads: Some(worker_threads),
    thread_name: "asyncrt-test".to_string(),
    ..RuntimeConfig::default()
  };
  AsyncRuntime::with_config(config).expect("Failed to create test runtime")
}

/// Executor that runs each unit of work on a fresh OS thread and records where it ran.
#[derive(Default)]
pub struct RecordingExecutor {
  submitted: AtomicUsize,
  completed: Arc<AtomicUsize>,
  threads: Arc<Mutex<HashSet<ThreadId>>>,
}

impl RecordingExecutor {
  pub fn new() -> Arc<Self> {
    Arc::new(Self::default())
  }

  pub fn submitted(&self) -> usize {
    self.submitted.load(Ordering::SeqCst)
  }

  pub fn completed(&self) -> usize {
    self.completed.load(Ordering::SeqCst)
  }

  pub fn ran_on(&self, id: ThreadId) -> bool {
    self.threads.lock().contains(&id)
  }

  /// Blocks until `n` units of work have finished running.
  pub fn wait_completed(&self, n: usize) {
    assert!(
      wait_until(LONG_TIMEOUT, || self.completed() >= n),
      "only {} of {} units of work completed",
      self.completed(),
      n
    );
  }
}

impl Executor for RecordingExecutor {
  fn submit(&self, work: Work) {
    self.submitted.fetch_add(1, Ordering::SeqCst);
    let completed = self.completed.clone();
    let threads = self.threads.clone();
    thread::spawn(move || {
      threads.lock().insert(thread::current().id());
      work();
      completed.fetch_add(1, Ordering::SeqCst);
    });
  }
}

impl fmt::Debug for RecordingExecutor {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("RecordingExecutor")
      .field("submitted", &self.submitted())
      .finish()
  }
}

/// Polls `cond` until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
  let deadline = Instant::now() + timeout;
  while Instant::now() < deadline {
    if cond() {
      return true;
    }
    thread::sleep(Duration::from_millis(2));
  }
  cond()
}
