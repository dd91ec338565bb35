// src/config.rs

//! Configuration for the thread pool backing an [`AsyncRuntime`](crate::AsyncRuntime).
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. Fields set programmatically on [`RuntimeConfig`].
//! 2. `ASYNCRT_*` environment variables, applied by [`RuntimeConfig::apply_env_overrides`].
//! 3. [`RuntimeConfig::default()`].
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ASYNCRT_WORKER_THREADS` | `usize` | `worker_threads` |
//! | `ASYNCRT_MAX_BLOCKING_THREADS` | `usize` | `max_blocking_threads` |
//! | `ASYNCRT_THREAD_NAME` | `String` | `thread_name` |
//! | `ASYNCRT_THREAD_STACK_SIZE` | `usize` | `thread_stack_size` |
//! | `ASYNCRT_DISPATCH` | `worker` \| `blocking` | `dispatch` |

use std::str::FromStr;

use crate::error::RuntimeError;

pub const ENV_WORKER_THREADS: &str = "ASYNCRT_WORKER_THREADS";
pub const ENV_MAX_BLOCKING_THREADS: &str = "ASYNCRT_MAX_BLOCKING_THREADS";
pub const ENV_THREAD_NAME: &str = "ASYNCRT_THREAD_NAME";
pub const ENV_THREAD_STACK_SIZE: &str = "ASYNCRT_THREAD_STACK_SIZE";
pub const ENV_DISPATCH: &str = "ASYNCRT_DISPATCH";

/// Default name given to the threads of an owned pool.
pub const DEFAULT_THREAD_NAME: &str = "asyncrt-worker";

/// Where submitted work and readiness continuations run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
  /// Run each unit of work as a task on the pool's worker threads.
  /// Cheapest option; work must not block for long.
  #[default]
  Worker,
  /// Run each unit of work on the pool's blocking threads.
  /// Tolerates continuations that themselves perform blocking awaits.
  Blocking,
}

impl FromStr for DispatchMode {
  type Err = RuntimeError;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    match s.trim().to_ascii_lowercase().as_str() {
      "worker" => Ok(DispatchMode::Worker),
      "blocking" => Ok(DispatchMode::Blocking),
      other => Err(RuntimeError::InvalidConfig(format!(
        "{}: expected 'worker' or 'blocking', got '{}'",
        ENV_DISPATCH, other
      ))),
    }
  }
}

/// Configuration for an owned executor thread pool.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
  /// Number of worker threads. `None` lets Tokio pick (one per core).
  pub worker_threads: Option<usize>,
  /// Upper bound on the blocking pool. `None` keeps Tokio's default.
  pub max_blocking_threads: Option<usize>,
  /// Name assigned to every pool thread.
  pub thread_name: String,
  /// Stack size for pool threads, in bytes.
  pub thread_stack_size: Option<usize>,
  /// How work is placed onto the pool.
  pub dispatch: DispatchMode,
}

impl Default for RuntimeConfig {
  fn default() -> Self {
    Self {
      worker_threads: None,
      max_blocking_threads: None,
      thread_name: DEFAULT_THREAD_NAME.to_string(),
      thread_stack_size: None,
      dispatch: DispatchMode::default(),
    }
  }
}

impl RuntimeConfig {
  /// Returns the default configuration with environment overrides applied.
  pub fn from_env() -> Result<Self, RuntimeError> {
    let mut config = Self::default();
    config.apply_env_overrides()?;
    Ok(config)
  }

  /// Applies every `ASYNCRT_*` variable that is set.
  ///
  /// A variable that is set but cannot be parsed is an error; unset variables
  /// leave the corresponding field untouched.
  pub fn apply_env_overrides(&mut self) -> Result<(), RuntimeError> {
    if let Some(val) = read_env(ENV_WORKER_THREADS) {
      self.worker_threads = Some(parse_nonzero(ENV_WORKER_THREADS, &val)?);
    }
    if let Some(val) = read_env(ENV_MAX_BLOCKING_THREADS) {
      self.max_blocking_threads = Some(parse_nonzero(ENV_MAX_BLOCKING_THREADS, &val)?);
    }
    if let Some(val) = read_env(ENV_THREAD_NAME) {
      self.thread_name = val;
    }
    if let Some(val) = read_env(ENV_THREAD_STACK_SIZE) {
      self.thread_stack_size = Some(parse_nonzero(ENV_THREAD_STACK_SIZE, &val)?);
    }
    if let Some(val) = read_env(ENV_DISPATCH) {
      self.dispatch = val.parse()?;
    }
    tracing::debug!(config = ?self, "Applied environment overrides to RuntimeConfig");
    Ok(())
  }
}

fn read_env(name: &str) -> Option<String> {
  std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_nonzero(name: &str, val: &str) -> Result<usize, RuntimeError> {
  match val.trim().parse::<usize>() {
    Ok(0) => Err(RuntimeError::InvalidConfig(format!("{}: must be greater than zero", name))),
    Ok(n) => Ok(n),
    Err(e) => Err(RuntimeError::InvalidConfig(format!("{}: '{}' ({})", name, val, e))),
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use serial_test::serial;

  fn clear_env() {
    for name in [
      ENV_WORKER_THREADS,
      ENV_MAX_BLOCKING_THREADS,
      ENV_THREAD_NAME,
      ENV_THREAD_STACK_SIZE,
      ENV_DISPATCH,
    ] {
      std::env::remove_var(name);
    }
  }

  #[test]
  fn defaults_leave_pool_sizing_to_tokio() {
    let config = RuntimeConfig::default();
    assert_eq!(config.worker_threads, None);
    assert_eq!(config.max_blocking_threads, None);
    assert_eq!(config.thread_name, DEFAULT_THREAD_NAME);
    assert_eq!(config.dispatch, DispatchMode::Worker);
  }

  #[test]
  #[serial]
  fn env_overrides_are_applied() {
    clear_env();
    std::env::set_var(ENV_WORKER_THREADS, "3");
    std::env::set_var(ENV_THREAD_NAME, "gen-code");
    std::env::set_var(ENV_DISPATCH, "Blocking");

    let config = RuntimeConfig::from_env().unwrap();
    assert_eq!(config.worker_threads, Some(3));
    assert_eq!(config.thread_name, "gen-code");
    assert_eq!(config.dispatch, DispatchMode::Blocking);
    assert_eq!(config.thread_stack_size, None);
    clear_env();
  }

  #[test]
  #[serial]
  fn invalid_env_value_is_rejected() {
    clear_env();
    std::env::set_var(ENV_WORKER_THREADS, "lots");
    let err = RuntimeConfig::from_env().unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidConfig(_)));

    std::env::set_var(ENV_WORKER_THREADS, "0");
    assert!(RuntimeConfig::from_env().is_err());
    clear_env();
  }

  #[test]
  #[serial]
  fn unknown_dispatch_mode_is_rejected() {
    clear_env();
    std::env::set_var(ENV_DISPATCH, "inline");
    assert!(matches!(RuntimeConfig::from_env(), Err(RuntimeError::InvalidConfig(_))));
    clear_env();
  }
}
