// src/error.rs

use std::io;
use thiserror::Error;

/// Errors reported by the async runtime.
///
/// Most misuse of the completion primitives (double signal, adding to a group that
/// already fired, impossible value layouts) is cheap to detect and is surfaced here
/// instead of being left undefined. Allocation failure is not represented: it aborts.
#[derive(Error, Debug)]
#[non_exhaustive] // Allows adding more variants later without breaking change
pub enum RuntimeError {
  // --- Signaling Errors ---
  #[error("{0} is already available")]
  AlreadyAvailable(&'static str), // Second set_available on a single-shot object

  #[error("Group already fired; new members cannot reopen it")]
  GroupAlreadyReady,

  // --- Allocation Parameters ---
  #[error("Invalid value layout: size {size}, alignment {alignment}")]
  InvalidLayout { size: usize, alignment: usize },

  // --- Configuration ---
  #[error("Invalid configuration: {0}")]
  InvalidConfig(String),

  // --- Executor Errors ---
  #[error("I/O error: {0}")]
  Io(#[from] io::Error), // Thread pool construction failures

  #[error("No executor available: {0}")]
  NoExecutor(String),
}
