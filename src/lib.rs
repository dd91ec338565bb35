// src/lib.rs

//! asyncrt - A reference-counted async completion runtime for compiler-generated code.
//!
//! The runtime exposes three kinds of objects, all single-shot completion signals:
//! a [`Token`] carries no payload, a [`Value`] carries an opaquely typed payload
//! buffer, and a [`Group`] completes once every token added to it has completed.
//! Work and continuations run on an [`Executor`], by default a Tokio thread pool.
//!
//! ```
//! use asyncrt::{AsyncRuntime, RuntimeConfig};
//!
//! let rt = AsyncRuntime::with_config(RuntimeConfig::default()).unwrap();
//! let token = rt.create_token();
//! let producer = rt.clone();
//! let signal = token.clone();
//! rt.execute(move || producer.set_token_available(&signal).unwrap());
//! rt.await_token(&token);
//! assert!(token.is_ready());
//! ```

/// The single-shot completion primitive shared by all runtime objects.
pub mod completion;
/// Runtime configuration and environment overrides.
pub mod config;
/// Defines the error type used throughout the library.
pub mod error;
/// The executor abstraction and its Tokio-backed implementation.
pub mod executor;
/// C ABI entry points for generated code.
#[cfg(feature = "ffi")]
pub mod ffi;
/// Groups of tokens that complete together.
pub mod group;
/// Raw handles and explicit reference counting.
pub mod refcount;
/// The runtime facade.
pub mod runtime;
/// Payload-less completion signals.
pub mod token;
/// Completion signals with a payload.
pub mod value;

#[cfg(test)]
mod test_util;

pub use completion::{Completion, HasCompletion, Ready};
pub use config::{DispatchMode, RuntimeConfig};
pub use error::RuntimeError;
pub use executor::{Executor, TokioExecutor, Work};
pub use group::Group;
pub use refcount::{add_ref, drop_ref, RawHandle, RuntimeObject};
pub use runtime::AsyncRuntime;
pub use token::Token;
pub use value::{AsyncValue, Value};

// --- Top-Level Library Information Functions ---

const VERSION_MAJOR: i32 = 0;
const VERSION_MINOR: i32 = 1;
const VERSION_PATCH: i32 = 0;

/// Returns the library version as a tuple (major, minor, patch).
///
/// # Examples
///
/// ```
/// let (major, minor, patch) = asyncrt::version();
/// println!("asyncrt version: {}.{}.{}", major, minor, patch);
/// ```
pub fn version() -> (i32, i32, i32) {
  (VERSION_MAJOR, VERSION_MINOR, VERSION_PATCH)
}
