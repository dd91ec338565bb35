// src/ffi.rs

//! C ABI for compiler-generated code.
//!
//! Generated code holds runtime objects as opaque pointers and manages their lifetime
//! with explicit `add_ref` / `drop_ref` calls. Every creation function hands out one
//! reference owned by the caller. The runtime pointer is always passed explicitly;
//! there is no process-wide runtime.
//!
//! Non-blocking awaits take a resume function and an opaque context pointer, which
//! is how coroutine-lowered code resumes: the pair is invoked once, on an executor
//! thread, after the awaited object is ready.

use std::ffi::c_void;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::error::RuntimeError;
use crate::group::Group;
use crate::refcount::{self, RawHandle, RuntimeObject};
use crate::runtime::AsyncRuntime;
use crate::token::Token;
use crate::value::Value;

/// Resume callback invoked with the context pointer passed at registration.
pub type ResumeFn = unsafe extern "C" fn(*mut c_void);

/// Status codes returned across the ABI.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AsyncrtStatus {
  Ok = 0,
  AlreadyAvailable = 1,
  GroupAlreadyReady = 2,
  InvalidArgument = 3,
}

impl From<&RuntimeError> for AsyncrtStatus {
  fn from(e: &RuntimeError) -> Self {
    match e {
      RuntimeError::AlreadyAvailable(_) => AsyncrtStatus::AlreadyAvailable,
      RuntimeError::GroupAlreadyReady => AsyncrtStatus::GroupAlreadyReady,
      _ => AsyncrtStatus::InvalidArgument,
    }
  }
}

fn status(result: Result<(), RuntimeError>) -> AsyncrtStatus {
  match result {
    Ok(()) => AsyncrtStatus::Ok,
    Err(e) => AsyncrtStatus::from(&e),
  }
}

/// Opaque context pointer carried to an executor thread.
struct ResumeContext(*mut c_void);

// SAFETY: the context is owned by generated code, which guarantees it may be resumed
// from any thread.
unsafe impl Send for ResumeContext {}

impl ResumeContext {
  fn into_inner(self) -> *mut c_void {
    self.0
  }
}

fn resume_later(resume: ResumeFn, ctx: *mut c_void) -> impl FnOnce() + Send + 'static {
  let ctx = ResumeContext(ctx);
  move || {
    // SAFETY: the registrant promised `resume(ctx)` is valid to call once.
    unsafe { resume(ctx.into_inner()) }
  }
}

/// Borrows the object behind `ptr` without touching its reference count.
unsafe fn borrow<O: RuntimeObject>(ptr: *mut c_void) -> Option<ManuallyDrop<O>> {
  let raw = RawHandle::<O>::from_ptr(ptr)?;
  Some(ManuallyDrop::new(O::from_raw(raw)))
}

fn into_ptr<O: RuntimeObject>(obj: O) -> *mut c_void {
  obj.into_raw().as_ptr()
}

fn null_argument(what: &'static str) {
  tracing::warn!(argument = what, "Null pointer passed across the asyncrt ABI");
}

// --- Runtime ---

/// Creates a runtime with its own thread pool, configured from `ASYNCRT_*` variables.
/// Returns null if the pool cannot be built.
#[no_mangle]
pub extern "C" fn asyncrt_runtime_new() -> *mut AsyncRuntime {
  match AsyncRuntime::from_env() {
    Ok(rt) => Box::into_raw(Box::new(rt)),
    Err(e) => {
      tracing::error!(error = %e, "Failed to create AsyncRuntime");
      ptr::null_mut()
    }
  }
}

/// Releases a runtime created by [`asyncrt_runtime_new`].
///
/// # Safety
/// `rt` must come from `asyncrt_runtime_new` and must not be used afterwards.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_runtime_free(rt: *mut AsyncRuntime) {
  if !rt.is_null() {
    drop(Box::from_raw(rt));
  }
}

/// Submits `resume(ctx)` to the runtime's executor.
///
/// # Safety
/// `rt` must be a live runtime; `resume(ctx)` must be valid to call once from any thread.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_execute(rt: *const AsyncRuntime, resume: ResumeFn, ctx: *mut c_void) {
  match rt.as_ref() {
    Some(rt) => rt.execute(resume_later(resume, ctx)),
    None => null_argument("runtime"),
  }
}

// --- Tokens ---

/// Creates a not-ready token. Returns null if `rt` is null.
///
/// # Safety
/// `rt` must be null or a live runtime.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_create_token(rt: *const AsyncRuntime) -> *mut c_void {
  match rt.as_ref() {
    Some(rt) => into_ptr(rt.create_token()),
    None => {
      null_argument("runtime");
      ptr::null_mut()
    }
  }
}

/// # Safety
/// `token` must be null or a live token.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_set_token_available(token: *mut c_void) -> AsyncrtStatus {
  match borrow::<Token>(token) {
    Some(token) => status(token.set_available()),
    None => AsyncrtStatus::InvalidArgument,
  }
}

/// # Safety
/// `token` must be null or a live token.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_is_token_ready(token: *mut c_void) -> bool {
  borrow::<Token>(token).is_some_and(|token| token.is_ready())
}

/// Blocks the calling thread until the token is ready.
///
/// # Safety
/// `token` must be null or a live token.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_token(token: *mut c_void) {
  match borrow::<Token>(token) {
    Some(token) => token.wait(),
    None => null_argument("token"),
  }
}

/// Schedules `resume(ctx)` on the executor once the token is ready.
///
/// # Safety
/// `token` must be null or a live token; `resume(ctx)` must be valid to call once
/// from any thread.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_token_and_execute(token: *mut c_void, resume: ResumeFn, ctx: *mut c_void) {
  match borrow::<Token>(token) {
    Some(token) => token.on_ready(resume_later(resume, ctx)),
    None => null_argument("token"),
  }
}

// --- Values ---

/// Creates a not-ready value with `size` bytes of storage aligned to `alignment`.
/// Returns null if `rt` is null or the layout is invalid.
///
/// # Safety
/// `rt` must be null or a live runtime.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_create_value(rt: *const AsyncRuntime, size: usize, alignment: usize) -> *mut c_void {
  let Some(rt) = rt.as_ref() else {
    null_argument("runtime");
    return ptr::null_mut();
  };
  match rt.create_value(size, alignment) {
    Ok(value) => into_ptr(value),
    Err(e) => {
      tracing::warn!(error = %e, "asyncrt_create_value rejected layout");
      ptr::null_mut()
    }
  }
}

/// Returns the value's payload storage, or null if `value` is null.
///
/// # Safety
/// `value` must be null or a live value.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_get_value_storage(value: *mut c_void) -> *mut u8 {
  borrow::<Value>(value).map_or(ptr::null_mut(), |value| value.storage().as_ptr())
}

/// # Safety
/// `value` must be null or a live value.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_set_value_available(value: *mut c_void) -> AsyncrtStatus {
  match borrow::<Value>(value) {
    Some(value) => status(value.set_available()),
    None => AsyncrtStatus::InvalidArgument,
  }
}

/// # Safety
/// `value` must be null or a live value.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_is_value_ready(value: *mut c_void) -> bool {
  borrow::<Value>(value).is_some_and(|value| value.is_ready())
}

/// Blocks the calling thread until the value is available.
///
/// # Safety
/// `value` must be null or a live value.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_value(value: *mut c_void) {
  match borrow::<Value>(value) {
    Some(value) => value.wait(),
    None => null_argument("value"),
  }
}

/// Schedules `resume(ctx)` on the executor once the value is available.
///
/// # Safety
/// `value` must be null or a live value; `resume(ctx)` must be valid to call once
/// from any thread.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_value_and_execute(value: *mut c_void, resume: ResumeFn, ctx: *mut c_void) {
  match borrow::<Value>(value) {
    Some(value) => value.on_ready(resume_later(resume, ctx)),
    None => null_argument("value"),
  }
}

// --- Groups ---

/// Creates an empty group. Returns null if `rt` is null.
///
/// # Safety
/// `rt` must be null or a live runtime.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_create_group(rt: *const AsyncRuntime) -> *mut c_void {
  match rt.as_ref() {
    Some(rt) => into_ptr(rt.create_group()),
    None => {
      null_argument("runtime");
      ptr::null_mut()
    }
  }
}

/// Adds `token` to `group`, writing its rank to `rank_out` when that is non-null.
///
/// # Safety
/// `group` and `token` must be null or live objects of their kind; `rank_out` must be
/// null or valid for a write.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_add_token_to_group(
  group: *mut c_void,
  token: *mut c_void,
  rank_out: *mut usize,
) -> AsyncrtStatus {
  let (Some(group), Some(token)) = (borrow::<Group>(group), borrow::<Token>(token)) else {
    return AsyncrtStatus::InvalidArgument;
  };
  match group.add_token(&token) {
    Ok(rank) => {
      if !rank_out.is_null() {
        rank_out.write(rank);
      }
      AsyncrtStatus::Ok
    }
    Err(e) => AsyncrtStatus::from(&e),
  }
}

/// # Safety
/// `group` must be null or a live group.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_is_group_ready(group: *mut c_void) -> bool {
  borrow::<Group>(group).is_some_and(|group| group.is_ready())
}

/// Blocks the calling thread until every token in the group is ready.
///
/// # Safety
/// `group` must be null or a live group.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_group(group: *mut c_void) {
  match borrow::<Group>(group) {
    Some(group) => group.wait(),
    None => null_argument("group"),
  }
}

/// Schedules `resume(ctx)` on the executor once every token in the group is ready.
///
/// # Safety
/// `group` must be null or a live group; `resume(ctx)` must be valid to call once
/// from any thread.
#[no_mangle]
pub unsafe extern "C" fn asyncrt_await_group_and_execute(group: *mut c_void, resume: ResumeFn, ctx: *mut c_void) {
  match borrow::<Group>(group) {
    Some(group) => group.on_ready(resume_later(resume, ctx)),
    None => null_argument("group"),
  }
}

// --- Reference counting ---

macro_rules! refcount_abi {
  ($ty:ty, $add:ident, $drop:ident) => {
    /// Records `count` additional owners.
    ///
    /// # Safety
    /// `obj` must be null or a live object of this kind.
    #[no_mangle]
    pub unsafe extern "C" fn $add(obj: *mut c_void, count: usize) {
      if let Some(raw) = RawHandle::<$ty>::from_ptr(obj) {
        refcount::add_ref(raw, count);
      }
    }

    /// Releases `count` owners, destroying the object on the last release.
    ///
    /// # Safety
    /// `obj` must be null or a live object of this kind, and the caller must own the
    /// `count` references being released.
    #[no_mangle]
    pub unsafe extern "C" fn $drop(obj: *mut c_void, count: usize) {
      if let Some(raw) = RawHandle::<$ty>::from_ptr(obj) {
        refcount::drop_ref(raw, count);
      }
    }
  };
}

refcount_abi!(Token, asyncrt_token_add_ref, asyncrt_token_drop_ref);
refcount_abi!(Value, asyncrt_value_add_ref, asyncrt_value_drop_ref);
refcount_abi!(Group, asyncrt_group_add_ref, asyncrt_group_drop_ref);
