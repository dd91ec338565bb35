// src/value.rs

//! Completion signals that carry a payload.
//!
//! [`Value`] is the interop form: an opaque buffer whose size and alignment are chosen
//! by the caller (typically from a type descriptor emitted alongside generated code).
//! [`AsyncValue<T>`] is the typed form for Rust callers.
//!
//! Both follow the same protocol: the producer writes the payload, then signals;
//! after the signal the payload is frozen and any number of consumers may read it.

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use once_cell::sync::OnceCell;

use crate::completion::{Completion, HasCompletion, Ready};
use crate::error::RuntimeError;
use crate::executor::Executor;
use crate::refcount::{RawHandle, RuntimeObject};

/// Heap buffer with a caller-chosen layout. Zero-filled on allocation.
struct RawStorage {
  ptr: NonNull<u8>,
  layout: Layout,
}

// SAFETY: RawStorage is a plain byte buffer. Access is coordinated by the owning
// Value's completion: exclusive writes before readiness, shared reads after.
unsafe impl Send for RawStorage {}
unsafe impl Sync for RawStorage {}

impl RawStorage {
  fn allocate(size: usize, alignment: usize) -> Result<Self, RuntimeError> {
    let layout =
      Layout::from_size_align(size, alignment).map_err(|_| RuntimeError::InvalidLayout { size, alignment })?;

    let ptr = if layout.size() == 0 {
      // SAFETY: alignment is a non-zero power of two, so this is a valid, aligned,
      // dangling pointer for zero-sized access.
      unsafe { NonNull::new_unchecked(layout.align() as *mut u8) }
    } else {
      // SAFETY: layout has non-zero size.
      let raw = unsafe { alloc::alloc_zeroed(layout) };
      NonNull::new(raw).unwrap_or_else(|| alloc::handle_alloc_error(layout))
    };
    Ok(Self { ptr, layout })
  }
}

impl Drop for RawStorage {
  fn drop(&mut self) {
    if self.layout.size() != 0 {
      // SAFETY: allocated in `allocate` with this exact layout.
      unsafe { alloc::dealloc(self.ptr.as_ptr(), self.layout) };
    }
  }
}

struct ValueInner {
  completion: Completion,
  storage: RawStorage,
}

/// A single-shot completion signal with an attached, opaquely typed payload buffer.
#[derive(Clone)]
pub struct Value {
  inner: Arc<ValueInner>,
}

impl Value {
  /// Creates a not-ready value with `size` bytes of storage aligned to `alignment`.
  ///
  /// `alignment` must be a power of two and `size` rounded up to it must not
  /// overflow `isize`.
  pub fn new(size: usize, alignment: usize, executor: Arc<dyn Executor>) -> Result<Self, RuntimeError> {
    let storage = RawStorage::allocate(size, alignment)?;
    let value = Self {
      inner: Arc::new(ValueInner {
        completion: Completion::new(Self::KIND, executor),
        storage,
      }),
    };
    tracing::trace!(value = ?Arc::as_ptr(&value.inner), size, alignment, "Value created");
    Ok(value)
  }

  /// Address of the payload buffer. Stable for the lifetime of the value.
  ///
  /// Writing through it is only defined before [`set_available`](Self::set_available),
  /// reading only after.
  pub fn storage(&self) -> NonNull<u8> {
    self.inner.storage.ptr
  }

  pub fn size(&self) -> usize {
    self.inner.storage.layout.size()
  }

  pub fn alignment(&self) -> usize {
    self.inner.storage.layout.align()
  }

  /// Mutable view of the payload buffer for the producer.
  ///
  /// # Safety
  /// The value must not be available yet, and the caller must be its only writer
  /// and hold no other view of the buffer for the lifetime of the returned slice.
  #[allow(clippy::mut_from_ref)]
  pub unsafe fn storage_mut(&self) -> &mut [u8] {
    std::slice::from_raw_parts_mut(self.inner.storage.ptr.as_ptr(), self.size())
  }

  /// The frozen payload, once the value is available.
  pub fn bytes(&self) -> Option<&[u8]> {
    if !self.is_ready() {
      return None;
    }
    // SAFETY: after readiness the buffer is never written again.
    Some(unsafe { std::slice::from_raw_parts(self.inner.storage.ptr.as_ptr(), self.size()) })
  }

  pub fn is_ready(&self) -> bool {
    self.inner.completion.is_ready()
  }

  /// Freezes the payload and schedules all registered continuations.
  pub fn set_available(&self) -> Result<(), RuntimeError> {
    self.inner.completion.set_ready()
  }

  /// Blocks the calling thread until the value is available.
  pub fn wait(&self) {
    self.inner.completion.wait()
  }

  /// Runs `f` on the executor once the value is available.
  pub fn on_ready<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.inner.completion.on_ready(f)
  }

  /// Resolves once the value is available.
  pub fn ready(&self) -> Ready {
    self.inner.completion.ready()
  }

  /// The underlying completion primitive.
  pub fn completion(&self) -> &Completion {
    &self.inner.completion
  }
}

impl HasCompletion for Value {
  fn completion(&self) -> &Completion {
    Value::completion(self)
  }
}

impl RuntimeObject for Value {
  const KIND: &'static str = "value";

  fn into_raw(self) -> RawHandle<Self> {
    RawHandle::from_arc(self.inner)
  }

  unsafe fn from_raw(raw: RawHandle<Self>) -> Self {
    Self {
      inner: raw.into_arc::<ValueInner>(),
    }
  }

  fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }
}

impl fmt::Debug for Value {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Value")
      .field("ptr", &Arc::as_ptr(&self.inner))
      .field("size", &self.size())
      .field("alignment", &self.alignment())
      .field("ready", &self.is_ready())
      .finish()
  }
}

struct AsyncValueInner<T> {
  completion: Completion,
  payload: OnceCell<T>,
}

/// A typed single-shot value: written and signaled in one step by [`set`](Self::set).
pub struct AsyncValue<T> {
  inner: Arc<AsyncValueInner<T>>,
}

impl<T> Clone for AsyncValue<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Send + Sync + 'static> AsyncValue<T> {
  pub fn new(executor: Arc<dyn Executor>) -> Self {
    Self {
      inner: Arc::new(AsyncValueInner {
        completion: Completion::new(Self::KIND, executor),
        payload: OnceCell::new(),
      }),
    }
  }

  /// Stores the payload and makes the value available.
  ///
  /// Fails with [`RuntimeError::AlreadyAvailable`] if a payload was already set;
  /// the rejected payload is dropped.
  pub fn set(&self, value: T) -> Result<(), RuntimeError> {
    if self.inner.payload.set(value).is_err() {
      tracing::warn!("AsyncValue::set called on a value that is already available");
      return Err(RuntimeError::AlreadyAvailable(Self::KIND));
    }
    self.inner.completion.set_ready()
  }

  /// The payload, once available.
  pub fn get(&self) -> Option<&T> {
    if self.is_ready() {
      self.inner.payload.get()
    } else {
      None
    }
  }

  /// Blocks the calling thread until available, then returns the payload.
  pub fn wait(&self) -> &T {
    self.inner.completion.wait();
    self.inner.payload.wait()
  }

  pub fn is_ready(&self) -> bool {
    self.inner.completion.is_ready()
  }

  /// Runs `f` on the executor once the value is available.
  pub fn on_ready<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    self.inner.completion.on_ready(f)
  }

  /// Resolves once the value is available.
  pub fn ready(&self) -> Ready {
    self.inner.completion.ready()
  }

  pub fn completion(&self) -> &Completion {
    &self.inner.completion
  }
}

impl<T: Send + Sync + 'static> HasCompletion for AsyncValue<T> {
  fn completion(&self) -> &Completion {
    AsyncValue::completion(self)
  }
}

impl<T: Send + Sync + 'static> RuntimeObject for AsyncValue<T> {
  const KIND: &'static str = "async value";

  fn into_raw(self) -> RawHandle<Self> {
    RawHandle::from_arc(self.inner)
  }

  unsafe fn from_raw(raw: RawHandle<Self>) -> Self {
    Self {
      inner: raw.into_arc::<AsyncValueInner<T>>(),
    }
  }

  fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }
}

impl<T: fmt::Debug + Send + Sync + 'static> fmt::Debug for AsyncValue<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("AsyncValue")
      .field("ptr", &Arc::as_ptr(&self.inner))
      .field("payload", &self.get())
      .finish()
  }
}
