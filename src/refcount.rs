// src/refcount.rs

//! Reference counting for runtime objects.
//!
//! Every [`Token`](crate::Token), [`Value`](crate::Value), [`Group`](crate::Group) and
//! [`AsyncValue`](crate::AsyncValue) is a handle to shared state. From Rust, cloning a
//! handle records a new owner and dropping it releases one; the state is destroyed on
//! the release that brings the count to zero. Generated code cannot hold Rust handles,
//! so it works with [`RawHandle`]s and the explicit [`add_ref`] / [`drop_ref`] pair.

use std::ffi::c_void;
use std::fmt;
use std::marker::PhantomData;
use std::mem::ManuallyDrop;
use std::ptr::NonNull;
use std::sync::Arc;

/// A runtime object that can cross into raw-pointer land and back.
pub trait RuntimeObject: Clone + Send + Sync + 'static {
  /// Short name of the object kind, used in diagnostics.
  const KIND: &'static str;

  /// Gives up this handle's reference, returning it as a raw handle.
  fn into_raw(self) -> RawHandle<Self>;

  /// Reclaims one reference previously given up through [`into_raw`](Self::into_raw)
  /// or recorded with [`add_ref`].
  ///
  /// # Safety
  /// `raw` must come from `into_raw` on the same object type, and the caller must own
  /// the reference being reclaimed.
  unsafe fn from_raw(raw: RawHandle<Self>) -> Self;

  /// Current number of owners. Only a snapshot under concurrency.
  fn ref_count(&self) -> usize;
}

/// An owned-by-convention, type-tagged pointer to a runtime object.
///
/// Pointer-sized and `#[repr(transparent)]`, so it can be passed through the C ABI.
/// Copying a `RawHandle` does not record an owner; use [`add_ref`] for that.
#[repr(transparent)]
pub struct RawHandle<O> {
  ptr: NonNull<c_void>,
  _marker: PhantomData<fn() -> O>,
}

impl<O> RawHandle<O> {
  pub(crate) fn from_arc<T>(arc: Arc<T>) -> Self {
    // SAFETY: Arc::into_raw never returns null.
    let ptr = unsafe { NonNull::new_unchecked(Arc::into_raw(arc) as *mut c_void) };
    Self {
      ptr,
      _marker: PhantomData,
    }
  }

  /// # Safety
  /// `T` must be the type the handle was created from, and the caller must own the
  /// reference being turned back into an `Arc`.
  pub(crate) unsafe fn into_arc<T>(self) -> Arc<T> {
    Arc::from_raw(self.ptr.as_ptr() as *const T)
  }

  pub fn as_ptr(self) -> *mut c_void {
    self.ptr.as_ptr()
  }

  /// Wraps a pointer previously obtained from [`as_ptr`](Self::as_ptr).
  ///
  /// # Safety
  /// `ptr` must be null or come from `as_ptr` on a handle of the same object type.
  pub unsafe fn from_ptr(ptr: *mut c_void) -> Option<Self> {
    NonNull::new(ptr).map(|ptr| Self {
      ptr,
      _marker: PhantomData,
    })
  }
}

impl<O> Clone for RawHandle<O> {
  fn clone(&self) -> Self {
    *self
  }
}

impl<O> Copy for RawHandle<O> {}

impl<O> PartialEq for RawHandle<O> {
  fn eq(&self, other: &Self) -> bool {
    self.ptr == other.ptr
  }
}

impl<O> Eq for RawHandle<O> {}

impl<O: RuntimeObject> fmt::Debug for RawHandle<O> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_tuple("RawHandle")
      .field(&O::KIND)
      .field(&self.ptr)
      .finish()
  }
}

/// Records `count` additional owners of the object behind `raw`.
///
/// # Safety
/// The object must be live, i.e. the caller already holds at least one reference.
pub unsafe fn add_ref<O: RuntimeObject>(raw: RawHandle<O>, count: usize) {
  let obj = ManuallyDrop::new(O::from_raw(raw));
  for _ in 0..count {
    std::mem::forget(O::clone(&obj));
  }
  tracing::trace!(kind = O::KIND, count, "add_ref");
}

/// Releases `count` owners of the object behind `raw`, destroying it on the release
/// that brings the count to zero.
///
/// # Safety
/// The caller must own the `count` references being released and must not touch the
/// object afterwards unless it still holds another reference.
pub unsafe fn drop_ref<O: RuntimeObject>(raw: RawHandle<O>, count: usize) {
  tracing::trace!(kind = O::KIND, count, "drop_ref");
  for _ in 0..count {
    drop(O::from_raw(raw));
  }
}
