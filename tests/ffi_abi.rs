// tests/ffi_abi.rs

use asyncrt::ffi::*;
use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
mod common;

use common::LONG_TIMEOUT;

unsafe extern "C" fn bump(ctx: *mut c_void) {
  let counter = &*(ctx as *const AtomicUsize);
  counter.fetch_add(1, Ordering::SeqCst);
}

fn counter_ctx(counter: &'static AtomicUsize) -> *mut c_void {
  counter as *const AtomicUsize as *mut c_void
}

fn leak_counter() -> &'static AtomicUsize {
  Box::leak(Box::new(AtomicUsize::new(0)))
}

fn new_runtime() -> *mut asyncrt::AsyncRuntime {
  common::setup_tracing();
  let rt = asyncrt_runtime_new();
  assert!(!rt.is_null());
  rt
}

// --- Test: token lifecycle through the C ABI ---
#[test]
fn token_signal_and_resume() {
  let rt = new_runtime();
  let resumed = leak_counter();
  unsafe {
    let token = asyncrt_create_token(rt);
    assert!(!token.is_null());
    assert!(!asyncrt_is_token_ready(token));

    asyncrt_await_token_and_execute(token, bump, counter_ctx(resumed));
    assert_eq!(asyncrt_set_token_available(token), AsyncrtStatus::Ok);
    assert_eq!(asyncrt_set_token_available(token), AsyncrtStatus::AlreadyAvailable);
    asyncrt_await_token(token);
    assert!(asyncrt_is_token_ready(token));

    assert!(common::wait_until(LONG_TIMEOUT, || resumed.load(Ordering::SeqCst) == 1));
    asyncrt_token_drop_ref(token, 1);
    asyncrt_runtime_free(rt);
  }
}

// --- Test: value storage written by the producer is read back after the signal ---
#[test]
fn value_storage_round_trip() {
  let rt = new_runtime();
  unsafe {
    assert!(asyncrt_create_value(rt, 8, 3).is_null());

    let value = asyncrt_create_value(rt, 8, 8);
    assert!(!value.is_null());
    let storage = asyncrt_get_value_storage(value);
    assert_eq!(storage as usize % 8, 0);
    (storage as *mut u64).write(0xC0FFEE);

    asyncrt_value_add_ref(value, 1);
    assert_eq!(asyncrt_set_value_available(value), AsyncrtStatus::Ok);
    asyncrt_await_value(value);
    assert!(asyncrt_is_value_ready(value));
    assert_eq!((asyncrt_get_value_storage(value) as *const u64).read(), 0xC0FFEE);

    asyncrt_value_drop_ref(value, 2);
    asyncrt_runtime_free(rt);
  }
}

// --- Test: group ranks, readiness and resume through the C ABI ---
#[test]
fn group_collects_tokens() {
  let rt = new_runtime();
  let resumed = leak_counter();
  unsafe {
    let group = asyncrt_create_group(rt);
    let tokens: Vec<_> = (0..3).map(|_| asyncrt_create_token(rt)).collect();
    for (i, &token) in tokens.iter().enumerate() {
      let mut rank = usize::MAX;
      assert_eq!(asyncrt_add_token_to_group(group, token, &mut rank), AsyncrtStatus::Ok);
      assert_eq!(rank, i);
    }
    asyncrt_await_group_and_execute(group, bump, counter_ctx(resumed));

    asyncrt_set_token_available(tokens[0]);
    asyncrt_set_token_available(tokens[2]);
    assert!(!asyncrt_is_group_ready(group));
    asyncrt_set_token_available(tokens[1]);
    asyncrt_await_group(group);
    assert!(asyncrt_is_group_ready(group));
    assert!(common::wait_until(LONG_TIMEOUT, || resumed.load(Ordering::SeqCst) == 1));

    let late = asyncrt_create_token(rt);
    assert_eq!(
      asyncrt_add_token_to_group(group, late, ptr::null_mut()),
      AsyncrtStatus::GroupAlreadyReady
    );

    asyncrt_token_drop_ref(late, 1);
    for token in tokens {
      asyncrt_token_drop_ref(token, 1);
    }
    asyncrt_group_drop_ref(group, 1);
    asyncrt_runtime_free(rt);
  }
}

// --- Test: execute runs the resume function on a pool thread ---
#[test]
fn execute_resumes_on_pool() {
  let rt = new_runtime();
  let resumed = leak_counter();
  unsafe {
    for _ in 0..10 {
      asyncrt_execute(rt, bump, counter_ctx(resumed));
    }
    assert!(common::wait_until(LONG_TIMEOUT, || resumed.load(Ordering::SeqCst) == 10));
    asyncrt_runtime_free(rt);
  }
}

// --- Test: null pointers are rejected instead of dereferenced ---
#[test]
fn null_arguments_are_rejected() {
  unsafe {
    assert!(asyncrt_create_token(ptr::null()).is_null());
    assert!(asyncrt_create_value(ptr::null(), 8, 8).is_null());
    assert!(asyncrt_create_group(ptr::null()).is_null());
    assert_eq!(
      asyncrt_set_token_available(ptr::null_mut()),
      AsyncrtStatus::InvalidArgument
    );
    assert!(!asyncrt_is_value_ready(ptr::null_mut()));
    assert!(asyncrt_get_value_storage(ptr::null_mut()).is_null());
    assert_eq!(
      asyncrt_add_token_to_group(ptr::null_mut(), ptr::null_mut(), ptr::null_mut()),
      AsyncrtStatus::InvalidArgument
    );
    asyncrt_token_drop_ref(ptr::null_mut(), 1);
  }
}
