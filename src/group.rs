// src/group.rs

//! A conjunctive barrier over a growing set of tokens.
//!
//! A group is ready when every token added to it is ready. It owns a strong
//! reference to each member; members only point back at the group weakly, through
//! the continuation registered when they were added, so dropping the group releases
//! its members even if some of them never complete.
//!
//! Readiness is tracked two ways. `pending` counts members that were not ready when
//! added and whose completion continuation has not run yet; when it drops to zero
//! the group's own completion fires. Queries (`is_ready`, blocking `wait`) look at the
//! members directly, so they do not depend on those continuations having been
//! scheduled yet.
//!
//! Readiness never reverts. An empty group is ready but still open; as soon as a
//! group has members and all of them are ready, it is sealed and rejects new members,
//! whether or not its completion has fired yet.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::completion::{Completion, Ready};
use crate::error::RuntimeError;
use crate::executor::Executor;
use crate::refcount::{RawHandle, RuntimeObject};
use crate::token::Token;

struct GroupState {
  members: Vec<Token>,
  pending: usize,
  /// Set when `pending` reached zero after having been non-zero.
  fired: bool,
}

struct GroupInner {
  state: Mutex<GroupState>,
  completion: Completion,
}

impl GroupInner {
  /// Continuation run once per member that was pending when added.
  fn member_ready(&self) {
    let fire = {
      let mut state = self.state.lock();
      state.pending -= 1;
      if state.pending == 0 {
        state.fired = true;
        true
      } else {
        false
      }
    };
    if fire {
      tracing::trace!(group = ?(self as *const Self), "Last pending member ready, group fired");
      if let Err(e) = self.completion.set_ready() {
        tracing::warn!(error = %e, "Group completion fired twice");
      }
    }
  }

  fn all_members_ready(state: &GroupState) -> bool {
    state.pending == 0 || state.members.iter().all(Token::is_ready)
  }

  /// A non-empty group whose members are all ready can no longer grow.
  fn is_sealed(state: &GroupState) -> bool {
    state.fired || (!state.members.is_empty() && Self::all_members_ready(state))
  }
}

/// A barrier that becomes ready once every added [`Token`] is ready.
#[derive(Clone)]
pub struct Group {
  inner: Arc<GroupInner>,
}

impl Group {
  /// Creates an empty group. An empty group reports ready.
  pub fn new(executor: Arc<dyn Executor>) -> Self {
    let group = Self {
      inner: Arc::new(GroupInner {
        state: Mutex::new(GroupState {
          members: Vec::new(),
          pending: 0,
          fired: false,
        }),
        completion: Completion::new(Self::KIND, executor),
      }),
    };
    tracing::trace!(group = ?Arc::as_ptr(&group.inner), "Group created");
    group
  }

  /// Adds `token` to the group and returns its rank, the zero-based insertion index.
  ///
  /// The same token may be added several times and to several groups. A token that is
  /// already ready is recorded but never holds the group back.
  ///
  /// Fails with [`RuntimeError::GroupAlreadyReady`] once the group has members and
  /// all of them are ready. An empty group accepts members.
  pub fn add_token(&self, token: &Token) -> Result<usize, RuntimeError> {
    let (rank, pending) = {
      let mut state = self.inner.state.lock();
      if GroupInner::is_sealed(&state) {
        tracing::warn!(
          group = ?Arc::as_ptr(&self.inner),
          members = state.members.len(),
          "Token added to a group that is already ready"
        );
        return Err(RuntimeError::GroupAlreadyReady);
      }
      let rank = state.members.len();
      state.members.push(token.clone());
      let pending = !token.is_ready();
      if pending {
        state.pending += 1;
      }
      (rank, pending)
    };

    if pending {
      let group: Weak<GroupInner> = Arc::downgrade(&self.inner);
      token.on_ready(move || {
        if let Some(inner) = group.upgrade() {
          inner.member_ready();
        }
      });
    }

    tracing::trace!(group = ?Arc::as_ptr(&self.inner), rank, pending, "Token added to group");
    Ok(rank)
  }

  /// True if every current member is ready (and trivially for an empty group).
  pub fn is_ready(&self) -> bool {
    GroupInner::all_members_ready(&self.inner.state.lock())
  }

  /// Blocks the calling thread until every current member is ready.
  pub fn wait(&self) {
    for token in self.tokens() {
      token.wait();
    }
  }

  /// Runs `f` on the executor once every member is ready.
  pub fn on_ready<F>(&self, f: F)
  where
    F: FnOnce() + Send + 'static,
  {
    if self.is_ready() {
      self.inner.completion.executor().submit(Box::new(f));
    } else {
      self.inner.completion.on_ready(f);
    }
  }

  /// Resolves once every member is ready.
  pub fn ready(&self) -> Ready {
    if self.is_ready() {
      Ready::done()
    } else {
      self.inner.completion.ready()
    }
  }

  /// Member tokens in insertion order; index `i` holds the token of rank `i`.
  pub fn tokens(&self) -> Vec<Token> {
    self.inner.state.lock().members.clone()
  }

  /// Number of insertions so far.
  pub fn len(&self) -> usize {
    self.inner.state.lock().members.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Members that were not ready when added and have not been accounted for yet.
  pub fn pending(&self) -> usize {
    self.inner.state.lock().pending
  }

  /// True once the group's derived completion has fired. A fired group rejects new members.
  pub fn has_fired(&self) -> bool {
    self.inner.state.lock().fired
  }
}

impl RuntimeObject for Group {
  const KIND: &'static str = "group";

  fn into_raw(self) -> RawHandle<Self> {
    RawHandle::from_arc(self.inner)
  }

  unsafe fn from_raw(raw: RawHandle<Self>) -> Self {
    Self {
      inner: raw.into_arc::<GroupInner>(),
    }
  }

  fn ref_count(&self) -> usize {
    Arc::strong_count(&self.inner)
  }
}

impl fmt::Debug for Group {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("Group")
      .field("ptr", &Arc::as_ptr(&self.inner))
      .field("members", &state.members.len())
      .field("pending", &state.pending)
      .field("fired", &state.fired)
      .finish()
  }
}
