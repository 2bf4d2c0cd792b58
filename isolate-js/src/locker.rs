use crate::dispatch::IsolateHandle;
use crate::isolate::Isolate;
use parking_lot::{Mutex, MutexGuard};
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// An isolate that several threads take turns using.
///
/// Only the thread holding a [`Locker`] may touch the isolate. Each thread that locks it gets its
/// own handle stack, try/catch stack and entered contexts, which stay rooted while the thread is
/// away.
#[derive(Clone)]
pub struct SharedIsolate {
  inner: Arc<Mutex<Isolate>>,
  handle: IsolateHandle,
}

impl SharedIsolate {
  pub fn new(isolate: Isolate) -> Self {
    let handle = isolate.handle();
    Self {
      inner: Arc::new(Mutex::new(isolate)),
      handle,
    }
  }

  /// Blocks until the isolate is free, then enters it on the calling thread.
  pub fn lock(&self) -> Locker<'_> {
    Locker::enter(self.inner.lock())
  }

  pub fn try_lock(&self) -> Option<Locker<'_>> {
    self.inner.try_lock().map(Locker::enter)
  }

  pub fn is_locked(&self) -> bool {
    self.inner.is_locked()
  }

  /// Dispatch handle for the isolate; works without holding the lock.
  pub fn handle(&self) -> IsolateHandle {
    self.handle.clone()
  }
}

/// Exclusive access to a [`SharedIsolate`] for the calling thread.
pub struct Locker<'a> {
  guard: MutexGuard<'a, Isolate>,
}

impl<'a> Locker<'a> {
  fn enter(mut guard: MutexGuard<'a, Isolate>) -> Self {
    guard.enter_current_thread();
    Self { guard }
  }

  /// Releases the isolate while `f` runs, then takes it back.
  ///
  /// The locker is mutably borrowed for the duration, so nothing on this thread can reach the
  /// isolate while another thread may hold it.
  pub fn unlocked<R>(&mut self, f: impl FnOnce() -> R) -> R {
    tracing::trace!(isolate = self.guard.id.0, "isolate unlocked");
    let result = MutexGuard::unlocked(&mut self.guard, f);
    self.guard.enter_current_thread();
    result
  }
}

impl Deref for Locker<'_> {
  type Target = Isolate;

  fn deref(&self) -> &Isolate {
    &self.guard
  }
}

impl DerefMut for Locker<'_> {
  fn deref_mut(&mut self) -> &mut Isolate {
    &mut self.guard
  }
}
