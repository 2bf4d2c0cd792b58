//! Cross-thread work submission.
//!
//! An isolate has one writer at a time. Other threads hand it closures through an
//! [`IsolateHandle`]; the owning thread runs them in submission order from
//! [`Isolate::run_pending_tasks`] (or [`Isolate::run_event_loop_turn`]).

use crate::error::DispatchError;
use crate::isolate::Isolate;
use crate::runtime::IsolateId;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

pub type Task = Box<dyn FnOnce(&mut Isolate) + Send>;

/// Called (on the submitting thread) after a task is queued, so an event loop can wake up.
pub type WakeHook = Arc<dyn Fn() + Send + Sync>;

pub(crate) struct TaskQueue {
  state: Mutex<QueueState>,
  available: Condvar,
  owner: Mutex<ThreadId>,
  wake: Mutex<Option<WakeHook>>,
}

#[derive(Default)]
struct QueueState {
  tasks: VecDeque<Task>,
  disposed: bool,
}

impl TaskQueue {
  pub(crate) fn new(owner: ThreadId) -> Self {
    Self {
      state: Mutex::new(QueueState::default()),
      available: Condvar::new(),
      owner: Mutex::new(owner),
      wake: Mutex::new(None),
    }
  }

  pub(crate) fn set_owner(&self, owner: ThreadId) {
    *self.owner.lock() = owner;
  }

  fn is_owner(&self) -> bool {
    *self.owner.lock() == thread::current().id()
  }

  fn push(&self, task: Task) -> Result<(), DispatchError> {
    {
      let mut state = self.state.lock();
      if state.disposed {
        return Err(DispatchError::Disposed);
      }
      state.tasks.push_back(task);
      tracing::trace!(queued = state.tasks.len(), "task queued");
    }
    self.available.notify_all();
    let wake = self.wake.lock().clone();
    if let Some(wake) = wake {
      wake();
    }
    Ok(())
  }

  pub(crate) fn pop(&self) -> Option<Task> {
    self.state.lock().tasks.pop_front()
  }

  pub(crate) fn len(&self) -> usize {
    self.state.lock().tasks.len()
  }

  /// Blocks until a task is queued or `timeout` elapses. Returns whether tasks are queued.
  pub(crate) fn wait(&self, timeout: Option<Duration>) -> bool {
    let mut state = self.state.lock();
    if state.tasks.is_empty() && !state.disposed {
      match timeout {
        Some(timeout) => {
          self.available.wait_for(&mut state, timeout);
        }
        None => self.available.wait(&mut state),
      }
    }
    !state.tasks.is_empty()
  }

  pub(crate) fn set_wake_hook(&self, hook: Option<WakeHook>) {
    *self.wake.lock() = hook;
  }

  /// Refuses further tasks and drops the queued ones, which wakes any blocked `sync` callers.
  pub(crate) fn dispose(&self) {
    let abandoned = {
      let mut state = self.state.lock();
      state.disposed = true;
      std::mem::take(&mut state.tasks)
    };
    if !abandoned.is_empty() {
      tracing::debug!(count = abandoned.len(), "abandoning queued tasks");
    }
    drop(abandoned);
    self.available.notify_all();
  }

  fn is_disposed(&self) -> bool {
    self.state.lock().disposed
  }
}

/// A cloneable, thread-safe way to run code on an isolate's owning thread.
#[derive(Clone)]
pub struct IsolateHandle {
  id: IsolateId,
  queue: Arc<TaskQueue>,
}

impl IsolateHandle {
  pub(crate) fn new(id: IsolateId, queue: Arc<TaskQueue>) -> Self {
    Self { id, queue }
  }

  pub fn id(&self) -> IsolateId {
    self.id
  }

  /// Queues `task` and returns immediately.
  pub fn post(&self, task: impl FnOnce(&mut Isolate) + Send + 'static) -> Result<(), DispatchError> {
    self.queue.push(Box::new(task))
  }

  /// Queues `task` and blocks until the owning thread has run it.
  ///
  /// Must not be called from the owning thread, which would wait on itself forever; that case
  /// returns [`DispatchError::OwnerThread`].
  pub fn sync<R, F>(&self, task: F) -> Result<R, DispatchError>
  where
    F: FnOnce(&mut Isolate) -> R + Send + 'static,
    R: Send + 'static,
  {
    if self.queue.is_owner() {
      return Err(DispatchError::OwnerThread);
    }
    let completion = Arc::new(Completion::default());
    let sender = CompletionSender {
      completion: Arc::clone(&completion),
      sent: false,
    };
    self.queue.push(Box::new(move |isolate: &mut Isolate| {
      let result = task(isolate);
      sender.send(result);
    }))?;
    completion.wait()
  }

  pub fn is_disposed(&self) -> bool {
    self.queue.is_disposed()
  }

  pub fn pending_tasks(&self) -> usize {
    self.queue.len()
  }
}

enum CompletionState<R> {
  Pending,
  Done(R),
  Abandoned,
}

struct Completion<R> {
  state: Mutex<CompletionState<R>>,
  done: Condvar,
}

impl<R> Default for Completion<R> {
  fn default() -> Self {
    Self {
      state: Mutex::new(CompletionState::Pending),
      done: Condvar::new(),
    }
  }
}

impl<R> Completion<R> {
  fn finish(&self, outcome: CompletionState<R>) {
    *self.state.lock() = outcome;
    self.done.notify_all();
  }

  fn wait(&self) -> Result<R, DispatchError> {
    let mut state = self.state.lock();
    loop {
      match std::mem::replace(&mut *state, CompletionState::Pending) {
        CompletionState::Done(result) => return Ok(result),
        CompletionState::Abandoned => return Err(DispatchError::Abandoned),
        CompletionState::Pending => self.done.wait(&mut state),
      }
    }
  }
}

/// Reports the task's result; dropped unsent (the task was discarded) it reports abandonment.
struct CompletionSender<R> {
  completion: Arc<Completion<R>>,
  sent: bool,
}

impl<R> CompletionSender<R> {
  fn send(mut self, result: R) {
    self.sent = true;
    self.completion.finish(CompletionState::Done(result));
  }
}

impl<R> Drop for CompletionSender<R> {
  fn drop(&mut self) {
    if !self.sent {
      self.completion.finish(CompletionState::Abandoned);
    }
  }
}

impl Isolate {
  /// A handle other threads can use to submit work to this isolate.
  pub fn handle(&self) -> IsolateHandle {
    IsolateHandle::new(self.id, Arc::clone(&self.tasks))
  }

  /// Runs queued tasks in FIFO order until the queue is empty, including tasks queued while
  /// draining. Returns the number of tasks run.
  pub fn run_pending_tasks(&mut self) -> usize {
    let mut ran = 0;
    while let Some(task) = self.tasks.pop() {
      task(self);
      ran += 1;
    }
    ran
  }

  /// Blocks the owning thread until a task is queued or `timeout` elapses.
  pub fn wait_for_tasks(&self, timeout: Option<Duration>) -> bool {
    self.tasks.wait(timeout)
  }

  pub fn set_wake_hook(&self, hook: Option<WakeHook>) {
    self.tasks.set_wake_hook(hook);
  }
}
