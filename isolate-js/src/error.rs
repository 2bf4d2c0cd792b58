/// Errors produced by the embedding API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
  /// A script-visible exception was thrown.
  ///
  /// The thrown value is recorded in the innermost active [`crate::TryCatch`] on the current
  /// thread, or becomes the thread's scheduled exception when no handler is active.
  #[error("uncaught exception")]
  Exception,

  /// A handle did not refer to a value of the expected shape (or was malformed).
  #[error("invalid handle")]
  InvalidHandle,

  /// The host engine has already collected the value backing this object.
  #[error("host value has been collected")]
  HostValueCollected,

  #[error("invalid argument: {0}")]
  InvalidArgument(&'static str),

  /// An operation expected an object, but a primitive was provided.
  #[error("value is not an object")]
  NotAnObject,

  /// Attempted to call a non-callable value.
  #[error("value is not a function")]
  NotAFunction,

  /// The operation needs an entered context and none is active on this thread.
  #[error("no context entered")]
  NoContext,

  #[error("host engine error: {0}")]
  Host(String),
}

/// Errors produced when dispatching work to the thread that owns an isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
  /// `sync` was called on the isolate's owning thread; use the isolate directly instead.
  #[error("called from the isolate's owning thread")]
  OwnerThread,

  /// The isolate was disposed before the task could be queued.
  #[error("isolate has been disposed")]
  Disposed,

  /// The isolate was disposed while the task was still queued.
  #[error("isolate was disposed before the task ran")]
  Abandoned,
}

/// Reports a broken heap invariant and aborts the current operation.
///
/// Nothing recovers from these: the heap can no longer be trusted once one fires.
macro_rules! fatal {
  ($($arg:tt)+) => {{
    ::tracing::error!($($arg)+);
    panic!($($arg)+)
  }};
}

pub(crate) use fatal;
