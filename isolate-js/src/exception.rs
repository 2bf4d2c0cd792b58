//! Exception propagation.
//!
//! A script exception never unwinds Rust frames. The operation that raised it returns
//! [`Error::Exception`] and the thrown value is recorded on the current thread: in the innermost
//! open [`TryCatch`] if there is one, otherwise as the thread's scheduled exception.

use crate::host::{HostType, HostValue};
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::source::{format_stack_trace, parse_host_stack, StackFrame};
use crate::tagged::{Tagged, TaggedWord};
use crate::value::Local;
use crate::Error;
use core::ops::{Deref, DerefMut};

/// Description of a thrown value: its string conversion and the host's stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionMessage {
  pub message: String,
  pub frames: Vec<StackFrame>,
}

impl ExceptionMessage {
  pub fn stack_trace(&self) -> String {
    format_stack_trace(&self.frames)
  }

  /// Source name of the innermost frame.
  pub fn script_name(&self) -> Option<&str> {
    self.frames.first().map(|frame| frame.source.as_ref())
  }

  pub fn line_number(&self) -> Option<u32> {
    self.frames.first().map(|frame| frame.line)
  }
}

/// Called with every uncaught exception, and with exceptions caught by a verbose [`TryCatch`].
pub type MessageListener = Box<dyn FnMut(&ExceptionMessage) + Send>;

pub(crate) struct TryCatchFrame {
  pub(crate) exception: Option<TaggedWord>,
  message: Option<ExceptionMessage>,
  verbose: bool,
  rethrow: bool,
}

impl Isolate {
  /// Records a host exception and returns the error for the failed operation.
  pub(crate) fn throw_host_exception(&mut self, exception: HostValue) -> Error {
    let value = self.wrap_host(exception);
    let message = self.describe_exception(Some(exception));
    self.throw_tagged(value, message)
  }

  fn describe_exception(&mut self, exception: Option<HostValue>) -> ExceptionMessage {
    let Some(exception) = exception else {
      return ExceptionMessage {
        message: "Uncaught exception".to_string(),
        frames: Vec::new(),
      };
    };
    let message = match self.host.type_of(exception) {
      HostType::String => self.host.string_value(exception),
      HostType::Object | HostType::Function => match self.current_host_context() {
        // A throwing conversion would only replace one exception with another.
        Ok(context) => self.host.to_string(context, exception).ok(),
        Err(_) => None,
      },
      HostType::Symbol => Some("Symbol()".to_string()),
      _ => self.host.string_value(exception).or_else(|| {
        let number = self.host.to_number(exception);
        Some(crate::value::number_to_string(number))
      }),
    };
    let frames = self
      .host
      .exception_stack(exception)
      .map(|stack| parse_host_stack(&stack))
      .unwrap_or_default();
    ExceptionMessage {
      message: message.unwrap_or_else(|| "Uncaught exception".to_string()),
      frames,
    }
  }

  fn throw_tagged(&mut self, value: Tagged, mut message: ExceptionMessage) -> Error {
    let capture_uncaught = self.options.capture_stack_trace_for_uncaught_exceptions;
    let thread = self.thread();
    let notify = match thread.try_catches.last_mut() {
      Some(frame) => {
        frame.exception = Some(value.encode());
        frame.message = Some(message.clone());
        frame.verbose
      }
      None => {
        if thread.scheduled_exception.is_some() {
          tracing::debug!("scheduled exception replaced");
        }
        thread.scheduled_exception = Some(value.encode());
        if !capture_uncaught {
          message.frames.clear();
        }
        true
      }
    };
    if notify {
      self.notify_message_listeners(&message);
    }
    Error::Exception
  }

  fn notify_message_listeners(&mut self, message: &ExceptionMessage) {
    for listener in &mut self.message_listeners {
      listener(message);
    }
  }

  pub fn add_message_listener(&mut self, listener: impl FnMut(&ExceptionMessage) + Send + 'static) {
    self.message_listeners.push(Box::new(listener));
  }

  pub fn has_scheduled_exception(&self) -> bool {
    self
      .thread_ref()
      .is_some_and(|thread| thread.scheduled_exception.is_some())
  }
}

impl<'i> HandleScope<'i> {
  /// Throws `value` as if script had thrown it. Returns the error to propagate.
  pub fn throw_exception(&mut self, value: Local<'_>) -> Error {
    let host = self.isolate.to_host(value.tagged()).ok();
    let message = self.isolate.describe_exception(host);
    self.isolate.throw_tagged(value.tagged(), message)
  }

  /// Takes the exception that escaped every `TryCatch` on this thread, if any.
  pub fn take_scheduled_exception(&mut self) -> Option<Local<'i>> {
    let word = self.isolate.thread().scheduled_exception.take()?;
    let value = word.decode()?;
    Some(self.local(value))
  }

  /// Opens a nested scope that catches exceptions raised inside it.
  pub fn try_catch(&mut self) -> TryCatch<'_> {
    let mut scope = self.reborrow();
    let thread = scope.isolate.thread();
    thread.try_catches.push(TryCatchFrame {
      exception: None,
      message: None,
      verbose: false,
      rethrow: false,
    });
    let index = thread.try_catches.len() - 1;
    TryCatch { scope, index }
  }
}

/// A handle scope that catches exceptions raised while it is the innermost one.
pub struct TryCatch<'a> {
  scope: HandleScope<'a>,
  index: usize,
}

impl<'a> TryCatch<'a> {
  fn frame(&mut self) -> &mut TryCatchFrame {
    let index = self.index;
    &mut self.scope.isolate.thread().try_catches[index]
  }

  pub fn has_caught(&mut self) -> bool {
    self.frame().exception.is_some()
  }

  pub fn exception(&mut self) -> Option<Local<'a>> {
    let value = self.frame().exception?.decode()?;
    Some(self.scope.local(value))
  }

  pub fn message(&mut self) -> Option<ExceptionMessage> {
    self.frame().message.clone()
  }

  pub fn stack_trace(&mut self) -> Option<String> {
    self.frame().message.as_ref().map(ExceptionMessage::stack_trace)
  }

  /// Forgets the caught exception.
  pub fn reset(&mut self) {
    let frame = self.frame();
    frame.exception = None;
    frame.message = None;
    frame.rethrow = false;
  }

  /// Also reports caught exceptions to message listeners.
  pub fn set_verbose(&mut self, verbose: bool) {
    self.frame().verbose = verbose;
  }

  pub fn is_verbose(&mut self) -> bool {
    self.frame().verbose
  }

  /// Passes the caught exception on to the enclosing handler when this scope closes.
  pub fn rethrow(&mut self) -> Error {
    self.frame().rethrow = true;
    Error::Exception
  }
}

impl Drop for TryCatch<'_> {
  fn drop(&mut self) {
    let index = self.index;
    let isolate = &mut *self.scope.isolate;
    let thread = isolate.thread();
    debug_assert_eq!(thread.try_catches.len(), index + 1);
    let Some(frame) = thread.try_catches.pop() else {
      return;
    };
    if !frame.rethrow {
      return;
    }
    if let (Some(value), Some(message)) = (frame.exception.and_then(TaggedWord::decode), frame.message) {
      isolate.throw_tagged(value, message);
    }
  }
}

impl<'a> Deref for TryCatch<'a> {
  type Target = HandleScope<'a>;

  fn deref(&self) -> &HandleScope<'a> {
    &self.scope
  }
}

impl<'a> DerefMut for TryCatch<'a> {
  fn deref_mut(&mut self) -> &mut HandleScope<'a> {
    &mut self.scope
  }
}
