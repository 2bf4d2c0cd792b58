//! The seam to the engine that actually parses and runs scripts.
//!
//! The isolate never looks inside host values; it only holds their ids, asks the host to convert
//! or operate on them, and keeps them alive with [`HostEngine::protect`]. A host exception is
//! reported as `Err(value)` carrying the thrown value.

mod local;

pub use local::{LocalHost, NativeFunction};

use core::any::Any;
use core::fmt;
use core::num::NonZeroU64;

/// Opaque id of a value owned by the host engine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HostValue(NonZeroU64);

impl HostValue {
  pub fn from_raw(raw: u64) -> Option<Self> {
    NonZeroU64::new(raw).map(Self)
  }

  #[inline]
  pub fn raw(self) -> u64 {
    self.0.get()
  }
}

impl fmt::Debug for HostValue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "HostValue({})", self.0)
  }
}

/// Opaque id of a host execution scope.
///
/// Ids must be unique across every host engine instance in the process, since the runtime maps
/// them back to the isolate that owns them.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HostContext(NonZeroU64);

impl HostContext {
  pub fn from_raw(raw: u64) -> Option<Self> {
    NonZeroU64::new(raw).map(Self)
  }

  #[inline]
  pub fn raw(self) -> u64 {
    self.0.get()
  }
}

impl fmt::Debug for HostContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "HostContext({})", self.0)
  }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum HostType {
  Undefined,
  Null,
  Boolean,
  Number,
  String,
  Symbol,
  Object,
  Function,
}

/// `Err` carries the value the host threw.
pub type HostResult<T> = Result<T, HostValue>;

pub trait HostEngine: Send {
  fn create_context(&mut self) -> HostContext;
  fn context_global(&mut self, context: HostContext) -> HostValue;
  fn release_context(&mut self, context: HostContext);

  fn undefined(&mut self) -> HostValue;
  fn null(&mut self) -> HostValue;
  fn boolean(&mut self, value: bool) -> HostValue;
  fn number(&mut self, value: f64) -> HostValue;
  fn string(&mut self, value: &str) -> HostValue;
  fn new_object(&mut self, context: HostContext) -> HostValue;

  fn type_of(&self, value: HostValue) -> HostType;
  fn to_boolean(&self, value: HostValue) -> bool;
  /// Primitive conversion; objects convert to `NaN`.
  fn to_number(&self, value: HostValue) -> f64;
  /// The contents of a primitive string, without running any script.
  fn string_value(&self, value: HostValue) -> Option<String>;
  /// Script-visible string conversion, which may throw.
  fn to_string(&mut self, context: HostContext, value: HostValue) -> HostResult<String>;
  fn strict_equals(&self, a: HostValue, b: HostValue) -> bool;

  fn get(&mut self, context: HostContext, object: HostValue, key: &str) -> HostResult<HostValue>;
  fn set(
    &mut self,
    context: HostContext,
    object: HostValue,
    key: &str,
    value: HostValue,
  ) -> HostResult<()>;
  fn delete(&mut self, context: HostContext, object: HostValue, key: &str) -> HostResult<bool>;
  fn own_keys(&mut self, context: HostContext, object: HostValue) -> HostResult<Vec<String>>;
  fn call(
    &mut self,
    context: HostContext,
    function: HostValue,
    this: HostValue,
    args: &[HostValue],
  ) -> HostResult<HostValue>;
  fn construct(
    &mut self,
    context: HostContext,
    function: HostValue,
    args: &[HostValue],
  ) -> HostResult<HostValue>;

  /// Parses without running. Syntax errors are thrown like any other exception.
  fn check_syntax(&mut self, context: HostContext, source: &str, name: &str) -> HostResult<()>;
  fn evaluate(&mut self, context: HostContext, source: &str, name: &str) -> HostResult<HostValue>;
  /// The host's own stack string for a thrown value, if it recorded one.
  fn exception_stack(&mut self, exception: HostValue) -> Option<String>;

  /// Keeps `value` alive until a matching `unprotect`. Calls nest.
  fn protect(&mut self, value: HostValue);
  fn unprotect(&mut self, value: HostValue);

  /// Requests that `value` be reported from [`HostEngine::take_finalized`] once collected.
  fn register_finalizer(&mut self, value: HostValue);
  fn unregister_finalizer(&mut self, value: HostValue);
  /// Drains the values collected since the last call.
  fn take_finalized(&mut self) -> Vec<HostValue>;

  /// Runs the host's own collector, if it has one that can be driven. Returns freed values.
  fn collect_garbage(&mut self) -> usize {
    0
  }

  fn dispose(&mut self) {}

  fn as_any(&self) -> &dyn Any;
  fn as_any_mut(&mut self) -> &mut dyn Any;
}
