use crate::error::fatal;
use crate::heap::object::string;
use crate::heap::{InstanceKind, OddballKind};
use crate::host::{HostType, HostValue};
use crate::isolate::Isolate;
use crate::tagged::{HeapRef, Tagged, TaggedWord};
use crate::Error;
use core::fmt;
use core::marker::PhantomData;

/// A reference rooted in a handle scope.
///
/// `'s` ties the handle to the scope that rooted it: once that scope is dropped the referenced
/// object may be collected. Locals are plain tagged words; two locals referring to the same heap
/// object compare equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Local<'s> {
  word: TaggedWord,
  _scope: PhantomData<&'s ()>,
}

impl<'s> Local<'s> {
  #[inline]
  pub(crate) fn from_tagged(value: Tagged) -> Self {
    Self {
      word: value.encode(),
      _scope: PhantomData,
    }
  }

  #[inline]
  pub fn word(self) -> TaggedWord {
    self.word
  }

  pub fn tagged(self) -> Tagged {
    match self.word.decode() {
      Some(value) => value,
      None => fatal!("local handle holds malformed word {:?}", self.word),
    }
  }

  #[inline]
  pub fn is_smi(self) -> bool {
    self.word.is_smi()
  }

  pub fn as_smi(self) -> Option<i32> {
    self.tagged().as_smi()
  }

  pub(crate) fn heap_ref(self) -> Option<HeapRef> {
    self.tagged().as_heap()
  }
}

impl fmt::Debug for Local<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "Local({:?})", self.word)
  }
}

/// What a value looks like to script.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ValueKind {
  Undefined,
  Null,
  Boolean,
  /// Smis and heap numbers.
  Number,
  String,
  /// Any host object, function or symbol, reached through a bridge.
  Object,
  Context,
  Script,
  FixedArray,
}

/// Formats a number the way script's `String(n)` does for the common cases.
pub fn number_to_string(value: f64) -> String {
  if value.is_nan() {
    return "NaN".to_string();
  }
  if value.is_infinite() {
    return if value > 0.0 { "Infinity" } else { "-Infinity" }.to_string();
  }
  if value == 0.0 {
    return "0".to_string();
  }
  if value.fract() == 0.0 && value.abs() < 1e21 {
    return format!("{value:.0}");
  }
  value.to_string()
}

impl Isolate {
  pub fn kind(&self, value: Local<'_>) -> ValueKind {
    let obj = match value.tagged() {
      Tagged::Smi(_) => return ValueKind::Number,
      Tagged::Heap(obj) => obj,
    };
    match self.heap.kind_of(obj) {
      InstanceKind::Oddball => match self.heap.oddball_kind(obj) {
        OddballKind::Undefined => ValueKind::Undefined,
        OddballKind::Null => ValueKind::Null,
        OddballKind::True | OddballKind::False => ValueKind::Boolean,
      },
      InstanceKind::HeapNumber => ValueKind::Number,
      InstanceKind::String => ValueKind::String,
      InstanceKind::Bridge => ValueKind::Object,
      InstanceKind::Context => ValueKind::Context,
      InstanceKind::Script => ValueKind::Script,
      InstanceKind::FixedArray => ValueKind::FixedArray,
      InstanceKind::Map => fatal!("map {obj:?} escaped into a handle"),
    }
  }

  /// The heap object behind `value` if it has the given kind.
  pub(crate) fn expect_kind(&self, value: Local<'_>, kind: InstanceKind) -> Result<HeapRef, Error> {
    match value.heap_ref() {
      Some(obj) if self.heap.kind_of(obj) == kind => Ok(obj),
      _ => Err(Error::InvalidHandle),
    }
  }

  pub fn is_undefined(&self, value: Local<'_>) -> bool {
    value.heap_ref() == Some(self.roots.undefined)
  }

  pub fn is_null(&self, value: Local<'_>) -> bool {
    value.heap_ref() == Some(self.roots.null)
  }

  pub fn is_heap_number(&self, value: Local<'_>) -> bool {
    value
      .heap_ref()
      .is_some_and(|obj| self.heap.kind_of(obj) == InstanceKind::HeapNumber)
  }

  pub fn is_number(&self, value: Local<'_>) -> bool {
    self.kind(value) == ValueKind::Number
  }

  pub fn is_string(&self, value: Local<'_>) -> bool {
    self.kind(value) == ValueKind::String
  }

  pub fn is_oddball(&self, value: Local<'_>) -> bool {
    matches!(
      self.kind(value),
      ValueKind::Undefined | ValueKind::Null | ValueKind::Boolean
    )
  }

  pub fn is_object(&self, value: Local<'_>) -> bool {
    self.kind(value) == ValueKind::Object
  }

  pub fn is_function(&self, value: Local<'_>) -> bool {
    match value.heap_ref() {
      Some(obj) if self.heap.kind_of(obj) == InstanceKind::Bridge => self
        .bridge_host_value(obj)
        .is_ok_and(|host| self.host.type_of(host) == HostType::Function),
      _ => false,
    }
  }

  pub(crate) fn string_host_value(&self, obj: HeapRef) -> Result<HostValue, Error> {
    HostValue::from_raw(self.heap.read_word(obj, string::HOST_VALUE)).ok_or(Error::InvalidHandle)
  }

  /// Length in UTF-16 code units, for strings.
  pub fn string_length(&self, value: Local<'_>) -> Option<usize> {
    let obj = self.expect_kind(value, InstanceKind::String).ok()?;
    Some(self.heap.read_word(obj, string::UTF16_LENGTH) as usize)
  }

  pub fn to_boolean(&self, value: Local<'_>) -> Result<bool, Error> {
    let obj = match value.tagged() {
      Tagged::Smi(smi) => return Ok(smi != 0),
      Tagged::Heap(obj) => obj,
    };
    Ok(match self.heap.kind_of(obj) {
      InstanceKind::Oddball => self.heap.oddball_kind(obj) == OddballKind::True,
      InstanceKind::HeapNumber => {
        let number = self.heap.heap_number_value(obj);
        number != 0.0 && !number.is_nan()
      }
      InstanceKind::String => self.heap.read_word(obj, string::UTF16_LENGTH) != 0,
      InstanceKind::Bridge => self.host.to_boolean(self.bridge_host_value(obj)?),
      _ => return Err(Error::InvalidHandle),
    })
  }

  pub fn to_number(&self, value: Local<'_>) -> Result<f64, Error> {
    let obj = match value.tagged() {
      Tagged::Smi(smi) => return Ok(f64::from(smi)),
      Tagged::Heap(obj) => obj,
    };
    Ok(match self.heap.kind_of(obj) {
      InstanceKind::Oddball => match self.heap.oddball_kind(obj) {
        OddballKind::Undefined => f64::NAN,
        OddballKind::Null | OddballKind::False => 0.0,
        OddballKind::True => 1.0,
      },
      InstanceKind::HeapNumber => self.heap.heap_number_value(obj),
      InstanceKind::String => self.host.to_number(self.string_host_value(obj)?),
      InstanceKind::Bridge => self.host.to_number(self.bridge_host_value(obj)?),
      _ => return Err(Error::InvalidHandle),
    })
  }

  /// Script-visible string conversion. Objects are converted by the host in the current context
  /// and may throw.
  pub fn to_rust_string(&mut self, value: Local<'_>) -> Result<String, Error> {
    let obj = match value.tagged() {
      Tagged::Smi(smi) => return Ok(smi.to_string()),
      Tagged::Heap(obj) => obj,
    };
    match self.heap.kind_of(obj) {
      InstanceKind::Oddball => Ok(
        match self.heap.oddball_kind(obj) {
          OddballKind::Undefined => "undefined",
          OddballKind::Null => "null",
          OddballKind::True => "true",
          OddballKind::False => "false",
        }
        .to_string(),
      ),
      InstanceKind::HeapNumber => Ok(number_to_string(self.heap.heap_number_value(obj))),
      InstanceKind::String => {
        let host = self.string_host_value(obj)?;
        self
          .host
          .string_value(host)
          .ok_or(Error::Host("string value is not a host string".to_string()))
      }
      InstanceKind::Bridge => {
        let host = self.bridge_host_value(obj)?;
        let context = self.current_host_context()?;
        match self.host.to_string(context, host) {
          Ok(text) => Ok(text),
          Err(exception) => Err(self.throw_host_exception(exception)),
        }
      }
      _ => Err(Error::InvalidHandle),
    }
  }

  /// `===`: numbers and strings compare by content, everything else by identity.
  pub fn strict_equals(&self, a: Local<'_>, b: Local<'_>) -> Result<bool, Error> {
    let (kind_a, kind_b) = (self.kind(a), self.kind(b));
    if kind_a == ValueKind::Number && kind_b == ValueKind::Number {
      return Ok(self.to_number(a)? == self.to_number(b)?);
    }
    if a.word() == b.word() {
      return Ok(true);
    }
    if kind_a == ValueKind::String && kind_b == ValueKind::String {
      let (Some(a), Some(b)) = (a.heap_ref(), b.heap_ref()) else {
        return Ok(false);
      };
      return Ok(
        self
          .host
          .strict_equals(self.string_host_value(a)?, self.string_host_value(b)?),
      );
    }
    Ok(false)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn number_formatting() {
    assert_eq!(number_to_string(42.0), "42");
    assert_eq!(number_to_string(-0.0), "0");
    assert_eq!(number_to_string(1.5), "1.5");
    assert_eq!(number_to_string(f64::NAN), "NaN");
    assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    assert_eq!(number_to_string(4294967296.0), "4294967296");
  }
}
