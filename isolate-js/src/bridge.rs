//! Heap objects standing in for host objects.
//!
//! Wrapping a host object, function or symbol yields a Bridge. The isolate keeps one Bridge per
//! host value, so wrapping the same host value twice yields the same address. A Bridge holds the
//! host value weakly: the host may collect it unless something pins it. Internal fields live in a
//! FixedArray hanging off the Bridge.

use crate::error::fatal;
use crate::heap::object::{bridge, string};
use crate::heap::{InstanceKind, OddballKind};
use crate::host::{HostType, HostValue};
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::tagged::{HeapRef, Tagged};
use crate::value::Local;
use crate::Error;
use ahash::AHashMap;

/// Keeps a bridged host value protected in the host engine.
///
/// Move-only; release it with [`Isolate::unpin`].
#[must_use = "a pin must be released with Isolate::unpin"]
#[derive(PartialEq, Eq, Debug)]
pub struct HostPin {
  bridge: HeapRef,
}

/// Host value → Bridge identity table.
#[derive(Default)]
pub(crate) struct BridgeTable {
  pub(crate) by_host: AHashMap<HostValue, HeapRef>,
}

impl Isolate {
  /// Converts a host value into a heap value. Primitives become Smis, heap numbers, oddballs or
  /// strings; everything else goes through the identity table.
  pub(crate) fn wrap_host(&mut self, value: HostValue) -> Tagged {
    match self.host.type_of(value) {
      HostType::Undefined => self.undefined_value(),
      HostType::Null => self.null_value(),
      HostType::Boolean => {
        let value = self.host.to_boolean(value);
        self.boolean_value(value)
      }
      HostType::Number => {
        let value = self.host.to_number(value);
        self.number_value(value)
      }
      HostType::String => match self.host.string_value(value) {
        Some(text) if text.is_empty() => Tagged::Heap(self.roots.empty_string),
        _ => self.string_from_host(value),
      },
      HostType::Symbol | HostType::Object | HostType::Function => {
        Tagged::Heap(self.bridge_for(value))
      }
    }
  }

  pub(crate) fn bridge_for(&mut self, value: HostValue) -> HeapRef {
    if let Some(&obj) = self.bridges.by_host.get(&value) {
      let count = self.heap.read_word(obj, bridge::WRAP_COUNT);
      self.heap.write_word(obj, bridge::WRAP_COUNT, count + 1);
      return obj;
    }
    let size = InstanceKind::Bridge.instance_size().unwrap_or_default();
    let obj = self.heap.allocate(InstanceKind::Bridge, size);
    self.heap.write_word(obj, bridge::HOST_VALUE, value.raw());
    self.heap.write_word(obj, bridge::WRAP_COUNT, 1);
    self.heap.write_field(obj, bridge::INTERNAL_FIELDS, None);
    self.host.register_finalizer(value);
    self.bridges.by_host.insert(value, obj);
    obj
  }

  /// The host value behind a Bridge, unless the host has collected it.
  pub(crate) fn bridge_host_value(&self, obj: HeapRef) -> Result<HostValue, Error> {
    if self.heap.read_word(obj, bridge::FLAGS) & bridge::FLAG_HOST_DEAD != 0 {
      return Err(Error::HostValueCollected);
    }
    HostValue::from_raw(self.heap.read_word(obj, bridge::HOST_VALUE)).ok_or(Error::InvalidHandle)
  }

  /// Converts a heap value back into a host value.
  pub(crate) fn to_host(&mut self, value: Tagged) -> Result<HostValue, Error> {
    let obj = match value {
      Tagged::Smi(smi) => return Ok(self.host.number(f64::from(smi))),
      Tagged::Heap(obj) => obj,
    };
    match self.heap.kind_of(obj) {
      InstanceKind::Oddball => Ok(match self.heap.oddball_kind(obj) {
        OddballKind::Undefined => self.host.undefined(),
        OddballKind::Null => self.host.null(),
        OddballKind::True => self.host.boolean(true),
        OddballKind::False => self.host.boolean(false),
      }),
      InstanceKind::HeapNumber => {
        let number = self.heap.heap_number_value(obj);
        Ok(self.host.number(number))
      }
      InstanceKind::String => {
        HostValue::from_raw(self.heap.read_word(obj, string::HOST_VALUE))
          .ok_or(Error::InvalidHandle)
      }
      InstanceKind::Bridge => self.bridge_host_value(obj),
      InstanceKind::Context => Err(Error::InvalidArgument("a context is not a script value")),
      InstanceKind::Script => Err(Error::InvalidArgument("a script is not a script value")),
      InstanceKind::FixedArray | InstanceKind::Map => Err(Error::InvalidHandle),
    }
  }

  pub(crate) fn pin_bridge(&mut self, obj: HeapRef) -> Result<HostPin, Error> {
    let host = self.bridge_host_value(obj)?;
    let pins = self.heap.read_word(obj, bridge::PINS);
    if pins == 0 {
      self.host.protect(host);
    }
    self.heap.write_word(obj, bridge::PINS, pins + 1);
    Ok(HostPin { bridge: obj })
  }

  /// Releases a pin. The last pin on a bridge unprotects its host value.
  pub fn unpin(&mut self, pin: HostPin) {
    let obj = pin.bridge;
    let pins = self.heap.read_word(obj, bridge::PINS);
    if pins == 0 {
      fatal!("unbalanced unpin of {obj:?}");
    }
    self.heap.write_word(obj, bridge::PINS, pins - 1);
    if pins == 1 {
      if let Ok(host) = self.bridge_host_value(obj) {
        self.host.unprotect(host);
      }
    }
  }

  /// Applies host finalization notifications: the Bridge leaves the identity table, is marked
  /// host-dead, and loses the host reference a class instance held on it.
  pub(crate) fn poll_host_finalizations(&mut self) -> usize {
    let finalized = self.host.take_finalized();
    let mut applied = 0;
    for value in finalized {
      let Some(obj) = self.bridges.by_host.remove(&value) else {
        continue;
      };
      let flags = self.heap.read_word(obj, bridge::FLAGS);
      self
        .heap
        .write_word(obj, bridge::FLAGS, flags | bridge::FLAG_HOST_DEAD);
      let host_refs = self.heap.read_word(obj, bridge::HOST_REFS);
      if host_refs > 0 {
        self.heap.write_word(obj, bridge::HOST_REFS, host_refs - 1);
      }
      applied += 1;
    }
    if applied > 0 {
      tracing::trace!(isolate = self.id.0, applied, "host finalizations applied");
    }
    applied
  }

  /// Runs the host engine's collector and applies what it finalized.
  pub fn collect_host_garbage(&mut self) -> usize {
    let freed = self.host.collect_garbage();
    self.poll_host_finalizations();
    freed
  }

  /// Small-integer view of a Bridge's internal fields.
  pub(crate) fn internal_field_smis(&self, obj: HeapRef) -> Vec<Option<i32>> {
    let Some(Tagged::Heap(fields)) = self.heap.read_field(obj, bridge::INTERNAL_FIELDS) else {
      return Vec::new();
    };
    if !self.heap.is_live(fields) {
      return Vec::new();
    }
    (0..self.heap.fixed_array_len(fields))
      .map(|index| self.heap.fixed_array_get(fields, index).and_then(Tagged::as_smi))
      .collect()
  }
}

impl<'i> HandleScope<'i> {
  /// Wraps a host value, preserving identity for host objects.
  pub fn wrap(&mut self, value: HostValue) -> Local<'i> {
    let value = self.isolate.wrap_host(value);
    self.local(value)
  }

  pub fn to_host(&mut self, value: Local<'_>) -> Result<HostValue, Error> {
    self.isolate.to_host(value.tagged())
  }

  /// Pins the host value behind an object so the host cannot collect it.
  pub fn pin(&mut self, value: Local<'_>) -> Result<HostPin, Error> {
    let obj = self.isolate.expect_kind(value, InstanceKind::Bridge)?;
    self.isolate.pin_bridge(obj)
  }

  /// How many times the host value behind `value` has been wrapped.
  pub fn wrap_count(&self, value: Local<'_>) -> Result<u64, Error> {
    let obj = self.isolate.expect_kind(value, InstanceKind::Bridge)?;
    Ok(self.isolate.heap.read_word(obj, bridge::WRAP_COUNT))
  }

  /// Whether the host engine has collected the value behind `value`.
  pub fn is_host_collected(&self, value: Local<'_>) -> Result<bool, Error> {
    let obj = self.isolate.expect_kind(value, InstanceKind::Bridge)?;
    Ok(self.isolate.heap.read_word(obj, bridge::FLAGS) & bridge::FLAG_HOST_DEAD != 0)
  }

  pub fn internal_field_count(&self, object: Local<'_>) -> Result<usize, Error> {
    let obj = self.isolate.expect_kind(object, InstanceKind::Bridge)?;
    Ok(match self.isolate.heap.read_field(obj, bridge::INTERNAL_FIELDS) {
      Some(Tagged::Heap(fields)) => self.isolate.heap.fixed_array_len(fields),
      _ => 0,
    })
  }

  pub fn internal_field(&mut self, object: Local<'_>, index: usize) -> Result<Option<Local<'i>>, Error> {
    let obj = self.isolate.expect_kind(object, InstanceKind::Bridge)?;
    let Some(Tagged::Heap(fields)) = self.isolate.heap.read_field(obj, bridge::INTERNAL_FIELDS) else {
      return Ok(None);
    };
    Ok(
      self
        .isolate
        .heap
        .fixed_array_get(fields, index)
        .map(|value| self.local(value)),
    )
  }

  /// Stores `value` in internal field `index`, growing the field array as needed.
  pub fn set_internal_field(
    &mut self,
    object: Local<'_>,
    index: usize,
    value: Option<Local<'_>>,
  ) -> Result<(), Error> {
    if index >= self.isolate.options.max_internal_fields {
      return Err(Error::InvalidArgument("internal field index out of range"));
    }
    let obj = self.isolate.expect_kind(object, InstanceKind::Bridge)?;
    let heap = &mut self.isolate.heap;
    let fields = match heap.read_field(obj, bridge::INTERNAL_FIELDS) {
      Some(Tagged::Heap(fields)) if index < heap.fixed_array_len(fields) => fields,
      current => {
        // `obj` is rooted by `object`; the old array stays reachable through it until replaced.
        let grown = heap.allocate_fixed_array(index + 1);
        if let Some(Tagged::Heap(old)) = current {
          for i in 0..heap.fixed_array_len(old) {
            let element = heap.fixed_array_get(old, i);
            heap.fixed_array_set(grown, i, element);
          }
        }
        heap.write_field(obj, bridge::INTERNAL_FIELDS, Some(Tagged::Heap(grown)));
        grown
      }
    };
    heap.fixed_array_set(fields, index, value.map(Local::tagged));
    Ok(())
  }
}
