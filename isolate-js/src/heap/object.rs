//! Per-kind object layouts (as word offsets) and field access.
//!
//! Word 0 of every object is its map. Fields documented as "tagged" hold a [`TaggedWord`] (or
//! the hole); every other field is a raw `u64`.

use super::map::InstanceKind;
use super::Heap;
use crate::error::fatal;
use crate::tagged::{HeapRef, Tagged, TaggedWord};

pub(crate) const MAP_WORD: usize = 0;

pub(crate) mod map_layout {
  pub const KIND: usize = 1;
  pub const INSTANCE_SIZE: usize = 2;
}

pub(crate) mod oddball {
  pub const KIND: usize = 1;
}

pub(crate) mod heap_number {
  /// `f64::to_bits` of the value.
  pub const VALUE: usize = 1;
}

pub(crate) mod string {
  pub const HOST_VALUE: usize = 1;
  pub const UTF16_LENGTH: usize = 2;
}

pub(crate) mod fixed_array {
  pub const LENGTH: usize = 1;
  /// Tagged.
  pub const ELEMENTS: usize = 2;

  pub fn size_for(len: usize) -> usize {
    (ELEMENTS + len) * crate::heap::WORD_SIZE
  }
}

pub(crate) mod bridge {
  pub const HOST_VALUE: usize = 1;
  /// Number of times the host value was wrapped into this bridge.
  pub const WRAP_COUNT: usize = 2;
  /// References the host engine holds to this bridge (class instances). Roots the bridge.
  pub const HOST_REFS: usize = 3;
  /// Outstanding `HostPin`s. The host value is protected while non-zero.
  pub const PINS: usize = 4;
  pub const FLAGS: usize = 5;
  /// `ClassId` of the instance, or 0.
  pub const CLASS: usize = 6;
  /// Tagged FixedArray, or the hole.
  pub const INTERNAL_FIELDS: usize = 7;

  pub const FLAG_HOST_DEAD: u64 = 1;
}

pub(crate) mod context {
  pub const HOST_CONTEXT: usize = 1;
  /// Tagged Bridge for the context's global object.
  pub const GLOBAL: usize = 2;
  /// Tagged FixedArray, or the hole.
  pub const EMBEDDER_DATA: usize = 3;
}

pub(crate) mod script {
  /// Tagged String.
  pub const SOURCE: usize = 1;
  /// Tagged String, or the hole.
  pub const NAME: usize = 2;
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum OddballKind {
  Undefined = 0,
  Null = 1,
  True = 2,
  False = 3,
}

impl OddballKind {
  pub(crate) fn from_word(word: u64) -> Option<Self> {
    Some(match word {
      0 => OddballKind::Undefined,
      1 => OddballKind::Null,
      2 => OddballKind::True,
      3 => OddballKind::False,
      _ => return None,
    })
  }
}

impl Heap {
  /// Reads a tagged field. Holes decode to `None`.
  pub(crate) fn read_field(&self, obj: HeapRef, word: usize) -> Option<Tagged> {
    TaggedWord::from_raw(self.read_word(obj, word)).decode()
  }

  pub(crate) fn write_field(&mut self, obj: HeapRef, word: usize, value: Option<Tagged>) {
    let word_value = value.map_or(TaggedWord::HOLE, Tagged::encode);
    self.write_word(obj, word, word_value.raw());
  }

  pub(crate) fn oddball_kind(&self, obj: HeapRef) -> OddballKind {
    let word = self.read_word(obj, oddball::KIND);
    match OddballKind::from_word(word) {
      Some(kind) => kind,
      None => fatal!("{obj:?} has invalid oddball kind {word}"),
    }
  }

  pub(crate) fn heap_number_value(&self, obj: HeapRef) -> f64 {
    f64::from_bits(self.read_word(obj, heap_number::VALUE))
  }

  /// Allocates a FixedArray with every element set to the hole.
  pub(crate) fn allocate_fixed_array(&mut self, len: usize) -> HeapRef {
    let obj = self.allocate(InstanceKind::FixedArray, fixed_array::size_for(len));
    self.write_word(obj, fixed_array::LENGTH, len as u64);
    for index in 0..len {
      self.write_field(obj, fixed_array::ELEMENTS + index, None);
    }
    obj
  }

  pub(crate) fn fixed_array_len(&self, obj: HeapRef) -> usize {
    self.read_word(obj, fixed_array::LENGTH) as usize
  }

  pub(crate) fn fixed_array_get(&self, obj: HeapRef, index: usize) -> Option<Tagged> {
    if index >= self.fixed_array_len(obj) {
      return None;
    }
    self.read_field(obj, fixed_array::ELEMENTS + index)
  }

  pub(crate) fn fixed_array_set(&mut self, obj: HeapRef, index: usize, value: Option<Tagged>) {
    let len = self.fixed_array_len(obj);
    if index >= len {
      fatal!("FixedArray index {index} out of bounds (length {len})");
    }
    self.write_field(obj, fixed_array::ELEMENTS + index, value);
  }

  /// Calls `visit` for every reference held by `obj`.
  pub(crate) fn trace_object(&self, obj: HeapRef, kind: InstanceKind, mut visit: impl FnMut(Tagged)) {
    let mut field = |word: usize| {
      if let Some(value) = self.read_field(obj, word) {
        visit(value);
      }
    };
    match kind {
      InstanceKind::Map
      | InstanceKind::Oddball
      | InstanceKind::HeapNumber
      | InstanceKind::String => {}
      InstanceKind::FixedArray => {
        for index in 0..self.fixed_array_len(obj) {
          field(fixed_array::ELEMENTS + index);
        }
      }
      InstanceKind::Bridge => field(bridge::INTERNAL_FIELDS),
      InstanceKind::Context => {
        field(context::GLOBAL);
        field(context::EMBEDDER_DATA);
      }
      InstanceKind::Script => {
        field(script::SOURCE);
        field(script::NAME);
      }
    }
  }
}
