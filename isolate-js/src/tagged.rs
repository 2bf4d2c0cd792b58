//! Word-level encoding of references.
//!
//! A [`TaggedWord`] is the 64-bit shape every reference has at the API boundary:
//!
//! - low bit `0`: a small integer (Smi). The signed 32-bit payload lives in the upper half.
//! - low bit `1`: the address of a heap object, with the tag bit set.
//!
//! Heap addresses are always slot aligned, so the tag bit is free. This is the only module that
//! splits or builds raw words; the rest of the crate works with [`Tagged`].

use crate::heap::SLOT_SIZE;
use core::fmt;
use core::num::NonZeroUsize;

pub const SMI_TAG: u64 = 0;
pub const HEAP_OBJECT_TAG: u64 = 1;
pub const TAG_MASK: u64 = 1;
pub const SMI_SHIFT: u32 = 32;

/// Untagged address of a live heap object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct HeapRef(NonZeroUsize);

impl HeapRef {
  /// Returns `None` for null or misaligned addresses.
  pub(crate) fn from_address(address: usize) -> Option<Self> {
    if address % SLOT_SIZE != 0 {
      return None;
    }
    NonZeroUsize::new(address).map(Self)
  }

  #[inline]
  pub fn address(self) -> usize {
    self.0.get()
  }
}

impl fmt::Debug for HeapRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "HeapRef({:#x})", self.address())
  }
}

/// A decoded reference: either an immediate small integer or a heap object.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Tagged {
  Smi(i32),
  Heap(HeapRef),
}

impl Tagged {
  pub fn encode(self) -> TaggedWord {
    match self {
      Tagged::Smi(value) => TaggedWord(((value as i64) << SMI_SHIFT) as u64),
      Tagged::Heap(obj) => TaggedWord(obj.address() as u64 | HEAP_OBJECT_TAG),
    }
  }

  pub fn as_smi(self) -> Option<i32> {
    match self {
      Tagged::Smi(value) => Some(value),
      Tagged::Heap(_) => None,
    }
  }

  pub fn as_heap(self) -> Option<HeapRef> {
    match self {
      Tagged::Smi(_) => None,
      Tagged::Heap(obj) => Some(obj),
    }
  }
}

impl From<HeapRef> for Tagged {
  fn from(obj: HeapRef) -> Self {
    Tagged::Heap(obj)
  }
}

impl From<i32> for Tagged {
  fn from(value: i32) -> Self {
    Tagged::Smi(value)
  }
}

/// The raw 64-bit form of a [`Tagged`] reference.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct TaggedWord(u64);

impl TaggedWord {
  /// Marks an empty field. It has the heap tag but can never be a slot-aligned address.
  pub const HOLE: TaggedWord = TaggedWord(0b11);

  #[inline]
  pub const fn from_raw(raw: u64) -> Self {
    Self(raw)
  }

  #[inline]
  pub const fn raw(self) -> u64 {
    self.0
  }

  #[inline]
  pub const fn is_smi(self) -> bool {
    self.0 & TAG_MASK == SMI_TAG
  }

  #[inline]
  pub const fn is_heap_object(self) -> bool {
    self.0 & TAG_MASK == HEAP_OBJECT_TAG
  }

  #[inline]
  pub fn is_hole(self) -> bool {
    self == Self::HOLE
  }

  /// Splits the word. Holes and malformed words (a Smi with low payload bits, a misaligned
  /// address) decode to `None`.
  pub fn decode(self) -> Option<Tagged> {
    if self.is_smi() {
      if self.0 as u32 != 0 {
        return None;
      }
      return Some(Tagged::Smi(((self.0 as i64) >> SMI_SHIFT) as i32));
    }
    HeapRef::from_address((self.0 & !TAG_MASK) as usize).map(Tagged::Heap)
  }
}

impl fmt::Debug for TaggedWord {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self.decode() {
      Some(Tagged::Smi(value)) => write!(f, "Smi({value})"),
      Some(Tagged::Heap(obj)) => write!(f, "{obj:?}"),
      None if self.is_hole() => f.write_str("Hole"),
      None => write!(f, "Malformed({:#x})", self.0),
    }
  }
}

impl From<Tagged> for TaggedWord {
  fn from(value: Tagged) -> Self {
    value.encode()
  }
}

/// Returns the Smi payload for numbers that can be represented without boxing.
///
/// Only finite integral values in `i32` range qualify; `-0.0` must stay a heap number so its
/// sign survives.
pub fn smi_from_f64(value: f64) -> Option<i32> {
  if !value.is_finite() || value.fract() != 0.0 {
    return None;
  }
  if value == 0.0 && value.is_sign_negative() {
    return None;
  }
  if value < i32::MIN as f64 || value > i32::MAX as f64 {
    return None;
  }
  Some(value as i32)
}
