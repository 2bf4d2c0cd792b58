use super::chunk::SLOT_SIZE;
use crate::tagged::HeapRef;

/// The shape of a heap object, stored in its map.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum InstanceKind {
  Map = 0,
  Oddball = 1,
  HeapNumber = 2,
  String = 3,
  FixedArray = 4,
  Bridge = 5,
  Context = 6,
  Script = 7,
}

impl InstanceKind {
  pub const COUNT: usize = 8;

  pub const ALL: [InstanceKind; Self::COUNT] = [
    InstanceKind::Map,
    InstanceKind::Oddball,
    InstanceKind::HeapNumber,
    InstanceKind::String,
    InstanceKind::FixedArray,
    InstanceKind::Bridge,
    InstanceKind::Context,
    InstanceKind::Script,
  ];

  /// Fixed instance size in bytes, or `None` for variable-length kinds.
  pub fn instance_size(self) -> Option<usize> {
    match self {
      InstanceKind::FixedArray => None,
      InstanceKind::Bridge => Some(2 * SLOT_SIZE),
      _ => Some(SLOT_SIZE),
    }
  }

  pub(crate) fn from_word(word: u64) -> Option<Self> {
    Self::ALL.get(usize::try_from(word).ok()?).copied()
  }

  pub fn name(self) -> &'static str {
    match self {
      InstanceKind::Map => "Map",
      InstanceKind::Oddball => "Oddball",
      InstanceKind::HeapNumber => "HeapNumber",
      InstanceKind::String => "String",
      InstanceKind::FixedArray => "FixedArray",
      InstanceKind::Bridge => "Bridge",
      InstanceKind::Context => "Context",
      InstanceKind::Script => "Script",
    }
  }
}

/// One map per instance kind, created when the heap boots and never collected.
///
/// The `Map` entry is the meta-map, whose own map word points at itself.
#[derive(Default)]
pub(crate) struct MapTable {
  maps: Vec<HeapRef>,
}

impl MapTable {
  pub(super) fn new(maps: Vec<HeapRef>) -> Self {
    Self { maps }
  }

  #[inline]
  pub(crate) fn get(&self, kind: InstanceKind) -> HeapRef {
    self.maps[kind as usize]
  }

  pub(crate) fn iter(&self) -> impl Iterator<Item = HeapRef> + '_ {
    self.maps.iter().copied()
  }
}
