//! The isolate's private heap.
//!
//! Objects live in 512 KiB chunks carved into 32 byte slots. A chunk's allocation bitmap is the
//! only record of which slots are live: walking the bitmap and reading each object's map is how
//! the collector enumerates the heap.

mod allocator;
mod chunk;
mod map;
pub(crate) mod object;

pub use chunk::{
  BLOCKS_PER_CHUNK, BLOCK_SIZE, CHUNK_SIZE, SLOTS_PER_BLOCK, SLOTS_PER_CHUNK, SLOT_SIZE, WORD_SIZE,
};
pub use map::InstanceKind;
pub use object::OddballKind;

use crate::error::fatal;
use crate::tagged::{HeapRef, Tagged, TaggedWord};
use allocator::slots_for;
use chunk::Chunk;
use map::MapTable;
use object::{map_layout, MAP_WORD};

/// A non-moving heap of tagged objects.
pub struct Heap {
  max_bytes: usize,
  /// Bytes covered by live allocations, maps included.
  used_bytes: usize,
  /// Searched newest first; a fresh chunk goes to the end.
  chunks: Vec<Chunk>,
  maps: MapTable,
}

impl Heap {
  pub(crate) fn new(max_bytes: usize) -> Self {
    let mut heap = Self {
      max_bytes,
      used_bytes: 0,
      chunks: Vec::new(),
      maps: MapTable::default(),
    };

    let meta = heap.allocate_raw(SLOT_SIZE);
    heap.write_word(meta, MAP_WORD, Tagged::Heap(meta).encode().raw());
    heap.write_word(meta, map_layout::KIND, InstanceKind::Map as u64);
    heap.write_word(meta, map_layout::INSTANCE_SIZE, SLOT_SIZE as u64);

    let mut maps = vec![meta];
    for kind in &InstanceKind::ALL[1..] {
      let map = heap.allocate_raw(SLOT_SIZE);
      heap.write_word(map, MAP_WORD, Tagged::Heap(meta).encode().raw());
      heap.write_word(map, map_layout::KIND, *kind as u64);
      heap.write_word(
        map,
        map_layout::INSTANCE_SIZE,
        kind.instance_size().unwrap_or(0) as u64,
      );
      maps.push(map);
    }
    heap.maps = MapTable::new(maps);
    heap
  }

  #[inline]
  pub fn used_bytes(&self) -> usize {
    self.used_bytes
  }

  #[inline]
  pub fn max_bytes(&self) -> usize {
    self.max_bytes
  }

  #[inline]
  pub fn chunk_count(&self) -> usize {
    self.chunks.len()
  }

  pub(crate) fn maps(&self) -> impl Iterator<Item = HeapRef> + '_ {
    self.maps.iter()
  }

  fn allocate_raw(&mut self, size: usize) -> HeapRef {
    if size > CHUNK_SIZE {
      fatal!("allocation of {size} bytes exceeds the chunk size");
    }
    let covered = slots_for(size);
    let bytes = covered * SLOT_SIZE;
    if self.used_bytes + bytes > self.max_bytes {
      fatal!(
        "heap limit of {} bytes exceeded ({} in use, {size} requested)",
        self.max_bytes,
        self.used_bytes
      );
    }

    let mut address = None;
    for chunk in self.chunks.iter_mut().rev() {
      if let Some(slot) = chunk.try_allocate(covered) {
        address = Some(chunk.address_of(slot));
        break;
      }
    }
    let address = match address {
      Some(address) => address,
      None => {
        let Some(mut chunk) = Chunk::new() else {
          fatal!("out of memory: the OS refused a new {CHUNK_SIZE} byte chunk");
        };
        let Some(slot) = chunk.try_allocate(covered) else {
          fatal!("fresh chunk could not satisfy {size} bytes");
        };
        let address = chunk.address_of(slot);
        self.chunks.push(chunk);
        tracing::trace!(chunks = self.chunks.len(), "heap grew");
        address
      }
    };

    self.used_bytes += bytes;
    match HeapRef::from_address(address) {
      Some(obj) => obj,
      None => fatal!("allocator produced misaligned address {address:#x}"),
    }
  }

  /// Allocates `size` bytes of zeroed memory and installs the map for `kind`.
  pub(crate) fn allocate(&mut self, kind: InstanceKind, size: usize) -> HeapRef {
    let obj = self.allocate_raw(size);
    let map = self.maps.get(kind);
    self.write_word(obj, MAP_WORD, Tagged::Heap(map).encode().raw());
    obj
  }

  fn chunk_index(&self, address: usize) -> Option<usize> {
    let base = Chunk::base_of(address);
    self.chunks.iter().position(|chunk| chunk.base() == base)
  }

  fn chunk(&self, obj: HeapRef) -> &Chunk {
    match self.chunk_index(obj.address()) {
      Some(index) => &self.chunks[index],
      None => fatal!("{obj:?} does not belong to any live chunk"),
    }
  }

  fn chunk_mut(&mut self, obj: HeapRef) -> &mut Chunk {
    match self.chunk_index(obj.address()) {
      Some(index) => &mut self.chunks[index],
      None => fatal!("{obj:?} does not belong to any live chunk"),
    }
  }

  pub(crate) fn read_word(&self, obj: HeapRef, word: usize) -> u64 {
    self.chunk(obj).read_word(obj.address(), word)
  }

  pub(crate) fn write_word(&mut self, obj: HeapRef, word: usize, value: u64) {
    self.chunk_mut(obj).write_word(obj.address(), word, value)
  }

  /// Whether `obj` points at the first slot of an allocated object.
  pub fn is_live(&self, obj: HeapRef) -> bool {
    let Some(index) = self.chunk_index(obj.address()) else {
      return false;
    };
    let chunk = &self.chunks[index];
    if !chunk.is_allocated(chunk.slot_of(obj.address())) {
      return false;
    }
    matches!(
      TaggedWord::from_raw(chunk.read_word(obj.address(), MAP_WORD)).decode(),
      Some(Tagged::Heap(_))
    )
  }

  pub fn kind_of(&self, obj: HeapRef) -> InstanceKind {
    let map = match self.read_field(obj, MAP_WORD) {
      Some(Tagged::Heap(map)) => map,
      _ => fatal!("{obj:?} has no map word"),
    };
    if map == obj {
      return InstanceKind::Map;
    }
    let word = self.read_word(map, map_layout::KIND);
    match InstanceKind::from_word(word) {
      Some(kind) => kind,
      None => fatal!("map {map:?} of {obj:?} has invalid kind {word}"),
    }
  }

  pub fn object_size(&self, obj: HeapRef) -> usize {
    let kind = self.kind_of(obj);
    match kind.instance_size() {
      Some(size) => size,
      None => object::fixed_array::size_for(self.fixed_array_len(obj)),
    }
  }

  /// Releases the object's slots. Returns the number of bytes reclaimed.
  pub(crate) fn free(&mut self, obj: HeapRef) -> usize {
    let covered = slots_for(self.object_size(obj));
    let chunk = self.chunk_mut(obj);
    let slot = chunk.slot_of(obj.address());
    chunk.release(slot, covered);
    let bytes = covered * SLOT_SIZE;
    self.used_bytes -= bytes;
    bytes
  }

  /// Every allocated object, maps included, in chunk and slot order.
  pub(crate) fn objects(&self) -> Vec<HeapRef> {
    let mut objects = Vec::new();
    for chunk in &self.chunks {
      let mut slot = 0;
      while slot < SLOTS_PER_CHUNK {
        if !chunk.is_allocated(slot) {
          slot += 1;
          continue;
        }
        let address = chunk.address_of(slot);
        let Some(obj) = HeapRef::from_address(address) else {
          fatal!("slot address {address:#x} is misaligned");
        };
        objects.push(obj);
        slot += slots_for(self.object_size(obj));
      }
    }
    objects
  }

  pub(crate) fn clear_marks(&mut self) {
    for chunk in &mut self.chunks {
      chunk.clear_marks();
    }
  }

  /// Returns `true` if `obj` was not already marked.
  pub(crate) fn mark(&mut self, obj: HeapRef) -> bool {
    let chunk = self.chunk_mut(obj);
    let slot = chunk.slot_of(obj.address());
    chunk.mark(slot)
  }

  pub(crate) fn is_marked(&self, obj: HeapRef) -> bool {
    let chunk = self.chunk(obj);
    chunk.is_marked(chunk.slot_of(obj.address()))
  }

  /// Returns empty chunks to the OS and resets the search hints of the rest.
  pub(crate) fn release_empty_chunks(&mut self) -> usize {
    let before = self.chunks.len();
    self.chunks.retain(|chunk| !chunk.is_empty());
    for chunk in &mut self.chunks {
      chunk.reset_hints();
    }
    before - self.chunks.len()
  }

  /// Drops every chunk, maps included. The heap is unusable afterwards.
  pub(crate) fn release_all(&mut self) {
    self.chunks.clear();
    self.used_bytes = 0;
  }
}
