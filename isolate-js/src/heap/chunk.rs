//! Raw chunk memory.
//!
//! Every heap object lives inside a chunk: a [`CHUNK_SIZE`] region aligned to [`CHUNK_SIZE`], so
//! the chunk owning an address is found by masking off its low bits. This is the only module that
//! touches raw memory. Reads and writes are bounds checked against the chunk they land in.

use crate::error::fatal;
use core::ptr::NonNull;
use std::alloc::{alloc_zeroed, dealloc, Layout};

pub const CHUNK_SIZE: usize = 0x80000;
pub const SLOT_SIZE_LOG: u32 = 5;
pub const SLOT_SIZE: usize = 1 << SLOT_SIZE_LOG;
pub const SLOTS_PER_CHUNK: usize = CHUNK_SIZE / SLOT_SIZE;
pub const SLOTS_PER_BLOCK: usize = 64;
pub const BLOCK_SIZE: usize = SLOTS_PER_BLOCK * SLOT_SIZE;
pub const BLOCKS_PER_CHUNK: usize = CHUNK_SIZE / BLOCK_SIZE;
pub const WORD_SIZE: usize = 8;
/// Runs of 1, 2, 4, ... 64 slots.
pub const SMALL_SIZE_CLASSES: usize = 7;

pub(crate) struct Chunk {
  memory: NonNull<u8>,
  layout: Layout,
  /// One bit per slot; set for every slot covered by a live object.
  pub(super) alloc_map: Box<[u64; BLOCKS_PER_CHUNK]>,
  /// One bit per slot; only ever set on an object's first slot.
  pub(super) mark_map: Box<[u64; BLOCKS_PER_CHUNK]>,
  pub(super) small_hints: [usize; SMALL_SIZE_CLASSES],
  pub(super) large_hint: usize,
}

// SAFETY: the chunk exclusively owns its memory, and all access goes through `&self`/`&mut self`.
unsafe impl Send for Chunk {}

impl Chunk {
  /// Obtains a zeroed, chunk-aligned region from the allocator. `None` if the OS refuses.
  pub(super) fn new() -> Option<Self> {
    let layout = Layout::from_size_align(CHUNK_SIZE, CHUNK_SIZE).ok()?;
    // SAFETY: `layout` has a non-zero size.
    let memory = NonNull::new(unsafe { alloc_zeroed(layout) })?;
    let mut chunk = Self {
      memory,
      layout,
      alloc_map: Box::new([0; BLOCKS_PER_CHUNK]),
      mark_map: Box::new([0; BLOCKS_PER_CHUNK]),
      small_hints: [0; SMALL_SIZE_CLASSES],
      large_hint: 0,
    };
    chunk.reset_hints();
    tracing::trace!(base = chunk.base(), "chunk obtained");
    Some(chunk)
  }

  #[inline]
  pub(crate) fn base(&self) -> usize {
    self.memory.as_ptr() as usize
  }

  #[inline]
  pub(crate) fn base_of(address: usize) -> usize {
    address & !(CHUNK_SIZE - 1)
  }

  #[inline]
  pub(crate) fn slot_of(&self, address: usize) -> usize {
    (address - self.base()) / SLOT_SIZE
  }

  #[inline]
  pub(crate) fn address_of(&self, slot: usize) -> usize {
    self.base() + slot * SLOT_SIZE
  }

  fn word_offset(&self, address: usize, word: usize) -> usize {
    let offset = address
      .checked_sub(self.base())
      .and_then(|offset| offset.checked_add(word.checked_mul(WORD_SIZE)?));
    match offset {
      Some(offset) if offset + WORD_SIZE <= CHUNK_SIZE => offset,
      _ => fatal!(
        "word {word} of {address:#x} lies outside chunk {:#x}",
        self.base()
      ),
    }
  }

  pub(crate) fn read_word(&self, address: usize, word: usize) -> u64 {
    let offset = self.word_offset(address, word);
    // SAFETY: `offset` is in bounds of the chunk and word aligned (addresses are slot aligned).
    unsafe { self.memory.as_ptr().add(offset).cast::<u64>().read() }
  }

  pub(crate) fn write_word(&mut self, address: usize, word: usize, value: u64) {
    let offset = self.word_offset(address, word);
    // SAFETY: as for `read_word`; `&mut self` guarantees exclusive access.
    unsafe { self.memory.as_ptr().add(offset).cast::<u64>().write(value) }
  }

  pub(super) fn zero_slots(&mut self, slot: usize, count: usize) {
    if slot + count > SLOTS_PER_CHUNK {
      fatal!("zeroing slots {slot}..{} past the chunk end", slot + count);
    }
    // SAFETY: the range was checked against the chunk bounds above.
    unsafe {
      self
        .memory
        .as_ptr()
        .add(slot * SLOT_SIZE)
        .write_bytes(0, count * SLOT_SIZE)
    }
  }

  #[inline]
  pub(crate) fn is_allocated(&self, slot: usize) -> bool {
    self.alloc_map[slot / SLOTS_PER_BLOCK] & (1 << (slot % SLOTS_PER_BLOCK)) != 0
  }

  pub(crate) fn is_empty(&self) -> bool {
    self.alloc_map.iter().all(|block| *block == 0)
  }

  pub(crate) fn allocated_slots(&self) -> usize {
    self
      .alloc_map
      .iter()
      .map(|block| block.count_ones() as usize)
      .sum()
  }

  /// Sets the mark bit. Returns `true` if it was previously clear.
  pub(crate) fn mark(&mut self, slot: usize) -> bool {
    let block = &mut self.mark_map[slot / SLOTS_PER_BLOCK];
    let bit = 1 << (slot % SLOTS_PER_BLOCK);
    let newly = *block & bit == 0;
    *block |= bit;
    newly
  }

  #[inline]
  pub(crate) fn is_marked(&self, slot: usize) -> bool {
    self.mark_map[slot / SLOTS_PER_BLOCK] & (1 << (slot % SLOTS_PER_BLOCK)) != 0
  }

  pub(crate) fn clear_marks(&mut self) {
    self.mark_map.fill(0);
  }

  /// Small-object searches start from the top block, large ones from the bottom.
  pub(crate) fn reset_hints(&mut self) {
    self.small_hints = [BLOCKS_PER_CHUNK - 1; SMALL_SIZE_CLASSES];
    self.large_hint = 0;
  }
}

impl Drop for Chunk {
  fn drop(&mut self) {
    tracing::trace!(base = self.base(), "chunk released");
    // SAFETY: `memory` was allocated in `Chunk::new` with exactly this layout.
    unsafe { dealloc(self.memory.as_ptr(), self.layout) }
  }
}
