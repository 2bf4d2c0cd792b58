//! Slot search within a chunk.
//!
//! Requests covering up to one bitmap block are placed at a position aligned to the next power
//! of two of their slot count, searching from that size class's hint block downwards and then
//! wrapping from the top. Larger requests take whole free blocks, searching upwards from the large
//! hint and then wrapping to the start. Only the covered slots are marked in the bitmap.

use super::chunk::{Chunk, BLOCKS_PER_CHUNK, SLOTS_PER_BLOCK, SLOT_SIZE, SLOTS_PER_CHUNK};
use crate::error::fatal;

/// Number of slots an allocation of `size` bytes covers. Zero-sized requests still take a slot.
pub(crate) fn slots_for(size: usize) -> usize {
  size.div_ceil(SLOT_SIZE).max(1)
}

#[inline]
fn run_mask(slots: usize) -> u64 {
  if slots >= SLOTS_PER_BLOCK {
    u64::MAX
  } else {
    (1u64 << slots) - 1
  }
}

impl Chunk {
  /// Claims `covered` slots. Returns the first slot index, or `None` if this chunk is too full.
  pub(crate) fn try_allocate(&mut self, covered: usize) -> Option<usize> {
    if covered == 0 || covered > SLOTS_PER_CHUNK {
      return None;
    }
    if covered <= SLOTS_PER_BLOCK {
      self.try_allocate_small(covered)
    } else {
      self.try_allocate_large(covered)
    }
  }

  fn try_allocate_small(&mut self, covered: usize) -> Option<usize> {
    let reserve = covered.next_power_of_two();
    let class = reserve.trailing_zeros() as usize;
    let mask = run_mask(covered);
    let hint = self.small_hints[class];

    let order = (0..=hint).rev().chain((hint + 1..BLOCKS_PER_CHUNK).rev());
    for block in order {
      let bits = self.alloc_map[block];
      if bits == u64::MAX {
        continue;
      }
      let mut pos = 0;
      while pos + covered <= SLOTS_PER_BLOCK {
        let run = mask << pos;
        if bits & run == 0 {
          self.alloc_map[block] |= run;
          self.small_hints[class] = block;
          return Some(block * SLOTS_PER_BLOCK + pos);
        }
        pos += reserve;
      }
    }
    None
  }

  fn try_allocate_large(&mut self, covered: usize) -> Option<usize> {
    let blocks = covered.div_ceil(SLOTS_PER_BLOCK);
    let start = self
      .find_free_blocks(self.large_hint, blocks)
      .or_else(|| self.find_free_blocks(0, blocks))?;

    let mut remaining = covered;
    for block in start..start + blocks {
      let take = remaining.min(SLOTS_PER_BLOCK);
      self.alloc_map[block] = run_mask(take);
      remaining -= take;
    }
    self.large_hint = start + blocks;
    Some(start * SLOTS_PER_BLOCK)
  }

  fn find_free_blocks(&self, from: usize, needed: usize) -> Option<usize> {
    let mut run = 0;
    for block in from..BLOCKS_PER_CHUNK {
      if self.alloc_map[block] == 0 {
        run += 1;
        if run == needed {
          return Some(block + 1 - needed);
        }
      } else {
        run = 0;
      }
    }
    None
  }

  /// Clears the covered bitmap range and zeroes the memory.
  pub(crate) fn release(&mut self, slot: usize, covered: usize) {
    if slot + covered > SLOTS_PER_CHUNK {
      fatal!("releasing slots {slot}..{} past the chunk end", slot + covered);
    }
    let mut cursor = slot;
    let end = slot + covered;
    while cursor < end {
      let block = cursor / SLOTS_PER_BLOCK;
      let pos = cursor % SLOTS_PER_BLOCK;
      let take = (SLOTS_PER_BLOCK - pos).min(end - cursor);
      let run = run_mask(take) << pos;
      if self.alloc_map[block] & run != run {
        fatal!(
          "releasing unallocated slots at {:#x}",
          self.address_of(cursor)
        );
      }
      self.alloc_map[block] &= !run;
      cursor += take;
    }
    self.zero_slots(slot, covered);
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn small_requests_are_aligned_to_their_reservation() {
    let mut chunk = Chunk::new().unwrap();
    let one = chunk.try_allocate(1).unwrap();
    let three = chunk.try_allocate(3).unwrap();
    assert_eq!(three % 4, 0);
    assert_ne!(one, three);
    // Only the covered slots are claimed; the fourth slot of the reservation stays free.
    assert!(chunk.is_allocated(three + 2));
    assert!(!chunk.is_allocated(three + 3));
    assert_eq!(chunk.allocated_slots(), 4);
  }

  #[test]
  fn small_search_starts_at_the_top_block() {
    let mut chunk = Chunk::new().unwrap();
    let slot = chunk.try_allocate(2).unwrap();
    assert_eq!(slot / SLOTS_PER_BLOCK, BLOCKS_PER_CHUNK - 1);
  }

  #[test]
  fn large_requests_take_whole_blocks() {
    let mut chunk = Chunk::new().unwrap();
    let slot = chunk.try_allocate(SLOTS_PER_BLOCK + 1).unwrap();
    assert_eq!(slot % SLOTS_PER_BLOCK, 0);
    assert!(chunk.is_allocated(slot + SLOTS_PER_BLOCK));
    assert!(!chunk.is_allocated(slot + SLOTS_PER_BLOCK + 1));
    let next = chunk.try_allocate(SLOTS_PER_BLOCK * 2).unwrap();
    assert_eq!(next, slot + 2 * SLOTS_PER_BLOCK);
  }

  #[test]
  fn release_clears_bits_and_memory() {
    let mut chunk = Chunk::new().unwrap();
    let slot = chunk.try_allocate(2).unwrap();
    let address = chunk.address_of(slot);
    chunk.write_word(address, 5, 0xdead_beef);
    chunk.release(slot, 2);
    assert!(chunk.is_empty());
    assert_eq!(chunk.read_word(address, 5), 0);
  }

  #[test]
  fn a_full_chunk_refuses_further_requests() {
    let mut chunk = Chunk::new().unwrap();
    assert_eq!(chunk.try_allocate(SLOTS_PER_CHUNK), Some(0));
    assert_eq!(chunk.try_allocate(1), None);
    assert_eq!(chunk.try_allocate(SLOTS_PER_BLOCK + 1), None);
    chunk.release(0, SLOTS_PER_CHUNK);
    chunk.reset_hints();
    assert!(chunk.try_allocate(1).is_some());
  }

  #[test]
  #[should_panic]
  fn double_release_is_fatal() {
    let mut chunk = Chunk::new().unwrap();
    let slot = chunk.try_allocate(1).unwrap();
    chunk.release(slot, 1);
    chunk.release(slot, 1);
  }
}
