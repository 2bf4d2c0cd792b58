//! Persistent and weak references.
//!
//! A [`Global`] roots its value until released with [`Isolate::reset_global`], independent of any
//! handle scope. A weak global does not root its value: when the collector finds the value
//! otherwise unreachable it clears the global and runs its first-pass callback, which may ask
//! for a second-pass callback that runs once the collection has finished.

use crate::bridge::HostPin;
use crate::error::fatal;
use crate::heap::object::bridge;
use crate::heap::InstanceKind;
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::tagged::{HeapRef, Tagged, TaggedWord};
use crate::value::Local;
use crate::Error;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct GlobalId(u32);

impl GlobalId {
  pub fn raw(self) -> u32 {
    self.0
  }

  pub fn from_raw(raw: u32) -> Self {
    Self(raw)
  }
}

/// Move-only ownership of one global handle slot.
///
/// Not `Clone`: each slot is released exactly once, by passing the token to
/// [`Isolate::reset_global`]. Dropping a token without resetting it leaks the slot.
#[must_use = "a global handle must be released with Isolate::reset_global"]
#[derive(PartialEq, Eq, Hash, Debug)]
pub struct Global {
  id: GlobalId,
}

impl Global {
  pub fn id(&self) -> GlobalId {
    self.id
  }

  /// Gives up the token for the raw id (for handing across an FFI boundary).
  pub fn into_raw(self) -> GlobalId {
    self.id
  }

  /// Reclaims a token from a raw id. The caller must own the slot and must not use the id again.
  pub fn from_raw(id: GlobalId) -> Self {
    Self { id }
  }
}

/// First-pass weak callback: runs during the sweep, while the object is being reclaimed.
pub type WeakCallback = Box<dyn FnOnce(&mut WeakCallbackInfo) + Send>;

/// Second-pass weak callback: runs after the collection with full access to the isolate.
pub type SecondPassCallback = Box<dyn FnOnce(&mut Isolate, u64) + Send>;

/// What a first-pass callback gets to see of the dying object.
pub struct WeakCallbackInfo {
  param: u64,
  internal_fields: Vec<Option<i32>>,
  pub(crate) second_pass: Option<SecondPassCallback>,
}

impl WeakCallbackInfo {
  pub(crate) fn new(param: u64, internal_fields: Vec<Option<i32>>) -> Self {
    Self {
      param,
      internal_fields,
      second_pass: None,
    }
  }

  /// The embedder parameter passed to [`Isolate::set_weak`].
  pub fn param(&self) -> u64 {
    self.param
  }

  /// Small-integer internal fields of the dying object. Other fields read as `None`, since
  /// anything they point at may be dying too.
  pub fn internal_field(&self, index: usize) -> Option<i32> {
    self.internal_fields.get(index).copied().flatten()
  }

  /// Requests `callback` to run once the current collection is over.
  pub fn set_second_pass_callback(&mut self, callback: impl FnOnce(&mut Isolate, u64) + Send + 'static) {
    self.second_pass = Some(Box::new(callback));
  }
}

pub(crate) struct WeakState {
  pub(crate) param: u64,
  pub(crate) callback: Option<WeakCallback>,
}

pub(crate) struct GlobalEntry {
  /// `None` once a weak target has been collected.
  pub(crate) value: Option<TaggedWord>,
  pub(crate) weak: Option<WeakState>,
  pub(crate) pin: Option<HostPin>,
  /// Creation order, for running weak callbacks in registration order.
  pub(crate) seq: u64,
}

#[derive(Default)]
pub(crate) struct GlobalTable {
  entries: Vec<Option<GlobalEntry>>,
  free: Vec<u32>,
  next_seq: u64,
  live: usize,
}

impl GlobalTable {
  fn add(&mut self, value: TaggedWord, pin: Option<HostPin>) -> GlobalId {
    let entry = GlobalEntry {
      value: Some(value),
      weak: None,
      pin,
      seq: self.next_seq,
    };
    self.next_seq += 1;
    self.live += 1;
    if let Some(index) = self.free.pop() {
      debug_assert!(self.entries[index as usize].is_none());
      self.entries[index as usize] = Some(entry);
      return GlobalId(index);
    }
    let index = match u32::try_from(self.entries.len()) {
      Ok(index) => index,
      Err(_) => fatal!("too many global handles"),
    };
    self.entries.push(Some(entry));
    GlobalId(index)
  }

  pub(crate) fn entry(&self, id: GlobalId) -> &GlobalEntry {
    match self.entries.get(id.0 as usize) {
      Some(Some(entry)) => entry,
      _ => fatal!("{id:?} used after release"),
    }
  }

  pub(crate) fn entry_mut(&mut self, id: GlobalId) -> &mut GlobalEntry {
    match self.entries.get_mut(id.0 as usize) {
      Some(Some(entry)) => entry,
      _ => fatal!("{id:?} used after release"),
    }
  }

  fn remove(&mut self, id: GlobalId) -> GlobalEntry {
    let entry = match self.entries.get_mut(id.0 as usize).and_then(Option::take) {
      Some(entry) => entry,
      None => fatal!("{id:?} released twice"),
    };
    self.free.push(id.0);
    self.live -= 1;
    entry
  }

  pub(crate) fn len(&self) -> usize {
    self.live
  }

  pub(crate) fn clear(&mut self) {
    self.entries.clear();
    self.free.clear();
    self.live = 0;
  }

  /// Values of strong globals.
  pub(crate) fn trace_strong(&self, mut visit: impl FnMut(Tagged)) {
    for entry in self.entries.iter().flatten() {
      if entry.weak.is_some() {
        continue;
      }
      if let Some(value) = entry.value.and_then(TaggedWord::decode) {
        visit(value);
      }
    }
  }

  /// Weak globals whose target is `dead`, ordered by target then registration.
  pub(crate) fn weak_targets(&self, is_dead: impl Fn(HeapRef) -> bool) -> Vec<(HeapRef, GlobalId)> {
    let mut found: Vec<(HeapRef, u64, GlobalId)> = self
      .entries
      .iter()
      .enumerate()
      .filter_map(|(index, entry)| {
        let entry = entry.as_ref()?;
        entry.weak.as_ref()?;
        let target = entry.value?.decode()?.as_heap()?;
        is_dead(target).then_some((target, entry.seq, GlobalId(index as u32)))
      })
      .collect();
    found.sort_by_key(|(target, seq, _)| (*target, *seq));
    found
      .into_iter()
      .map(|(target, _, id)| (target, id))
      .collect()
  }
}

impl<'i> HandleScope<'i> {
  /// Creates a strong global for `value`. A global on a bridged host object also pins the host
  /// value for as long as the global stays strong.
  pub fn new_global(&mut self, value: Local<'_>) -> Result<Global, Error> {
    let pin = match value.heap_ref() {
      Some(obj) if self.isolate.heap.kind_of(obj) == InstanceKind::Bridge => {
        Some(self.isolate.pin_bridge(obj)?)
      }
      _ => None,
    };
    let id = self.isolate.globals.add(value.word(), pin);
    Ok(Global { id })
  }

  /// The current value, or `None` if it was a weak global whose target has been collected.
  pub fn global_value(&mut self, global: &Global) -> Option<Local<'i>> {
    let value = self.isolate.globals.entry(global.id).value?.decode()?;
    Some(self.local(value))
  }
}

impl Isolate {
  /// Releases the slot and whatever pin it held.
  pub fn reset_global(&mut self, global: Global) {
    self.release_global_id(global.id);
  }

  /// Releases a slot by raw id. Releasing the same id twice is fatal.
  pub fn release_global_id(&mut self, id: GlobalId) {
    let entry = self.globals.remove(id);
    if let Some(pin) = entry.pin {
      self.unpin(pin);
    }
  }

  /// Makes the global weak. `callback` runs (at most once) when the collector finds the value
  /// otherwise unreachable; the global reads as empty from then on.
  pub fn set_weak(&mut self, global: &Global, param: u64, callback: Option<WeakCallback>) {
    let entry = self.globals.entry_mut(global.id);
    entry.weak = Some(WeakState { param, callback });
    if let Some(pin) = entry.pin.take() {
      self.unpin(pin);
    }
  }

  /// Makes a weak global strong again. A no-op if it is already strong or its target is gone.
  pub fn clear_weak(&mut self, global: &Global) -> Result<(), Error> {
    let entry = self.globals.entry_mut(global.id);
    if entry.weak.take().is_none() {
      return Ok(());
    }
    let target = entry.value.and_then(TaggedWord::decode).and_then(Tagged::as_heap);
    if let Some(obj) = target {
      if self.heap.kind_of(obj) == InstanceKind::Bridge
        && self.heap.read_word(obj, bridge::FLAGS) & bridge::FLAG_HOST_DEAD == 0
      {
        let pin = self.pin_bridge(obj)?;
        self.globals.entry_mut(global.id).pin = Some(pin);
      }
    }
    Ok(())
  }

  pub fn is_weak(&self, global: &Global) -> bool {
    self.globals.entry(global.id).weak.is_some()
  }

  /// Whether the global's weak target has been collected.
  pub fn global_is_empty(&self, global: &Global) -> bool {
    self.globals.entry(global.id).value.is_none()
  }

  /// Number of unreleased global slots.
  pub fn global_count(&self) -> usize {
    self.globals.len()
  }
}
