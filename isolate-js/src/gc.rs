//! Mark/sweep collection of the isolate heap.
//!
//! Collections only start at safe points: an explicit [`Isolate::collect_garbage`], an idle
//! notification, or an event-loop turn once the allocation threshold has been crossed. A request
//! made while a collection is running (from a GC callback or a weak callback) is deferred to the
//! next safe point.

use crate::error::fatal;
use crate::global::{SecondPassCallback, WeakCallbackInfo};
use crate::heap::object::{bridge, string};
use crate::heap::InstanceKind;
use crate::host::HostValue;
use crate::isolate::Isolate;
use crate::tagged::{HeapRef, Tagged};
use ahash::AHashSet;
use std::collections::VecDeque;
use std::mem;

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub enum GcState {
  #[default]
  Idle,
  Marking,
  Sweeping,
}

/// Summary of one collection.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct GcStats {
  pub freed_objects: usize,
  pub freed_bytes: usize,
  pub freed_chunks: usize,
  pub live_chunks: usize,
  pub weak_callbacks: usize,
  pub second_pass_callbacks: usize,
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GcCallbackId(u64);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GcPhase {
  Prologue,
  Epilogue,
}

pub type GcCallback = Box<dyn FnMut(&mut Isolate, GcPhase) + Send>;

struct RegisteredCallback {
  id: GcCallbackId,
  phase: GcPhase,
  callback: GcCallback,
}

struct PendingSecondPass {
  callback: SecondPassCallback,
  param: u64,
  ready_to_call: bool,
}

#[derive(Default)]
pub(crate) struct GcData {
  state: GcState,
  runs: u64,
  pub(crate) pending_collection: bool,
  collecting: bool,
  /// Heap usage right after the last collection.
  live_bytes: usize,
  callbacks: Vec<RegisteredCallback>,
  walking: bool,
  pending_removals: Vec<GcCallbackId>,
  next_id: u64,
  second_pass: VecDeque<PendingSecondPass>,
}

impl Isolate {
  /// Runs a full collection now. Called from inside a collection, it only schedules another one
  /// and returns empty stats.
  pub fn collect_garbage(&mut self) -> GcStats {
    if self.is_disposed() {
      return GcStats::default();
    }
    if self.gc.collecting {
      self.gc.pending_collection = true;
      return GcStats::default();
    }
    self.gc.collecting = true;
    self.gc.pending_collection = false;

    self.poll_host_finalizations();
    self.run_gc_callbacks(GcPhase::Prologue);

    self.gc.state = GcState::Marking;
    self.mark();
    self.gc.state = GcState::Sweeping;
    let mut stats = self.sweep();
    stats.freed_chunks = self.heap.release_empty_chunks();
    stats.live_chunks = self.heap.chunk_count();
    self.gc.state = GcState::Idle;
    self.gc.runs += 1;
    self.gc.live_bytes = self.heap.used_bytes();

    self.run_gc_callbacks(GcPhase::Epilogue);
    stats.second_pass_callbacks = self.run_second_pass_callbacks();
    self.gc.collecting = false;

    tracing::debug!(
      isolate = self.id.0,
      run = self.gc.runs,
      freed_objects = stats.freed_objects,
      freed_bytes = stats.freed_bytes,
      freed_chunks = stats.freed_chunks,
      live_chunks = stats.live_chunks,
      weak_callbacks = stats.weak_callbacks,
      second_pass_callbacks = stats.second_pass_callbacks,
      "collection finished"
    );
    stats
  }

  /// Tells the isolate the embedder is idle. Collects if anything was allocated since the last
  /// collection or a collection is due, and returns whether it did.
  pub fn idle_notification(&mut self) -> bool {
    self.poll_host_finalizations();
    if !self.collection_due() && self.heap.used_bytes() <= self.gc.live_bytes {
      return false;
    }
    self.collect_garbage();
    true
  }

  /// A deferred collection was requested, or the heap has grown past the threshold.
  pub fn collection_due(&self) -> bool {
    self.gc.pending_collection
      || self.heap.used_bytes().saturating_sub(self.gc.live_bytes) >= self.options.gc_threshold_bytes
  }

  pub fn gc_state(&self) -> GcState {
    self.gc.state
  }

  /// Number of completed collections.
  pub fn gc_runs(&self) -> u64 {
    self.gc.runs
  }

  pub fn add_gc_prologue_callback(
    &mut self,
    callback: impl FnMut(&mut Isolate, GcPhase) + Send + 'static,
  ) -> GcCallbackId {
    self.add_gc_callback(GcPhase::Prologue, Box::new(callback))
  }

  pub fn add_gc_epilogue_callback(
    &mut self,
    callback: impl FnMut(&mut Isolate, GcPhase) + Send + 'static,
  ) -> GcCallbackId {
    self.add_gc_callback(GcPhase::Epilogue, Box::new(callback))
  }

  fn add_gc_callback(&mut self, phase: GcPhase, callback: GcCallback) -> GcCallbackId {
    let id = GcCallbackId(self.gc.next_id);
    self.gc.next_id += 1;
    self.gc.callbacks.push(RegisteredCallback {
      id,
      phase,
      callback,
    });
    id
  }

  /// Unregisters a GC callback. During a callback walk the removal takes effect once the walk
  /// is over; the removed callback is not called again in that walk.
  pub fn remove_gc_callback(&mut self, id: GcCallbackId) {
    if self.gc.walking {
      self.gc.pending_removals.push(id);
    } else {
      self.gc.callbacks.retain(|registered| registered.id != id);
    }
  }

  fn run_gc_callbacks(&mut self, phase: GcPhase) {
    let mut callbacks = mem::take(&mut self.gc.callbacks);
    self.gc.walking = true;
    for registered in callbacks.iter_mut() {
      if registered.phase != phase || self.gc.pending_removals.contains(&registered.id) {
        continue;
      }
      (registered.callback)(self, phase);
    }
    self.gc.walking = false;

    // Callbacks registered during the walk went into the now-empty list.
    callbacks.append(&mut self.gc.callbacks);
    let removals = mem::take(&mut self.gc.pending_removals);
    callbacks.retain(|registered| !removals.contains(&registered.id));
    self.gc.callbacks = callbacks;
  }

  fn mark_object(&mut self, obj: HeapRef, worklist: &mut Vec<HeapRef>) {
    if !self.heap.is_live(obj) {
      fatal!("reachable reference to {obj:?}, which is not a live heap object");
    }
    if self.heap.mark(obj) {
      worklist.push(obj);
    }
  }

  fn mark(&mut self) {
    self.heap.clear_marks();
    let maps: Vec<HeapRef> = self.heap.maps().collect();
    for map in maps {
      self.heap.mark(map);
    }

    let mut roots: Vec<Tagged> = self.roots.iter().map(Tagged::Heap).collect();
    for thread in self.threads.values() {
      thread.trace_roots(|value| roots.push(value));
    }
    self.globals.trace_strong(|value| roots.push(value));
    for &obj in self.bridges.by_host.values() {
      let held = self.heap.read_word(obj, bridge::HOST_REFS) > 0
        || self.heap.read_word(obj, bridge::PINS) > 0;
      if held {
        roots.push(Tagged::Heap(obj));
      }
    }

    let mut worklist = Vec::new();
    for root in roots {
      if let Tagged::Heap(obj) = root {
        self.mark_object(obj, &mut worklist);
      }
    }
    let mut children = Vec::new();
    while let Some(obj) = worklist.pop() {
      let kind = self.heap.kind_of(obj);
      self.heap.trace_object(obj, kind, |value| {
        if let Tagged::Heap(child) = value {
          children.push(child);
        }
      });
      for child in children.drain(..) {
        self.mark_object(child, &mut worklist);
      }
    }
  }

  /// Reclaims every unmarked object in three passes: weak callbacks first, then destructors, and
  /// only then the memory, so no callback or destructor sees a freed object.
  fn sweep(&mut self) -> GcStats {
    let mut stats = GcStats::default();
    let dead: Vec<(HeapRef, InstanceKind)> = self
      .heap
      .objects()
      .into_iter()
      .filter(|&obj| !self.heap.is_marked(obj))
      .map(|obj| (obj, self.heap.kind_of(obj)))
      .collect();
    if dead.is_empty() {
      return stats;
    }

    let dead_set: AHashSet<HeapRef> = dead.iter().map(|&(obj, _)| obj).collect();
    for (target, id) in self.globals.weak_targets(|obj| dead_set.contains(&obj)) {
      let entry = self.globals.entry_mut(id);
      entry.value = None;
      let Some(weak) = entry.weak.as_mut() else {
        continue;
      };
      let param = weak.param;
      let Some(callback) = weak.callback.take() else {
        continue;
      };
      let fields = if self.heap.kind_of(target) == InstanceKind::Bridge {
        self.internal_field_smis(target)
      } else {
        Vec::new()
      };
      let mut info = WeakCallbackInfo::new(param, fields);
      callback(&mut info);
      stats.weak_callbacks += 1;
      tracing::trace!(isolate = self.id.0, global = id.raw(), param, "weak callback ran");
      if let Some(callback) = info.second_pass.take() {
        self.gc.second_pass.push_back(PendingSecondPass {
          callback,
          param,
          ready_to_call: false,
        });
      }
    }

    for &(obj, kind) in &dead {
      self.destroy_object(obj, kind);
    }
    for &(obj, _) in &dead {
      stats.freed_bytes += self.heap.free(obj);
      stats.freed_objects += 1;
    }
    stats
  }

  /// Runs the second-pass callbacks queued by the collection that just finished, oldest first.
  fn run_second_pass_callbacks(&mut self) -> usize {
    for pending in &mut self.gc.second_pass {
      pending.ready_to_call = true;
    }
    let mut ran = 0;
    while self
      .gc
      .second_pass
      .front()
      .is_some_and(|pending| pending.ready_to_call)
    {
      let Some(pending) = self.gc.second_pass.pop_front() else {
        break;
      };
      (pending.callback)(self, pending.param);
      ran += 1;
    }
    ran
  }

  /// Releases what a dying object holds outside the heap. Runs exactly once per object, either
  /// from a sweep or from disposal.
  pub(crate) fn destroy_object(&mut self, obj: HeapRef, kind: InstanceKind) {
    match kind {
      InstanceKind::String => {
        if let Some(host) = HostValue::from_raw(self.heap.read_word(obj, string::HOST_VALUE)) {
          self.host.unprotect(host);
        }
      }
      InstanceKind::Bridge => {
        if let Some(host) = HostValue::from_raw(self.heap.read_word(obj, bridge::HOST_VALUE)) {
          if self.bridges.by_host.get(&host) == Some(&obj) {
            self.bridges.by_host.remove(&host);
          }
          if self.heap.read_word(obj, bridge::FLAGS) & bridge::FLAG_HOST_DEAD == 0 {
            self.host.unregister_finalizer(host);
          }
        }
        self.finalize_instance(obj);
      }
      InstanceKind::Context => {
        if let Ok(context) = self.host_context_of(obj) {
          self.host.release_context(context);
          if self.contexts.contexts.get(&context) == Some(&obj) {
            self.contexts.contexts.remove(&context);
          }
          self.registry.unregister_context(context);
          tracing::debug!(isolate = self.id.0, context = context.raw(), "context destroyed");
        }
      }
      InstanceKind::Map
      | InstanceKind::Oddball
      | InstanceKind::HeapNumber
      | InstanceKind::FixedArray
      | InstanceKind::Script => {}
    }
  }
}
