use crate::bridge::BridgeTable;
use crate::class::ClassRegistry;
use crate::context::ContextGroup;
use crate::dispatch::{IsolateHandle, TaskQueue};
use crate::exception::MessageListener;
use crate::gc::GcData;
use crate::global::GlobalTable;
use crate::heap::object::{oddball, string};
use crate::heap::{Heap, InstanceKind, OddballKind, SLOT_SIZE};
use crate::host::{HostEngine, HostValue};
use crate::options::IsolateOptions;
use crate::runtime::{IsolateId, Runtime, RuntimeRegistry};
use crate::tagged::{smi_from_f64, HeapRef, Tagged};
use crate::thread::ThreadData;
use ahash::AHashMap;
use std::sync::Arc;
use std::thread::{self, ThreadId};

/// Preallocated singletons. Compared by address.
pub(crate) struct Roots {
  pub(crate) undefined: HeapRef,
  pub(crate) null: HeapRef,
  pub(crate) true_value: HeapRef,
  pub(crate) false_value: HeapRef,
  pub(crate) empty_string: HeapRef,
}

impl Roots {
  pub(crate) fn iter(&self) -> impl Iterator<Item = HeapRef> {
    [
      self.undefined,
      self.null,
      self.true_value,
      self.false_value,
      self.empty_string,
    ]
    .into_iter()
  }
}

/// An isolated heap plus everything needed to run code against one host engine.
///
/// Used directly, an `Isolate` is single threaded and needs no locking. To share one between
/// threads, wrap it in a [`crate::SharedIsolate`] and enter it with a [`crate::Locker`].
pub struct Isolate {
  pub(crate) id: IsolateId,
  pub(crate) options: IsolateOptions,
  pub(crate) heap: Heap,
  pub(crate) host: Box<dyn HostEngine>,
  pub(crate) roots: Roots,
  pub(crate) threads: AHashMap<ThreadId, ThreadData>,
  pub(crate) current_thread: ThreadId,
  pub(crate) globals: GlobalTable,
  pub(crate) bridges: BridgeTable,
  pub(crate) classes: ClassRegistry,
  pub(crate) contexts: ContextGroup,
  pub(crate) registry: Arc<RuntimeRegistry>,
  pub(crate) gc: GcData,
  pub(crate) tasks: Arc<TaskQueue>,
  pub(crate) message_listeners: Vec<MessageListener>,
  disposed: bool,
}

/// Allocates a String object that keeps `value` protected in the host.
pub(crate) fn allocate_string(heap: &mut Heap, host: &mut dyn HostEngine, value: HostValue) -> HeapRef {
  let length = host
    .string_value(value)
    .map_or(0, |text| text.encode_utf16().count());
  host.protect(value);
  let obj = heap.allocate(InstanceKind::String, SLOT_SIZE);
  heap.write_word(obj, string::HOST_VALUE, value.raw());
  heap.write_word(obj, string::UTF16_LENGTH, length as u64);
  obj
}

fn allocate_oddball(heap: &mut Heap, kind: OddballKind) -> HeapRef {
  let obj = heap.allocate(InstanceKind::Oddball, SLOT_SIZE);
  heap.write_word(obj, oddball::KIND, kind as u64);
  obj
}

impl Isolate {
  /// Creates an isolate registered with a private [`Runtime`].
  pub fn new(options: IsolateOptions, host: impl HostEngine + 'static) -> Self {
    Runtime::new().new_isolate(options, host)
  }

  pub(crate) fn create(
    id: IsolateId,
    registry: Arc<RuntimeRegistry>,
    options: IsolateOptions,
    mut host: Box<dyn HostEngine>,
  ) -> Self {
    let mut heap = Heap::new(options.max_heap_bytes);
    let empty = host.string("");
    let roots = Roots {
      undefined: allocate_oddball(&mut heap, OddballKind::Undefined),
      null: allocate_oddball(&mut heap, OddballKind::Null),
      true_value: allocate_oddball(&mut heap, OddballKind::True),
      false_value: allocate_oddball(&mut heap, OddballKind::False),
      empty_string: allocate_string(&mut heap, host.as_mut(), empty),
    };

    let current_thread = thread::current().id();
    let tasks = Arc::new(TaskQueue::new(current_thread));
    let mut threads = AHashMap::new();
    threads.insert(current_thread, ThreadData::default());
    registry.register_isolate(id, IsolateHandle::new(id, Arc::clone(&tasks)));
    tracing::debug!(isolate = id.0, "isolate created");

    Self {
      id,
      options,
      heap,
      host,
      roots,
      threads,
      current_thread,
      globals: GlobalTable::default(),
      bridges: BridgeTable::default(),
      classes: ClassRegistry::default(),
      contexts: ContextGroup::default(),
      registry,
      gc: GcData::default(),
      tasks,
      message_listeners: Vec::new(),
      disposed: false,
    }
  }

  #[inline]
  pub fn id(&self) -> IsolateId {
    self.id
  }

  #[inline]
  pub fn options(&self) -> &IsolateOptions {
    &self.options
  }

  #[inline]
  pub fn heap(&self) -> &Heap {
    &self.heap
  }

  pub fn host(&self) -> &dyn HostEngine {
    self.host.as_ref()
  }

  pub fn host_mut(&mut self) -> &mut dyn HostEngine {
    self.host.as_mut()
  }

  /// Downcasts the host engine.
  pub fn host_as<H: HostEngine + 'static>(&self) -> Option<&H> {
    self.host.as_any().downcast_ref()
  }

  pub fn host_as_mut<H: HostEngine + 'static>(&mut self) -> Option<&mut H> {
    self.host.as_any_mut().downcast_mut()
  }

  pub fn is_disposed(&self) -> bool {
    self.disposed
  }

  /// Makes the calling thread the isolate's current thread. [`crate::Locker`] does this on
  /// acquisition; an isolate moved to another thread without one must call it before use.
  pub fn enter_current_thread(&mut self) {
    let id = thread::current().id();
    if self.current_thread != id {
      tracing::trace!(isolate = self.id.0, thread = ?id, "thread entered isolate");
    }
    self.current_thread = id;
    self.tasks.set_owner(id);
    self.threads.entry(id).or_default();
    // Threads that left nothing behind need not stay in the root set.
    let current = self.current_thread;
    self
      .threads
      .retain(|thread, data| *thread == current || !data.is_idle());
  }

  #[inline]
  pub fn current_thread(&self) -> ThreadId {
    self.current_thread
  }

  pub(crate) fn thread(&mut self) -> &mut ThreadData {
    let id = self.current_thread;
    self.threads.entry(id).or_default()
  }

  pub(crate) fn thread_ref(&self) -> Option<&ThreadData> {
    self.threads.get(&self.current_thread)
  }

  pub(crate) fn undefined_value(&self) -> Tagged {
    Tagged::Heap(self.roots.undefined)
  }

  pub(crate) fn null_value(&self) -> Tagged {
    Tagged::Heap(self.roots.null)
  }

  pub(crate) fn boolean_value(&self, value: bool) -> Tagged {
    Tagged::Heap(if value {
      self.roots.true_value
    } else {
      self.roots.false_value
    })
  }

  /// Smi when representable, otherwise a fresh HeapNumber.
  pub(crate) fn number_value(&mut self, value: f64) -> Tagged {
    if let Some(smi) = smi_from_f64(value) {
      return Tagged::Smi(smi);
    }
    let obj = self.heap.allocate(InstanceKind::HeapNumber, SLOT_SIZE);
    self
      .heap
      .write_word(obj, crate::heap::object::heap_number::VALUE, value.to_bits());
    Tagged::Heap(obj)
  }

  pub(crate) fn string_value(&mut self, text: &str) -> Tagged {
    if text.is_empty() {
      return Tagged::Heap(self.roots.empty_string);
    }
    let value = self.host.string(text);
    Tagged::Heap(allocate_string(&mut self.heap, self.host.as_mut(), value))
  }

  /// Wraps a host string that is already known to be a string.
  pub(crate) fn string_from_host(&mut self, value: HostValue) -> Tagged {
    Tagged::Heap(allocate_string(&mut self.heap, self.host.as_mut(), value))
  }

  /// Runs one turn of the embedder's event loop: drains host finalization notifications, runs a
  /// collection if one is due, then drains queued tasks. Returns the number of tasks run.
  pub fn run_event_loop_turn(&mut self) -> usize {
    self.poll_host_finalizations();
    if self.collection_due() {
      self.collect_garbage();
    }
    self.run_pending_tasks()
  }

  /// Tears the isolate down: refuses further tasks, runs every remaining destructor (weak
  /// callbacks do not run), releases all heap memory, unregisters the isolate and its contexts,
  /// and disposes the host engine. Idempotent; also run on drop.
  pub fn dispose(&mut self) {
    if self.disposed {
      return;
    }
    self.disposed = true;
    self.tasks.dispose();

    let outstanding = self.globals.len();
    if outstanding > 0 {
      tracing::warn!(
        isolate = self.id.0,
        outstanding,
        "disposing isolate with live global handles"
      );
    }

    let objects = self.heap.objects();
    for obj in objects {
      let kind = self.heap.kind_of(obj);
      if kind != InstanceKind::Map {
        self.destroy_object(obj, kind);
      }
    }
    self.globals.clear();
    self.threads.clear();
    self.heap.release_all();
    self.registry.unregister_isolate(self.id);
    self.host.dispose();
    tracing::debug!(isolate = self.id.0, "isolate disposed");
  }
}

impl Drop for Isolate {
  fn drop(&mut self) {
    self.dispose();
  }
}
