//! Execution contexts.
//!
//! A Context object stands for one host execution scope and its global object. Contexts are
//! entered and exited per thread in strict stack order; the innermost entered context is where
//! scripts run and where host operations are performed.

use crate::heap::object::context;
use crate::heap::InstanceKind;
use crate::host::HostContext;
use crate::isolate::Isolate;
use crate::scope::HandleScope;
use crate::tagged::{HeapRef, Tagged};
use crate::value::Local;
use crate::Error;
use ahash::AHashMap;
use core::ops::{Deref, DerefMut};

/// Contexts owned by one isolate, keyed by host context.
#[derive(Default)]
pub(crate) struct ContextGroup {
  pub(crate) contexts: AHashMap<HostContext, HeapRef>,
}

impl Isolate {
  /// The host scope of the innermost context entered on the current thread.
  pub(crate) fn current_host_context(&self) -> Result<HostContext, Error> {
    let obj = self
      .thread_ref()
      .and_then(|thread| thread.entered_contexts.last().copied())
      .ok_or(Error::NoContext)?;
    self.host_context_of(obj)
  }

  pub(crate) fn host_context_of(&self, obj: HeapRef) -> Result<HostContext, Error> {
    HostContext::from_raw(self.heap.read_word(obj, context::HOST_CONTEXT)).ok_or(Error::InvalidHandle)
  }

  /// Number of live contexts.
  pub fn context_count(&self) -> usize {
    self.contexts.contexts.len()
  }

  pub fn in_context(&self) -> bool {
    self
      .thread_ref()
      .is_some_and(|thread| !thread.entered_contexts.is_empty())
  }
}

impl<'i> HandleScope<'i> {
  /// Creates a context with a fresh host scope and global object.
  pub fn new_context(&mut self) -> Local<'i> {
    let isolate = &mut *self.isolate;
    let host_context = isolate.host.create_context();
    let global = isolate.host.context_global(host_context);
    let global = isolate.wrap_host(global);

    let size = InstanceKind::Context.instance_size().unwrap_or_default();
    let obj = isolate.heap.allocate(InstanceKind::Context, size);
    isolate
      .heap
      .write_word(obj, context::HOST_CONTEXT, host_context.raw());
    isolate.heap.write_field(obj, context::GLOBAL, Some(global));
    isolate.heap.write_field(obj, context::EMBEDDER_DATA, None);

    isolate.contexts.contexts.insert(host_context, obj);
    isolate.registry.register_context(host_context, isolate.id);
    tracing::debug!(isolate = isolate.id.0, context = host_context.raw(), "context created");
    self.local(Tagged::Heap(obj))
  }

  /// Pushes `context` on the current thread's entered-context stack.
  pub fn enter_context(&mut self, context: Local<'_>) -> Result<(), Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    self.isolate.thread().entered_contexts.push(obj);
    Ok(())
  }

  /// Pops `context`, which must be the most recently entered one.
  pub fn exit_context(&mut self, context: Local<'_>) -> Result<(), Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    let entered = &mut self.isolate.thread().entered_contexts;
    if entered.last() != Some(&obj) {
      return Err(Error::InvalidArgument("context is not the most recently entered one"));
    }
    entered.pop();
    Ok(())
  }

  pub fn current_context(&mut self) -> Option<Local<'i>> {
    let obj = *self.isolate.thread_ref()?.entered_contexts.last()?;
    Some(self.local(Tagged::Heap(obj)))
  }

  /// The host execution scope behind `context`, as known to [`crate::Runtime`].
  pub fn host_context(&self, context: Local<'_>) -> Result<HostContext, Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    self.isolate.host_context_of(obj)
  }

  /// The context's global object.
  pub fn context_global(&mut self, context: Local<'_>) -> Result<Local<'i>, Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    let global = self
      .isolate
      .heap
      .read_field(obj, context::GLOBAL)
      .ok_or(Error::InvalidHandle)?;
    Ok(self.local(global))
  }

  pub fn set_embedder_data(
    &mut self,
    context: Local<'_>,
    index: usize,
    value: Option<Local<'_>>,
  ) -> Result<(), Error> {
    if index >= self.isolate.options.max_embedder_data_slots {
      return Err(Error::InvalidArgument("embedder data index out of range"));
    }
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    let heap = &mut self.isolate.heap;
    let data = match heap.read_field(obj, context::EMBEDDER_DATA) {
      Some(Tagged::Heap(data)) if index < heap.fixed_array_len(data) => data,
      current => {
        let grown = heap.allocate_fixed_array((index + 1).next_power_of_two());
        if let Some(Tagged::Heap(old)) = current {
          for i in 0..heap.fixed_array_len(old) {
            let element = heap.fixed_array_get(old, i);
            heap.fixed_array_set(grown, i, element);
          }
        }
        heap.write_field(obj, context::EMBEDDER_DATA, Some(Tagged::Heap(grown)));
        grown
      }
    };
    heap.fixed_array_set(data, index, value.map(Local::tagged));
    Ok(())
  }

  pub fn embedder_data(&mut self, context: Local<'_>, index: usize) -> Result<Option<Local<'i>>, Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    let Some(Tagged::Heap(data)) = self.isolate.heap.read_field(obj, context::EMBEDDER_DATA) else {
      return Ok(None);
    };
    Ok(
      self
        .isolate
        .heap
        .fixed_array_get(data, index)
        .map(|value| self.local(value)),
    )
  }

  /// Enters `context` for the lifetime of the returned scope.
  pub fn context_scope(&mut self, context: Local<'_>) -> Result<ContextScope<'_>, Error> {
    let obj = self.isolate.expect_kind(context, InstanceKind::Context)?;
    let mut scope = self.reborrow();
    scope.isolate.thread().entered_contexts.push(obj);
    Ok(ContextScope { scope, context: obj })
  }
}

/// A handle scope with a context entered. Exits the context on drop.
pub struct ContextScope<'a> {
  scope: HandleScope<'a>,
  context: HeapRef,
}

impl Drop for ContextScope<'_> {
  fn drop(&mut self) {
    let entered = &mut self.scope.isolate.thread().entered_contexts;
    match entered.last() {
      Some(&top) if top == self.context => {
        entered.pop();
      }
      _ => tracing::warn!("context scope dropped while another context is entered on top of it"),
    }
  }
}

impl<'a> Deref for ContextScope<'a> {
  type Target = HandleScope<'a>;

  fn deref(&self) -> &HandleScope<'a> {
    &self.scope
  }
}

impl<'a> DerefMut for ContextScope<'a> {
  fn deref_mut(&mut self) -> &mut HandleScope<'a> {
    &mut self.scope
  }
}
