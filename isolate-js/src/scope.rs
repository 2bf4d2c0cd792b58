use crate::error::fatal;
use crate::heap::InstanceKind;
use crate::isolate::Isolate;
use crate::tagged::{Tagged, TaggedWord};
use crate::value::Local;
use crate::Error;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

/// A region of the current thread's handle stack.
///
/// Every [`Local`] created through a scope is pushed onto the handle stack and keeps its referent
/// alive until the scope is dropped, which truncates the stack back to where the scope started.
/// Nested scopes are created with [`HandleScope::reborrow`]; the borrow checker keeps locals of an
/// inner scope from outliving it.
pub struct HandleScope<'i> {
  pub(crate) isolate: &'i mut Isolate,
  handles_at_entry: usize,
}

impl Isolate {
  /// Opens the outermost handle scope for the current thread.
  pub fn handle_scope(&mut self) -> HandleScope<'_> {
    HandleScope::new(self)
  }
}

impl<'i> HandleScope<'i> {
  pub(crate) fn new(isolate: &'i mut Isolate) -> Self {
    let thread = isolate.thread();
    let handles_at_entry = thread.handles.len();
    thread.scope_depth += 1;
    Self {
      isolate,
      handles_at_entry,
    }
  }

  /// Opens a nested scope. Locals created in it are released when it is dropped.
  pub fn reborrow(&mut self) -> HandleScope<'_> {
    HandleScope::new(&mut *self.isolate)
  }

  /// Opens a nested scope that may promote one local into this scope.
  pub fn escapable(&mut self) -> EscapableHandleScope<'_, 'i> {
    let escape_slot = {
      let thread = self.isolate.thread();
      thread.handles.push(TaggedWord::HOLE);
      thread.handles.len() - 1
    };
    EscapableHandleScope {
      scope: HandleScope::new(&mut *self.isolate),
      escape_slot,
      escaped: false,
      _outer: PhantomData,
    }
  }

  #[inline]
  pub fn isolate(&self) -> &Isolate {
    self.isolate
  }

  #[inline]
  pub fn isolate_mut(&mut self) -> &mut Isolate {
    self.isolate
  }

  /// Number of handles created in this scope (nested scopes included while they are open).
  pub fn handle_count(&self) -> usize {
    self
      .isolate
      .thread_ref()
      .map_or(0, |thread| thread.handles.len() - self.handles_at_entry)
  }

  /// Roots `value` in this scope.
  pub(crate) fn local(&mut self, value: Tagged) -> Local<'i> {
    self.isolate.thread().handles.push(value.encode());
    Local::from_tagged(value)
  }

  pub fn undefined(&mut self) -> Local<'i> {
    let value = self.isolate.undefined_value();
    self.local(value)
  }

  pub fn null(&mut self) -> Local<'i> {
    let value = self.isolate.null_value();
    self.local(value)
  }

  pub fn boolean(&mut self, value: bool) -> Local<'i> {
    let value = self.isolate.boolean_value(value);
    self.local(value)
  }

  pub fn empty_string(&mut self) -> Local<'i> {
    let value = Tagged::Heap(self.isolate.roots.empty_string);
    self.local(value)
  }

  /// Never allocates: every `i32` is a Smi.
  pub fn integer(&mut self, value: i32) -> Local<'i> {
    self.local(Tagged::Smi(value))
  }

  /// A Smi when `value` is integral and in range, otherwise a heap number.
  pub fn number(&mut self, value: f64) -> Local<'i> {
    let value = self.isolate.number_value(value);
    self.local(value)
  }

  pub fn string(&mut self, text: &str) -> Local<'i> {
    let value = self.isolate.string_value(text);
    self.local(value)
  }

  /// Re-roots an existing value in this scope.
  pub fn local_of(&mut self, value: Local<'_>) -> Local<'i> {
    self.local(value.tagged())
  }

  /// A heap array of `len` holes. Elements keep their referents alive while the array is live.
  pub fn new_fixed_array(&mut self, len: usize) -> Local<'i> {
    let obj = self.isolate.heap.allocate_fixed_array(len);
    self.local(Tagged::Heap(obj))
  }

  pub fn fixed_array_len(&self, array: Local<'_>) -> Result<usize, Error> {
    let obj = self.isolate.expect_kind(array, InstanceKind::FixedArray)?;
    Ok(self.isolate.heap.fixed_array_len(obj))
  }

  pub fn fixed_array_get(&mut self, array: Local<'_>, index: usize) -> Result<Option<Local<'i>>, Error> {
    let obj = self.isolate.expect_kind(array, InstanceKind::FixedArray)?;
    if index >= self.isolate.heap.fixed_array_len(obj) {
      return Err(Error::InvalidArgument("index out of range"));
    }
    Ok(
      self
        .isolate
        .heap
        .fixed_array_get(obj, index)
        .map(|value| self.local(value)),
    )
  }

  pub fn fixed_array_set(
    &mut self,
    array: Local<'_>,
    index: usize,
    value: Option<Local<'_>>,
  ) -> Result<(), Error> {
    let obj = self.isolate.expect_kind(array, InstanceKind::FixedArray)?;
    if index >= self.isolate.heap.fixed_array_len(obj) {
      return Err(Error::InvalidArgument("index out of range"));
    }
    self
      .isolate
      .heap
      .fixed_array_set(obj, index, value.map(Local::tagged));
    Ok(())
  }
}

impl Drop for HandleScope<'_> {
  fn drop(&mut self) {
    let handles_at_entry = self.handles_at_entry;
    let thread = self.isolate.thread();
    debug_assert!(thread.handles.len() >= handles_at_entry);
    thread.handles.truncate(handles_at_entry);
    thread.scope_depth -= 1;
  }
}

impl Deref for HandleScope<'_> {
  type Target = Isolate;

  fn deref(&self) -> &Isolate {
    self.isolate
  }
}

impl DerefMut for HandleScope<'_> {
  fn deref_mut(&mut self) -> &mut Isolate {
    self.isolate
  }
}

/// A nested scope with one reserved slot in its parent.
///
/// [`EscapableHandleScope::escape`] copies a value into that slot, so it survives this scope and
/// stays rooted for the parent's lifetime `'o`. Escaping twice is a fatal error.
pub struct EscapableHandleScope<'a, 'o> {
  scope: HandleScope<'a>,
  escape_slot: usize,
  escaped: bool,
  _outer: PhantomData<&'o ()>,
}

impl<'a, 'o> EscapableHandleScope<'a, 'o> {
  pub fn escape(&mut self, value: Local<'_>) -> Local<'o> {
    if self.escaped {
      fatal!("escape called twice on the same escapable handle scope");
    }
    self.escaped = true;
    let slot = self.escape_slot;
    self.scope.isolate.thread().handles[slot] = value.word();
    Local::from_tagged(value.tagged())
  }
}

impl<'a> Deref for EscapableHandleScope<'a, '_> {
  type Target = HandleScope<'a>;

  fn deref(&self) -> &HandleScope<'a> {
    &self.scope
  }
}

impl<'a> DerefMut for EscapableHandleScope<'a, '_> {
  fn deref_mut(&mut self) -> &mut HandleScope<'a> {
    &mut self.scope
  }
}
