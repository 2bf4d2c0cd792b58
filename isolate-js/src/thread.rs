use crate::exception::TryCatchFrame;
use crate::tagged::{HeapRef, Tagged, TaggedWord};

/// Per-thread state of an isolate.
///
/// Every thread that enters the isolate gets its own handle stack, try/catch stack, scheduled
/// exception slot and entered-context stack. All of it is a root set.
#[derive(Default)]
pub(crate) struct ThreadData {
  /// Locals of every open handle scope, innermost last. Escape slots hold the hole until used.
  pub(crate) handles: Vec<TaggedWord>,
  pub(crate) scope_depth: usize,
  pub(crate) try_catches: Vec<TryCatchFrame>,
  pub(crate) scheduled_exception: Option<TaggedWord>,
  pub(crate) entered_contexts: Vec<HeapRef>,
}

impl ThreadData {
  pub(crate) fn trace_roots(&self, mut visit: impl FnMut(Tagged)) {
    let words = self
      .handles
      .iter()
      .chain(self.try_catches.iter().filter_map(|frame| frame.exception.as_ref()))
      .chain(self.scheduled_exception.iter());
    for word in words {
      if let Some(value) = word.decode() {
        visit(value);
      }
    }
    for context in &self.entered_contexts {
      visit(Tagged::Heap(*context));
    }
  }

  /// Nothing on this thread refers into the heap.
  pub(crate) fn is_idle(&self) -> bool {
    self.handles.is_empty()
      && self.scope_depth == 0
      && self.try_catches.is_empty()
      && self.scheduled_exception.is_none()
      && self.entered_contexts.is_empty()
  }
}
