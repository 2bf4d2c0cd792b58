use crate::dispatch::IsolateHandle;
use crate::host::{HostContext, HostEngine};
use crate::isolate::Isolate;
use crate::options::IsolateOptions;
use ahash::AHashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct IsolateId(pub(crate) u32);

impl IsolateId {
  pub fn raw(self) -> u32 {
    self.0
  }
}

/// Process-level registry of isolates and the host contexts they own.
///
/// Host code that only has a host context (for example inside a native callback running on an
/// arbitrary thread) uses this to find the isolate, and a dispatch handle to reach it.
///
/// Isolates keep the registry alive, so dropping the `Runtime` while isolates still exist is
/// allowed; they unregister themselves when disposed.
pub struct Runtime {
  registry: Arc<RuntimeRegistry>,
}

impl Default for Runtime {
  fn default() -> Self {
    Self::new()
  }
}

impl Runtime {
  pub fn new() -> Self {
    Self {
      registry: Arc::new(RuntimeRegistry::default()),
    }
  }

  pub fn new_isolate(&self, options: IsolateOptions, host: impl HostEngine + 'static) -> Isolate {
    let id = IsolateId(self.registry.next_isolate.fetch_add(1, Ordering::Relaxed));
    Isolate::create(id, Arc::clone(&self.registry), options, Box::new(host))
  }

  pub fn isolate_count(&self) -> usize {
    self.registry.state.lock().isolates.len()
  }

  pub fn isolate_for_context(&self, context: HostContext) -> Option<IsolateId> {
    self.registry.state.lock().contexts.get(&context).copied()
  }

  pub fn handle(&self, id: IsolateId) -> Option<IsolateHandle> {
    self.registry.state.lock().isolates.get(&id).cloned()
  }

  pub fn handle_for_context(&self, context: HostContext) -> Option<IsolateHandle> {
    let state = self.registry.state.lock();
    let id = state.contexts.get(&context)?;
    state.isolates.get(id).cloned()
  }
}

#[derive(Default)]
pub(crate) struct RuntimeRegistry {
  next_isolate: AtomicU32,
  state: Mutex<RegistryState>,
}

#[derive(Default)]
struct RegistryState {
  isolates: AHashMap<IsolateId, IsolateHandle>,
  contexts: AHashMap<HostContext, IsolateId>,
}

impl RuntimeRegistry {
  pub(crate) fn register_isolate(&self, id: IsolateId, handle: IsolateHandle) {
    self.state.lock().isolates.insert(id, handle);
  }

  /// Also drops every context still registered to the isolate.
  pub(crate) fn unregister_isolate(&self, id: IsolateId) {
    let mut state = self.state.lock();
    state.isolates.remove(&id);
    state.contexts.retain(|_, owner| *owner != id);
  }

  pub(crate) fn register_context(&self, context: HostContext, id: IsolateId) {
    self.state.lock().contexts.insert(context, id);
  }

  pub(crate) fn unregister_context(&self, context: HostContext) {
    self.state.lock().contexts.remove(&context);
  }
}
