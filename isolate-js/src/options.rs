use serde::{Deserialize, Serialize};

/// Isolate construction options.
///
/// Every field has a default, so partial JSON documents are accepted by
/// [`IsolateOptions::from_json`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IsolateOptions {
  /// Once heap usage has grown by this many bytes since the last collection, a collection is
  /// due at the next event-loop turn or idle notification.
  pub gc_threshold_bytes: usize,
  /// Hard limit for live heap allocations, in bytes. Exceeding it is fatal.
  pub max_heap_bytes: usize,
  /// Build a message (with a reconstructed stack trace) for exceptions that reach no
  /// [`crate::TryCatch`].
  pub capture_stack_trace_for_uncaught_exceptions: bool,
  /// Upper bound for context embedder data indices.
  pub max_embedder_data_slots: usize,
  /// Upper bound for object internal field indices.
  pub max_internal_fields: usize,
}

impl Default for IsolateOptions {
  fn default() -> Self {
    Self {
      gc_threshold_bytes: 4 * 1024 * 1024,
      max_heap_bytes: 1024 * 1024 * 1024,
      capture_stack_trace_for_uncaught_exceptions: false,
      max_embedder_data_slots: 1024,
      max_internal_fields: 256,
    }
  }
}

impl IsolateOptions {
  /// Parses options from a JSON object. Missing fields take their default value.
  pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
    serde_json::from_str(text)
  }
}
