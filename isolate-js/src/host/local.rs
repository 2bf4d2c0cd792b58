//! An in-process host engine.
//!
//! Values live in an index table with protect counts; [`LocalHost::collect`] marks from protected
//! values and context globals and reports collected values that asked for finalization. Scripts
//! are JSON literals, optionally prefixed with `throw `, or a bare identifier naming a property
//! of the context's global object. Native functions are Rust closures.

use super::{HostContext, HostEngine, HostResult, HostType, HostValue};
use crate::value::number_to_string;
use ahash::AHashMap;
use core::any::Any;
use core::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Host context ids are drawn from one process-wide counter so they never collide across hosts.
static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(1);

/// A native function: `(host, this, args) -> result`.
pub type NativeFunction =
  Arc<dyn Fn(&mut LocalHost, HostValue, &[HostValue]) -> HostResult<HostValue> + Send + Sync>;

enum LocalValue {
  Undefined,
  Null,
  Boolean(bool),
  Number(f64),
  String(Arc<str>),
  Symbol(Option<Arc<str>>),
  Object(LocalObject),
}

#[derive(Default)]
struct LocalObject {
  properties: Vec<(String, HostValue)>,
  function: Option<NativeFunction>,
}

struct Entry {
  value: LocalValue,
  protect_count: u32,
  finalizer: bool,
}

impl Entry {
  fn new(value: LocalValue) -> Self {
    Self {
      value,
      protect_count: 0,
      finalizer: false,
    }
  }
}

enum Program {
  Empty,
  Value(serde_json::Value),
  Throw(serde_json::Value),
  Identifier(String),
}

fn is_identifier(text: &str) -> bool {
  let mut chars = text.chars();
  let Some(first) = chars.next() else {
    return false;
  };
  (first.is_ascii_alphabetic() || first == '_' || first == '$')
    && chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    && !matches!(text, "true" | "false" | "null")
}

fn parse_program(source: &str) -> Result<Program, serde_json::Error> {
  let text = source.trim().trim_end_matches(';').trim_end();
  if text.is_empty() {
    return Ok(Program::Empty);
  }
  if let Some(rest) = text.strip_prefix("throw ") {
    return serde_json::from_str(rest).map(Program::Throw);
  }
  if is_identifier(text) {
    return Ok(Program::Identifier(text.to_string()));
  }
  serde_json::from_str(text).map(Program::Value)
}

#[inline]
fn id_of(index: usize) -> HostValue {
  HostValue(NonZeroU64::MIN.saturating_add(index as u64))
}

#[inline]
fn index_of(value: HostValue) -> usize {
  (value.raw() - 1) as usize
}

pub struct LocalHost {
  values: Vec<Option<Entry>>,
  free: Vec<usize>,
  /// Context → global object.
  contexts: AHashMap<HostContext, HostValue>,
  global_functions: Vec<(String, NativeFunction)>,
  finalized: Vec<HostValue>,
  undefined: HostValue,
  null: HostValue,
  true_value: HostValue,
  false_value: HostValue,
}

impl Default for LocalHost {
  fn default() -> Self {
    Self::new()
  }
}

impl LocalHost {
  pub fn new() -> Self {
    let permanent = |value| {
      Some(Entry {
        value,
        protect_count: 1,
        finalizer: false,
      })
    };
    Self {
      values: vec![
        permanent(LocalValue::Undefined),
        permanent(LocalValue::Null),
        permanent(LocalValue::Boolean(true)),
        permanent(LocalValue::Boolean(false)),
      ],
      free: Vec::new(),
      contexts: AHashMap::new(),
      global_functions: Vec::new(),
      finalized: Vec::new(),
      undefined: id_of(0),
      null: id_of(1),
      true_value: id_of(2),
      false_value: id_of(3),
    }
  }

  /// Installs `function` under `name` on the global object of every context created afterwards.
  pub fn with_global_function(
    mut self,
    name: &str,
    function: impl Fn(&mut LocalHost, HostValue, &[HostValue]) -> HostResult<HostValue>
      + Send
      + Sync
      + 'static,
  ) -> Self {
    self
      .global_functions
      .push((name.to_string(), Arc::new(function)));
    self
  }

  /// Number of values currently held in the table.
  pub fn live_values(&self) -> usize {
    self.values.iter().filter(|entry| entry.is_some()).count()
  }

  pub fn is_protected(&self, value: HostValue) -> bool {
    self
      .entry(value)
      .is_some_and(|entry| entry.protect_count > 0)
  }

  pub fn new_symbol(&mut self, description: Option<&str>) -> HostValue {
    self.alloc(LocalValue::Symbol(description.map(Arc::from)))
  }

  pub fn new_function(&mut self, function: NativeFunction) -> HostValue {
    self.alloc(LocalValue::Object(LocalObject {
      properties: Vec::new(),
      function: Some(function),
    }))
  }

  /// Creates an error object with `name`, `message` and optionally `stack` properties.
  pub fn new_error(&mut self, name: &str, message: &str, stack: Option<&str>) -> HostValue {
    let error = self.alloc(LocalValue::Object(LocalObject::default()));
    let name = self.string(name);
    self.define(error, "name", name);
    let message = self.string(message);
    self.define(error, "message", message);
    if let Some(stack) = stack {
      let stack = self.string(stack);
      self.define(error, "stack", stack);
    }
    error
  }

  /// Reads an own property without running any script.
  pub fn property(&self, object: HostValue, key: &str) -> Option<HostValue> {
    self
      .object(object)?
      .properties
      .iter()
      .find(|(name, _)| name == key)
      .map(|(_, value)| *value)
  }

  /// Marks from protected values and context globals, then frees everything unreachable.
  /// Returns the number of values freed.
  pub fn collect(&mut self) -> usize {
    let mut marked = vec![false; self.values.len()];
    let mut worklist: Vec<HostValue> = self
      .values
      .iter()
      .enumerate()
      .filter(|(_, entry)| entry.as_ref().is_some_and(|entry| entry.protect_count > 0))
      .map(|(index, _)| id_of(index))
      .collect();
    worklist.extend(self.contexts.values().copied());

    while let Some(value) = worklist.pop() {
      let index = index_of(value);
      if index >= marked.len() || marked[index] {
        continue;
      }
      marked[index] = true;
      if let Some(object) = self.object(value) {
        worklist.extend(object.properties.iter().map(|(_, value)| *value));
      }
    }

    let mut freed = 0;
    for (index, slot) in self.values.iter_mut().enumerate() {
      if marked[index] {
        continue;
      }
      if let Some(entry) = slot.take() {
        if entry.finalizer {
          self.finalized.push(id_of(index));
        }
        self.free.push(index);
        freed += 1;
      }
    }
    tracing::trace!(freed, "local host collected");
    freed
  }

  fn alloc(&mut self, value: LocalValue) -> HostValue {
    match self.free.pop() {
      Some(index) => {
        self.values[index] = Some(Entry::new(value));
        id_of(index)
      }
      None => {
        self.values.push(Some(Entry::new(value)));
        id_of(self.values.len() - 1)
      }
    }
  }

  fn entry(&self, value: HostValue) -> Option<&Entry> {
    self.values.get(index_of(value))?.as_ref()
  }

  fn entry_mut(&mut self, value: HostValue) -> Option<&mut Entry> {
    self.values.get_mut(index_of(value))?.as_mut()
  }

  fn object(&self, value: HostValue) -> Option<&LocalObject> {
    match &self.entry(value)?.value {
      LocalValue::Object(object) => Some(object),
      _ => None,
    }
  }

  fn object_mut(&mut self, value: HostValue) -> Option<&mut LocalObject> {
    match &mut self.entry_mut(value)?.value {
      LocalValue::Object(object) => Some(object),
      _ => None,
    }
  }

  fn define(&mut self, object: HostValue, key: &str, value: HostValue) -> bool {
    let Some(object) = self.object_mut(object) else {
      return false;
    };
    match object.properties.iter_mut().find(|(name, _)| name == key) {
      Some((_, slot)) => *slot = value,
      None => object.properties.push((key.to_string(), value)),
    }
    true
  }

  fn type_error(&mut self, message: &str) -> HostValue {
    self.new_error("TypeError", message, None)
  }

  fn from_json(&mut self, json: &serde_json::Value) -> HostValue {
    match json {
      serde_json::Value::Null => self.null,
      serde_json::Value::Bool(value) => self.boolean(*value),
      serde_json::Value::Number(number) => self.number(number.as_f64().unwrap_or(f64::NAN)),
      serde_json::Value::String(text) => self.string(text),
      serde_json::Value::Array(items) => {
        let array = self.alloc(LocalValue::Object(LocalObject::default()));
        for (index, item) in items.iter().enumerate() {
          let item = self.from_json(item);
          self.define(array, &index.to_string(), item);
        }
        let length = self.number(items.len() as f64);
        self.define(array, "length", length);
        array
      }
      serde_json::Value::Object(fields) => {
        let object = self.alloc(LocalValue::Object(LocalObject::default()));
        for (key, item) in fields {
          let item = self.from_json(item);
          self.define(object, key, item);
        }
        object
      }
    }
  }

  fn run_program(
    &mut self,
    context: HostContext,
    program: Program,
  ) -> HostResult<HostValue> {
    match program {
      Program::Empty => Ok(self.undefined),
      Program::Value(json) => Ok(self.from_json(&json)),
      Program::Throw(json) => Err(self.from_json(&json)),
      Program::Identifier(name) => {
        let global = self.context_global(context);
        match self.property(global, &name) {
          Some(value) => Ok(value),
          None => Err(self.new_error("ReferenceError", &format!("{name} is not defined"), None)),
        }
      }
    }
  }

  fn syntax_error(&mut self, error: &serde_json::Error, name: &str) -> HostValue {
    let stack = format!("global code@{name}:{}:{}", error.line(), error.column());
    self.new_error("SyntaxError", &error.to_string(), Some(&stack))
  }
}

impl HostEngine for LocalHost {
  fn create_context(&mut self) -> HostContext {
    let raw = NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed);
    let context = HostContext(NonZeroU64::MIN.saturating_add(raw - 1));
    let global = self.alloc(LocalValue::Object(LocalObject::default()));
    for (name, function) in self.global_functions.clone() {
      let function = self.new_function(function);
      self.define(global, &name, function);
    }
    self.contexts.insert(context, global);
    context
  }

  fn context_global(&mut self, context: HostContext) -> HostValue {
    self.contexts.get(&context).copied().unwrap_or(self.undefined)
  }

  fn release_context(&mut self, context: HostContext) {
    self.contexts.remove(&context);
  }

  fn undefined(&mut self) -> HostValue {
    self.undefined
  }

  fn null(&mut self) -> HostValue {
    self.null
  }

  fn boolean(&mut self, value: bool) -> HostValue {
    if value {
      self.true_value
    } else {
      self.false_value
    }
  }

  fn number(&mut self, value: f64) -> HostValue {
    self.alloc(LocalValue::Number(value))
  }

  fn string(&mut self, value: &str) -> HostValue {
    self.alloc(LocalValue::String(Arc::from(value)))
  }

  fn new_object(&mut self, _context: HostContext) -> HostValue {
    self.alloc(LocalValue::Object(LocalObject::default()))
  }

  fn type_of(&self, value: HostValue) -> HostType {
    match self.entry(value).map(|entry| &entry.value) {
      None | Some(LocalValue::Undefined) => HostType::Undefined,
      Some(LocalValue::Null) => HostType::Null,
      Some(LocalValue::Boolean(_)) => HostType::Boolean,
      Some(LocalValue::Number(_)) => HostType::Number,
      Some(LocalValue::String(_)) => HostType::String,
      Some(LocalValue::Symbol(_)) => HostType::Symbol,
      Some(LocalValue::Object(object)) if object.function.is_some() => HostType::Function,
      Some(LocalValue::Object(_)) => HostType::Object,
    }
  }

  fn to_boolean(&self, value: HostValue) -> bool {
    match self.entry(value).map(|entry| &entry.value) {
      None | Some(LocalValue::Undefined | LocalValue::Null) => false,
      Some(LocalValue::Boolean(value)) => *value,
      Some(LocalValue::Number(value)) => *value != 0.0 && !value.is_nan(),
      Some(LocalValue::String(value)) => !value.is_empty(),
      Some(LocalValue::Symbol(_) | LocalValue::Object(_)) => true,
    }
  }

  fn to_number(&self, value: HostValue) -> f64 {
    match self.entry(value).map(|entry| &entry.value) {
      Some(LocalValue::Null) => 0.0,
      Some(LocalValue::Boolean(value)) => f64::from(u8::from(*value)),
      Some(LocalValue::Number(value)) => *value,
      Some(LocalValue::String(text)) => {
        let text = text.trim();
        if text.is_empty() {
          0.0
        } else {
          text.parse().unwrap_or(f64::NAN)
        }
      }
      _ => f64::NAN,
    }
  }

  fn string_value(&self, value: HostValue) -> Option<String> {
    match &self.entry(value)?.value {
      LocalValue::String(text) => Some(text.to_string()),
      _ => None,
    }
  }

  fn to_string(&mut self, _context: HostContext, value: HostValue) -> HostResult<String> {
    if self.type_of(value) == HostType::Symbol {
      return Err(self.type_error("Cannot convert a Symbol value to a string"));
    }
    let text = match self.entry(value).map(|entry| &entry.value) {
      None | Some(LocalValue::Undefined) => "undefined".to_string(),
      Some(LocalValue::Null) => "null".to_string(),
      Some(LocalValue::Boolean(value)) => value.to_string(),
      Some(LocalValue::Number(value)) => number_to_string(*value),
      Some(LocalValue::String(text)) => text.to_string(),
      Some(LocalValue::Symbol(description)) => {
        format!("Symbol({})", description.as_deref().unwrap_or(""))
      }
      Some(LocalValue::Object(object)) if object.function.is_some() => {
        "function () { [native code] }".to_string()
      }
      Some(LocalValue::Object(_)) => {
        let name = self
          .property(value, "name")
          .and_then(|name| self.string_value(name));
        let message = self
          .property(value, "message")
          .and_then(|message| self.string_value(message));
        match (name, message) {
          (Some(name), Some(message)) if !message.is_empty() => format!("{name}: {message}"),
          (Some(name), _) => name,
          (None, _) => "[object Object]".to_string(),
        }
      }
    };
    Ok(text)
  }

  fn strict_equals(&self, a: HostValue, b: HostValue) -> bool {
    let (Some(left), Some(right)) = (self.entry(a), self.entry(b)) else {
      return false;
    };
    match (&left.value, &right.value) {
      (LocalValue::Undefined, LocalValue::Undefined) | (LocalValue::Null, LocalValue::Null) => true,
      (LocalValue::Boolean(x), LocalValue::Boolean(y)) => x == y,
      (LocalValue::Number(x), LocalValue::Number(y)) => x == y,
      (LocalValue::String(x), LocalValue::String(y)) => x == y,
      _ => a == b,
    }
  }

  fn get(&mut self, _context: HostContext, object: HostValue, key: &str) -> HostResult<HostValue> {
    if self.object(object).is_none() {
      return Err(self.type_error(&format!("Cannot read property '{key}' of non-object")));
    }
    Ok(self.property(object, key).unwrap_or(self.undefined))
  }

  fn set(
    &mut self,
    _context: HostContext,
    object: HostValue,
    key: &str,
    value: HostValue,
  ) -> HostResult<()> {
    if self.define(object, key, value) {
      Ok(())
    } else {
      Err(self.type_error(&format!("Cannot set property '{key}' of non-object")))
    }
  }

  fn delete(&mut self, _context: HostContext, object: HostValue, key: &str) -> HostResult<bool> {
    if self.object(object).is_none() {
      return Err(self.type_error(&format!("Cannot delete property '{key}' of non-object")));
    }
    if let Some(object) = self.object_mut(object) {
      object.properties.retain(|(name, _)| name != key);
    }
    Ok(true)
  }

  fn own_keys(&mut self, _context: HostContext, object: HostValue) -> HostResult<Vec<String>> {
    let keys = self.object(object).map(|object| {
      object
        .properties
        .iter()
        .map(|(name, _)| name.clone())
        .collect()
    });
    match keys {
      Some(keys) => Ok(keys),
      None => Err(self.type_error("Cannot list keys of non-object")),
    }
  }

  fn call(
    &mut self,
    _context: HostContext,
    function: HostValue,
    this: HostValue,
    args: &[HostValue],
  ) -> HostResult<HostValue> {
    let native = self.object(function).and_then(|object| object.function.clone());
    match native {
      Some(native) => native(self, this, args),
      None => Err(self.type_error("value is not a function")),
    }
  }

  fn construct(
    &mut self,
    context: HostContext,
    function: HostValue,
    args: &[HostValue],
  ) -> HostResult<HostValue> {
    let instance = self.new_object(context);
    let result = self.call(context, function, instance, args)?;
    match self.type_of(result) {
      HostType::Object | HostType::Function => Ok(result),
      _ => Ok(instance),
    }
  }

  fn check_syntax(&mut self, _context: HostContext, source: &str, name: &str) -> HostResult<()> {
    match parse_program(source) {
      Ok(_) => Ok(()),
      Err(error) => Err(self.syntax_error(&error, name)),
    }
  }

  fn evaluate(&mut self, context: HostContext, source: &str, name: &str) -> HostResult<HostValue> {
    match parse_program(source) {
      Ok(program) => self.run_program(context, program),
      Err(error) => Err(self.syntax_error(&error, name)),
    }
  }

  fn exception_stack(&mut self, exception: HostValue) -> Option<String> {
    let stack = self.property(exception, "stack")?;
    self.string_value(stack)
  }

  fn protect(&mut self, value: HostValue) {
    match self.entry_mut(value) {
      Some(entry) => entry.protect_count += 1,
      None => tracing::warn!(?value, "protecting a collected value"),
    }
  }

  fn unprotect(&mut self, value: HostValue) {
    match self.entry_mut(value) {
      Some(entry) => {
        debug_assert!(entry.protect_count > 0, "unbalanced unprotect of {value:?}");
        entry.protect_count = entry.protect_count.saturating_sub(1);
      }
      None => tracing::warn!(?value, "unprotecting a collected value"),
    }
  }

  fn register_finalizer(&mut self, value: HostValue) {
    if let Some(entry) = self.entry_mut(value) {
      entry.finalizer = true;
    }
  }

  fn unregister_finalizer(&mut self, value: HostValue) {
    if let Some(entry) = self.entry_mut(value) {
      entry.finalizer = false;
    }
  }

  fn take_finalized(&mut self) -> Vec<HostValue> {
    std::mem::take(&mut self.finalized)
  }

  fn collect_garbage(&mut self) -> usize {
    self.collect()
  }

  fn dispose(&mut self) {
    self.contexts.clear();
    self.finalized.clear();
    self.values.truncate(4);
    self.free.clear();
  }

  fn as_any(&self) -> &dyn Any {
    self
  }

  fn as_any_mut(&mut self) -> &mut dyn Any {
    self
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn context(host: &mut LocalHost) -> HostContext {
    host.create_context()
  }

  #[test]
  fn evaluates_json_programs() {
    let mut host = LocalHost::new();
    let ctx = context(&mut host);
    let value = host.evaluate(ctx, r#"{"a": [1, 2]}"#, "test.js").unwrap();
    let array = host.property(value, "a").unwrap();
    let length = host.property(array, "length").unwrap();
    assert_eq!(host.to_number(length), 2.0);
    assert_eq!(host.own_keys(ctx, array).unwrap(), vec!["0", "1", "length"]);
  }

  #[test]
  fn throw_programs_and_syntax_errors_become_exceptions() {
    let mut host = LocalHost::new();
    let ctx = context(&mut host);
    let thrown = host.evaluate(ctx, "throw \"boom\"", "a.js").unwrap_err();
    assert_eq!(host.string_value(thrown).as_deref(), Some("boom"));

    let error = host.evaluate(ctx, "{nope", "b.js").unwrap_err();
    assert!(host.to_string(ctx, error).unwrap().starts_with("SyntaxError: "));
    let stack = host.exception_stack(error).unwrap();
    assert!(stack.starts_with("global code@b.js:1:"));
  }

  #[test]
  fn identifiers_resolve_against_the_global_object() {
    let mut host = LocalHost::new().with_global_function("answer", |host, _this, _args| {
      Ok(host.number(42.0))
    });
    let ctx = context(&mut host);
    let function = host.evaluate(ctx, "answer", "c.js").unwrap();
    assert_eq!(host.type_of(function), HostType::Function);
    let undefined = host.undefined();
    let result = host.call(ctx, function, undefined, &[]).unwrap();
    assert_eq!(host.to_number(result), 42.0);

    let missing = host.evaluate(ctx, "missing", "c.js").unwrap_err();
    assert_eq!(
      host.to_string(ctx, missing).unwrap(),
      "ReferenceError: missing is not defined"
    );
  }

  #[test]
  fn collection_reports_registered_finalizers() {
    let mut host = LocalHost::new();
    let ctx = context(&mut host);
    let kept = host.new_object(ctx);
    let dropped = host.new_object(ctx);
    host.protect(kept);
    host.register_finalizer(kept);
    host.register_finalizer(dropped);

    assert!(host.collect() >= 1);
    assert_eq!(host.take_finalized(), vec![dropped]);
    assert_eq!(host.type_of(kept), HostType::Object);

    host.unprotect(kept);
    host.collect();
    assert_eq!(host.take_finalized(), vec![kept]);
  }

  #[test]
  fn context_globals_keep_their_properties_alive() {
    let mut host = LocalHost::new();
    let ctx = context(&mut host);
    let global = host.context_global(ctx);
    let value = host.string("kept");
    host.set(ctx, global, "x", value).unwrap();
    host.collect();
    assert_eq!(host.string_value(value).as_deref(), Some("kept"));

    host.release_context(ctx);
    host.collect();
    assert_eq!(host.string_value(value), None);
  }
}
