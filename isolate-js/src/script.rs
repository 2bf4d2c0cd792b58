use crate::heap::object::script;
use crate::heap::InstanceKind;
use crate::scope::HandleScope;
use crate::tagged::{HeapRef, Tagged};
use crate::value::Local;
use crate::Error;

impl<'i> HandleScope<'i> {
  /// Checks `source` for syntax errors in the current context and returns a runnable Script.
  ///
  /// A syntax error is thrown like any other exception: it lands in the innermost `TryCatch` or
  /// becomes the scheduled exception.
  pub fn compile(&mut self, source: &str, name: &str) -> Result<Local<'i>, Error> {
    let context = self.isolate.current_host_context()?;
    let checked = self.isolate.host.check_syntax(context, source, name);
    checked.map_err(|exception| self.isolate.throw_host_exception(exception))?;

    // Both strings are rooted before the script object is allocated.
    let source = self.string(source);
    let name = self.string(name);
    let size = InstanceKind::Script.instance_size().unwrap_or_default();
    let heap = &mut self.isolate.heap;
    let obj = heap.allocate(InstanceKind::Script, size);
    heap.write_field(obj, script::SOURCE, Some(source.tagged()));
    heap.write_field(obj, script::NAME, Some(name.tagged()));
    Ok(self.local(Tagged::Heap(obj)))
  }

  fn script_text(&self, obj: HeapRef, field: usize) -> Result<String, Error> {
    let string = match self.isolate.heap.read_field(obj, field) {
      Some(Tagged::Heap(string)) => string,
      _ => return Err(Error::InvalidHandle),
    };
    let host = self.isolate.string_host_value(string)?;
    self
      .isolate
      .host
      .string_value(host)
      .ok_or(Error::Host("script text is not a host string".to_string()))
  }

  pub fn script_name(&self, script: Local<'_>) -> Result<String, Error> {
    let obj = self.isolate.expect_kind(script, InstanceKind::Script)?;
    self.script_text(obj, script::NAME)
  }

  /// Runs a compiled script in the current context.
  pub fn run(&mut self, script: Local<'_>) -> Result<Local<'i>, Error> {
    let obj = self.isolate.expect_kind(script, InstanceKind::Script)?;
    let source = self.script_text(obj, script::SOURCE)?;
    let name = self.script_text(obj, script::NAME)?;
    let context = self.isolate.current_host_context()?;
    let result = self.isolate.host.evaluate(context, &source, &name);
    let value = result.map_err(|exception| self.isolate.throw_host_exception(exception))?;
    Ok(self.wrap(value))
  }

  /// Compiles and runs `source`.
  pub fn eval(&mut self, source: &str, name: &str) -> Result<Local<'i>, Error> {
    let mut scope = self.escapable();
    let script = scope.compile(source, name)?;
    let value = scope.run(script)?;
    Ok(scope.escape(value))
  }
}
