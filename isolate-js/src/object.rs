//! Object and function operations, forwarded to the host in the current context.

use crate::host::{HostContext, HostResult, HostType, HostValue};
use crate::scope::HandleScope;
use crate::value::Local;
use crate::Error;

impl<'i> HandleScope<'i> {
  /// Converts a host result, recording a thrown value as the pending exception.
  fn host_result<T>(&mut self, result: HostResult<T>) -> Result<T, Error> {
    result.map_err(|exception| self.isolate.throw_host_exception(exception))
  }

  fn object_host_value(&mut self, object: Local<'_>) -> Result<HostValue, Error> {
    let host = match object.heap_ref() {
      Some(obj) if self.isolate.heap.kind_of(obj) == crate::heap::InstanceKind::Bridge => {
        self.isolate.bridge_host_value(obj)?
      }
      _ => return Err(Error::NotAnObject),
    };
    match self.isolate.host.type_of(host) {
      HostType::Object | HostType::Function => Ok(host),
      _ => Err(Error::NotAnObject),
    }
  }

  fn function_host_value(&mut self, function: Local<'_>) -> Result<HostValue, Error> {
    let host = self
      .object_host_value(function)
      .map_err(|_| Error::NotAFunction)?;
    if self.isolate.host.type_of(host) != HostType::Function {
      return Err(Error::NotAFunction);
    }
    Ok(host)
  }

  fn host_args(&mut self, args: &[Local<'_>]) -> Result<Vec<HostValue>, Error> {
    args
      .iter()
      .map(|arg| self.isolate.to_host(arg.tagged()))
      .collect()
  }

  fn context(&self) -> Result<HostContext, Error> {
    self.isolate.current_host_context()
  }

  pub fn new_object(&mut self) -> Result<Local<'i>, Error> {
    let context = self.context()?;
    let host = self.isolate.host.new_object(context);
    Ok(self.wrap(host))
  }

  pub fn get(&mut self, object: Local<'_>, key: &str) -> Result<Local<'i>, Error> {
    let context = self.context()?;
    let target = self.object_host_value(object)?;
    let result = self.isolate.host.get(context, target, key);
    let value = self.host_result(result)?;
    Ok(self.wrap(value))
  }

  pub fn set(&mut self, object: Local<'_>, key: &str, value: Local<'_>) -> Result<(), Error> {
    let context = self.context()?;
    let target = self.object_host_value(object)?;
    let value = self.isolate.to_host(value.tagged())?;
    let result = self.isolate.host.set(context, target, key, value);
    self.host_result(result)
  }

  /// Returns whether the property is gone afterwards.
  pub fn delete(&mut self, object: Local<'_>, key: &str) -> Result<bool, Error> {
    let context = self.context()?;
    let target = self.object_host_value(object)?;
    let result = self.isolate.host.delete(context, target, key);
    self.host_result(result)
  }

  pub fn own_keys(&mut self, object: Local<'_>) -> Result<Vec<String>, Error> {
    let context = self.context()?;
    let target = self.object_host_value(object)?;
    let result = self.isolate.host.own_keys(context, target);
    self.host_result(result)
  }

  pub fn call(
    &mut self,
    function: Local<'_>,
    this: Local<'_>,
    args: &[Local<'_>],
  ) -> Result<Local<'i>, Error> {
    let context = self.context()?;
    let function = self.function_host_value(function)?;
    let this = self.isolate.to_host(this.tagged())?;
    let args = self.host_args(args)?;
    let result = self.isolate.host.call(context, function, this, &args);
    let value = self.host_result(result)?;
    Ok(self.wrap(value))
  }

  pub fn construct(&mut self, function: Local<'_>, args: &[Local<'_>]) -> Result<Local<'i>, Error> {
    let context = self.context()?;
    let function = self.function_host_value(function)?;
    let args = self.host_args(args)?;
    let result = self.isolate.host.construct(context, function, &args);
    let value = self.host_result(result)?;
    Ok(self.wrap(value))
  }
}
