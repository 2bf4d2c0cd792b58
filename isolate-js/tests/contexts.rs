use isolate_js::{Error, HostEngine, Isolate, IsolateOptions, LocalHost, Runtime, ValueKind};

fn isolate() -> Isolate {
  Isolate::new(IsolateOptions::default(), LocalHost::new())
}

#[test]
fn contexts_exit_in_stack_order() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let a = scope.new_context();
  let b = scope.new_context();
  assert_eq!(scope.kind(a), ValueKind::Context);
  assert!(!scope.in_context());
  assert_eq!(scope.current_context(), None);

  scope.enter_context(a)?;
  scope.enter_context(b)?;
  assert_eq!(scope.current_context(), Some(b));
  assert_eq!(
    scope.exit_context(a),
    Err(Error::InvalidArgument("context is not the most recently entered one"))
  );
  scope.exit_context(b)?;
  assert_eq!(scope.current_context(), Some(a));
  scope.exit_context(a)?;
  assert!(!scope.in_context());
  Ok(())
}

#[test]
fn context_scope_exits_on_drop() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  {
    let mut inner = scope.context_scope(context)?;
    assert_eq!(inner.current_context(), Some(context));
    inner.new_object()?;
  }
  assert!(!scope.in_context());
  assert_eq!(scope.new_object(), Err(Error::NoContext));
  Ok(())
}

#[test]
fn global_object_is_visible_to_scripts() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let global = scope.context_global(context)?;
  assert!(scope.is_object(global));
  let seven = scope.integer(7);
  scope.set(global, "seven", seven)?;
  let result = scope.eval("seven", "lookup.js")?;
  assert_eq!(scope.to_number(result)?, 7.0);
  assert_eq!(scope.own_keys(global)?, vec!["seven".to_string()]);
  Ok(())
}

#[test]
fn embedder_data_grows_on_demand() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  assert!(scope.embedder_data(context, 0)?.is_none());

  let value = scope.string("data");
  scope.set_embedder_data(context, 5, Some(value))?;
  let first = scope.integer(1);
  scope.set_embedder_data(context, 0, Some(first))?;
  scope.collect_garbage();

  let read = scope.embedder_data(context, 5)?.expect("slot 5");
  assert_eq!(scope.to_rust_string(read)?, "data");
  assert_eq!(scope.embedder_data(context, 0)?.and_then(|v| v.as_smi()), Some(1));
  assert!(scope.embedder_data(context, 2)?.is_none());
  assert!(scope.embedder_data(context, 500)?.is_none());

  let limit = scope.options().max_embedder_data_slots;
  assert_eq!(
    scope.set_embedder_data(context, limit, None),
    Err(Error::InvalidArgument("embedder data index out of range"))
  );
  Ok(())
}

#[test]
fn unreachable_contexts_are_destroyed_and_unregistered() -> Result<(), Error> {
  let runtime = Runtime::new();
  let mut isolate = runtime.new_isolate(IsolateOptions::default(), LocalHost::new());
  assert_eq!(runtime.isolate_count(), 1);

  let host_context = {
    let mut scope = isolate.handle_scope();
    let context = scope.new_context();
    scope.host_context(context)?
  };
  assert_eq!(isolate.context_count(), 1);
  assert_eq!(runtime.isolate_for_context(host_context), Some(isolate.id()));
  let handle = runtime.handle_for_context(host_context).expect("registered");
  assert_eq!(handle.id(), isolate.id());

  isolate.collect_garbage();
  assert_eq!(isolate.context_count(), 0);
  assert_eq!(runtime.isolate_for_context(host_context), None);

  drop(isolate);
  assert_eq!(runtime.isolate_count(), 0);
  assert!(runtime.handle(handle.id()).is_none());
  Ok(())
}

#[test]
fn entered_contexts_are_roots() -> Result<(), Error> {
  let mut isolate = isolate();
  {
    let mut scope = isolate.handle_scope();
    let context = scope.new_context();
    scope.enter_context(context)?;
  }
  isolate.collect_garbage();
  assert_eq!(isolate.context_count(), 1);
  Ok(())
}

#[test]
fn object_operations_forward_to_the_host() -> Result<(), Error> {
  let host = LocalHost::new()
    .with_global_function("sum", |host, _this, args| {
      let total = args.iter().map(|&arg| host.to_number(arg)).sum();
      Ok(host.number(total))
    })
    .with_global_function("Thing", |host, _this, _args| Ok(host.undefined()));
  let mut isolate = Isolate::new(IsolateOptions::default(), host);
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let object = scope.new_object()?;
  let one = scope.integer(1);
  let half = scope.number(0.5);
  scope.set(object, "a", one)?;
  scope.set(object, "b", half)?;
  assert_eq!(scope.own_keys(object)?, vec!["a".to_string(), "b".to_string()]);
  assert!(scope.delete(object, "a")?);
  assert_eq!(scope.own_keys(object)?, vec!["b".to_string()]);
  let missing = scope.get(object, "a")?;
  assert!(scope.is_undefined(missing));

  let sum = scope.eval("sum", "sum.js")?;
  let this = scope.undefined();
  let two = scope.integer(2);
  let result = scope.call(sum, this, &[two, half])?;
  assert_eq!(scope.to_number(result)?, 2.5);

  let thing = scope.eval("Thing", "thing.js")?;
  let instance = scope.construct(thing, &[])?;
  assert!(scope.is_object(instance));
  assert_ne!(instance, thing);
  Ok(())
}
