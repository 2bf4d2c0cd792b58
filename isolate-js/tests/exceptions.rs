use isolate_js::{Error, ExceptionMessage, Isolate, IsolateOptions, LocalHost, StackFrame};
use std::sync::{Arc, Mutex};

fn failing_host() -> LocalHost {
  LocalHost::new().with_global_function("fail", |host, _this, _args| {
    Err(host.new_error("Error", "bad input", Some("fail@native.js:3:7\nglobal code@main.js:1:1")))
  })
}

fn listen(isolate: &mut Isolate) -> Arc<Mutex<Vec<ExceptionMessage>>> {
  let seen = Arc::new(Mutex::new(Vec::new()));
  let sink = Arc::clone(&seen);
  isolate.add_message_listener(move |message| sink.lock().unwrap().push(message.clone()));
  seen
}

#[test]
fn try_catch_catches_thrown_values() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let mut try_catch = scope.try_catch();
  assert!(!try_catch.has_caught());
  assert_eq!(try_catch.eval("throw \"boom\"", "throw.js"), Err(Error::Exception));
  assert!(try_catch.has_caught());
  let exception = try_catch.exception().expect("caught");
  assert_eq!(try_catch.to_rust_string(exception)?, "boom");
  assert_eq!(try_catch.message().map(|message| message.message), Some("boom".to_string()));

  try_catch.reset();
  assert!(!try_catch.has_caught());
  assert!(try_catch.exception().is_none());
  drop(try_catch);

  assert!(!scope.has_scheduled_exception());
  Ok(())
}

#[test]
fn syntax_errors_are_thrown_by_compile() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let mut try_catch = scope.try_catch();
  assert_eq!(try_catch.compile("{nope", "bad.js"), Err(Error::Exception));
  let message = try_catch.message().expect("message");
  assert!(message.message.starts_with("SyntaxError: "), "{}", message.message);
  assert_eq!(message.script_name(), Some("bad.js"));
  assert_eq!(message.line_number(), Some(1));
  assert_eq!(message.frames[0].function, None);
  drop(try_catch);

  let script = scope.compile("[1, 2]", "good.js")?;
  assert_eq!(scope.script_name(script)?, "good.js");
  let array = scope.run(script)?;
  let length = scope.get(array, "length")?;
  assert_eq!(length.as_smi(), Some(2));
  Ok(())
}

#[test]
fn uncaught_exceptions_become_scheduled() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let seen = listen(&mut isolate);
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  assert_eq!(scope.eval("throw 5", "five.js"), Err(Error::Exception));
  assert!(scope.has_scheduled_exception());
  assert_eq!(seen.lock().unwrap().len(), 1);
  assert_eq!(seen.lock().unwrap()[0].message, "5");

  // The scheduled exception is a root until taken.
  scope.collect_garbage();
  let exception = scope.take_scheduled_exception().expect("scheduled");
  assert_eq!(exception.as_smi(), Some(5));
  assert!(!scope.has_scheduled_exception());
  assert!(scope.take_scheduled_exception().is_none());
  Ok(())
}

#[test]
fn verbose_try_catch_reports_to_listeners() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let seen = listen(&mut isolate);
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  {
    let mut quiet = scope.try_catch();
    assert!(!quiet.is_verbose());
    let _ = quiet.eval("throw 1", "quiet.js");
  }
  assert!(seen.lock().unwrap().is_empty());

  {
    let mut verbose = scope.try_catch();
    verbose.set_verbose(true);
    let _ = verbose.eval("throw 2", "verbose.js");
    assert!(verbose.has_caught());
  }
  assert_eq!(seen.lock().unwrap().len(), 1);
  assert_eq!(seen.lock().unwrap()[0].message, "2");
  assert!(!scope.has_scheduled_exception());
  Ok(())
}

#[test]
fn rethrow_passes_the_exception_outwards() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let mut outer = scope.try_catch();
  {
    let mut inner = outer.try_catch();
    let _ = inner.eval("throw \"inner\"", "inner.js");
    assert!(inner.has_caught());
    assert_eq!(inner.rethrow(), Error::Exception);
  }
  assert!(outer.has_caught());
  let exception = outer.exception().expect("rethrown");
  assert_eq!(outer.to_rust_string(exception)?, "inner");
  Ok(())
}

#[test]
fn embedder_thrown_values_are_caught_like_script_ones() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let mut try_catch = scope.try_catch();
  let value = try_catch.string("from rust");
  assert_eq!(try_catch.throw_exception(value), Error::Exception);
  let caught = try_catch.exception().expect("caught");
  assert!(try_catch.strict_equals(caught, value)?);
  assert_eq!(try_catch.message().map(|message| message.message), Some("from rust".to_string()));
  Ok(())
}

#[test]
fn converting_a_symbol_to_a_string_throws() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let symbol = scope
    .host_as_mut::<LocalHost>()
    .expect("local host")
    .new_symbol(Some("tag"));
  let mut try_catch = scope.try_catch();
  let symbol = try_catch.wrap(symbol);
  assert_eq!(try_catch.to_rust_string(symbol), Err(Error::Exception));
  let message = try_catch.message().expect("message");
  assert_eq!(message.message, "TypeError: Cannot convert a Symbol value to a string");
  Ok(())
}

#[test]
fn native_errors_carry_host_stack_frames() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), failing_host());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let function = scope.eval("fail", "main.js")?;
  assert!(scope.is_function(function));
  let this = scope.undefined();
  let mut try_catch = scope.try_catch();
  assert_eq!(try_catch.call(function, this, &[]), Err(Error::Exception));

  let message = try_catch.message().expect("message");
  assert_eq!(message.message, "Error: bad input");
  assert_eq!(
    message.frames,
    vec![
      StackFrame {
        function: Some(Arc::from("fail")),
        source: Arc::from("native.js"),
        line: 3,
        col: 7,
      },
      StackFrame {
        function: None,
        source: Arc::from("main.js"),
        line: 1,
        col: 1,
      },
    ]
  );
  assert_eq!(
    try_catch.stack_trace().as_deref(),
    Some("at fail (native.js:3:7)\nat main.js:1:1")
  );
  Ok(())
}

#[test]
fn uncaught_stack_frames_are_kept_only_when_asked_for() -> Result<(), Error> {
  for capture in [false, true] {
    let options = IsolateOptions {
      capture_stack_trace_for_uncaught_exceptions: capture,
      ..IsolateOptions::default()
    };
    let mut isolate = Isolate::new(options, failing_host());
    let seen = listen(&mut isolate);
    let mut scope = isolate.handle_scope();
    let context = scope.new_context();
    let mut scope = scope.context_scope(context)?;

    let function = scope.eval("fail", "main.js")?;
    let this = scope.undefined();
    assert_eq!(scope.call(function, this, &[]), Err(Error::Exception));
    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0].frames.len(), if capture { 2 } else { 0 });
  }
  Ok(())
}

#[test]
fn calling_a_non_function_is_rejected_before_the_host_sees_it() -> Result<(), Error> {
  let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
  let mut scope = isolate.handle_scope();
  let context = scope.new_context();
  let mut scope = scope.context_scope(context)?;

  let object = scope.new_object()?;
  let this = scope.undefined();
  assert_eq!(scope.call(object, this, &[]), Err(Error::NotAFunction));
  let number = scope.integer(4);
  assert_eq!(scope.get(number, "x"), Err(Error::NotAnObject));
  assert!(!scope.has_scheduled_exception());
  Ok(())
}
