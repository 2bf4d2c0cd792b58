use isolate_js::{Error, HostEngine, InstanceKind, Isolate, IsolateOptions, LocalHost, ValueKind};

fn isolate() -> Isolate {
  Isolate::new(IsolateOptions::default(), LocalHost::new())
}

#[test]
fn integers_are_smis_and_never_allocate() -> Result<(), Error> {
  let mut isolate = isolate();
  let before = isolate.heap().used_bytes();
  let mut scope = isolate.handle_scope();

  let value = scope.integer(-7);
  assert!(value.is_smi());
  assert_eq!(value.as_smi(), Some(-7));
  assert_eq!(value.word().raw() & 1, 0);
  assert_eq!(scope.heap().used_bytes(), before);

  // Integral doubles in range are Smis too.
  let integral = scope.number(12.0);
  assert_eq!(integral.as_smi(), Some(12));
  assert_eq!(scope.heap().used_bytes(), before);

  let boxed = scope.number(1.5);
  assert!(scope.is_heap_number(boxed));
  assert_eq!(scope.kind(boxed), ValueKind::Number);
  assert_eq!(scope.heap().used_bytes(), before + 32);
  assert_eq!(scope.to_number(boxed)?, 1.5);
  Ok(())
}

#[test]
fn strings_cost_exactly_their_instance_size() -> Result<(), Error> {
  let mut isolate = isolate();
  let string_size = InstanceKind::String.instance_size().unwrap_or_default();
  assert_eq!(string_size, 32);
  let mut scope = isolate.handle_scope();

  let before = scope.heap().used_bytes();
  let hello = scope.string("hello");
  assert!(scope.is_string(hello));
  assert_eq!(scope.heap().used_bytes(), before + string_size);

  let before = scope.heap().used_bytes();
  let host = scope.host_mut().string("hello");
  let wrapped = scope.wrap(host);
  assert_eq!(scope.to_rust_string(wrapped)?, "hello");
  assert_eq!(scope.heap().used_bytes(), before + string_size);

  let before = scope.heap().used_bytes();
  let host = scope.host_mut().number(42.0);
  let answer = scope.wrap(host);
  assert_eq!(answer.as_smi(), Some(42));
  assert_eq!(scope.heap().used_bytes(), before);
  Ok(())
}

#[test]
fn singletons_compare_by_address() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let a = scope.undefined();
  let b = scope.undefined();
  assert_eq!(a, b);
  assert!(scope.is_undefined(a));
  assert!(scope.is_oddball(a));

  let t = scope.boolean(true);
  assert!(scope.to_boolean(t)?);
  let null = scope.null();
  assert!(scope.is_null(null));
  assert!(!scope.strict_equals(null, a)?);

  let empty = scope.empty_string();
  let also_empty = scope.string("");
  assert_eq!(empty, also_empty);
  assert_eq!(scope.string_length(empty), Some(0));
  Ok(())
}

#[test]
fn numbers_and_strings_compare_by_content() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let a = scope.number(0.5);
  let b = scope.number(0.5);
  assert_ne!(a, b);
  assert!(scope.strict_equals(a, b)?);

  let one = scope.integer(1);
  let boxed_one = scope.number(1.0);
  assert!(scope.strict_equals(one, boxed_one)?);

  let x = scope.string("héllo");
  let y = scope.string("héllo");
  assert!(scope.strict_equals(x, y)?);
  assert_eq!(scope.string_length(x), Some(5));
  assert_eq!(scope.to_rust_string(x)?, "héllo");
  Ok(())
}

#[test]
fn dropped_scope_releases_its_handles() {
  let mut isolate = isolate();
  let baseline = isolate.heap().used_bytes();
  {
    let mut scope = isolate.handle_scope();
    for i in 0..100 {
      scope.number(f64::from(i) + 0.5);
    }
    assert_eq!(scope.handle_count(), 100);
    assert_eq!(scope.heap().used_bytes(), baseline + 100 * 32);
    let stats = scope.collect_garbage();
    assert_eq!(stats.freed_objects, 0);
  }

  let stats = isolate.collect_garbage();
  assert_eq!(stats.freed_objects, 100);
  assert_eq!(stats.freed_bytes, 100 * 32);
  assert_eq!(isolate.heap().used_bytes(), baseline);
}

#[test]
fn nested_scopes_pop_only_their_own_handles() {
  let mut isolate = isolate();
  let mut outer = isolate.handle_scope();
  outer.number(0.25);
  {
    let mut inner = outer.reborrow();
    inner.number(0.75);
    inner.number(1.75);
    assert_eq!(inner.handle_count(), 2);
  }
  assert_eq!(outer.handle_count(), 1);
  let stats = outer.collect_garbage();
  assert_eq!(stats.freed_objects, 2);
}

#[test]
fn escaped_values_survive_the_inner_scope() -> Result<(), Error> {
  let mut isolate = isolate();
  let mut outer = isolate.handle_scope();
  let escaped = {
    let mut inner = outer.escapable();
    let array = inner.new_fixed_array(3);
    inner.number(9.5);
    inner.escape(array)
  };
  let stats = outer.collect_garbage();
  assert_eq!(stats.freed_objects, 1);
  assert_eq!(outer.fixed_array_len(escaped)?, 3);
  Ok(())
}

#[test]
#[should_panic(expected = "escape called twice")]
fn escaping_twice_is_fatal() {
  let mut isolate = isolate();
  let mut outer = isolate.handle_scope();
  let mut inner = outer.escapable();
  let value = inner.integer(1);
  inner.escape(value);
  inner.escape(value);
}

#[test]
fn fixed_array_elements_live_as_long_as_the_array() -> Result<(), Error> {
  let mut isolate = isolate();
  let baseline = isolate.heap().used_bytes();
  let mut scope = isolate.handle_scope();
  let array = {
    let mut inner = scope.escapable();
    let array = inner.new_fixed_array(2);
    let number = inner.number(2.5);
    inner.fixed_array_set(array, 0, Some(number))?;
    inner.escape(array)
  };

  scope.collect_garbage();
  let element = scope.fixed_array_get(array, 0)?.expect("element is kept alive by the array");
  assert_eq!(scope.to_number(element)?, 2.5);
  assert!(scope.fixed_array_get(array, 1)?.is_none());
  assert_eq!(
    scope.fixed_array_get(array, 2),
    Err(Error::InvalidArgument("index out of range"))
  );
  drop(scope);

  isolate.collect_garbage();
  assert_eq!(isolate.heap().used_bytes(), baseline);
  Ok(())
}

#[test]
fn allocation_spills_into_new_chunks_and_they_are_returned() {
  let mut isolate = isolate();
  assert_eq!(isolate.heap().chunk_count(), 1);
  {
    let mut scope = isolate.handle_scope();
    // Each array needs four whole 2 KiB blocks, so a 512 KiB chunk holds fewer than 64.
    for _ in 0..100 {
      scope.new_fixed_array(1000);
    }
    assert!(scope.heap().chunk_count() >= 2);
  }
  let chunks = isolate.heap().chunk_count();
  let stats = isolate.collect_garbage();
  assert_eq!(stats.freed_objects, 100);
  assert_eq!(stats.freed_chunks, chunks - 1);
  assert_eq!(stats.live_chunks, 1);
  assert_eq!(isolate.heap().chunk_count(), 1);
}

#[test]
fn handles_of_the_wrong_kind_are_rejected() {
  let mut isolate = isolate();
  let mut scope = isolate.handle_scope();
  let number = scope.integer(3);
  assert_eq!(scope.fixed_array_len(number), Err(Error::InvalidHandle));
  let string = scope.string("x");
  assert_eq!(scope.wrap_count(string), Err(Error::InvalidHandle));
}
