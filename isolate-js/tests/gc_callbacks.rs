use isolate_js::{GcCallbackId, GcPhase, GcState, Isolate, IsolateOptions, LocalHost, Runtime};
use std::sync::{Arc, Mutex};

fn isolate() -> Isolate {
  Isolate::new(IsolateOptions::default(), LocalHost::new())
}

#[test]
fn prologue_and_epilogue_callbacks_bracket_each_collection() {
  let mut isolate = isolate();
  let log = Arc::new(Mutex::new(Vec::new()));
  let recorder = |log: &Arc<Mutex<Vec<(GcPhase, GcState, u64)>>>| {
    let log = Arc::clone(log);
    move |isolate: &mut Isolate, phase: GcPhase| {
      log.lock().unwrap().push((phase, isolate.gc_state(), isolate.gc_runs()));
    }
  };
  isolate.add_gc_prologue_callback(recorder(&log));
  isolate.add_gc_epilogue_callback(recorder(&log));

  isolate.collect_garbage();
  isolate.collect_garbage();
  assert_eq!(
    *log.lock().unwrap(),
    vec![
      (GcPhase::Prologue, GcState::Idle, 0),
      (GcPhase::Epilogue, GcState::Idle, 1),
      (GcPhase::Prologue, GcState::Idle, 1),
      (GcPhase::Epilogue, GcState::Idle, 2),
    ]
  );
}

#[test]
fn a_callback_may_remove_itself_during_the_walk() {
  let mut isolate = isolate();
  let calls = Arc::new(Mutex::new(Vec::new()));
  let own_id = Arc::new(Mutex::new(None::<GcCallbackId>));

  let id = {
    let calls = Arc::clone(&calls);
    let own_id = Arc::clone(&own_id);
    isolate.add_gc_prologue_callback(move |isolate: &mut Isolate, _| {
      calls.lock().unwrap().push("once");
      if let Some(id) = *own_id.lock().unwrap() {
        isolate.remove_gc_callback(id);
      }
    })
  };
  *own_id.lock().unwrap() = Some(id);
  let later = {
    let calls = Arc::clone(&calls);
    isolate.add_gc_prologue_callback(move |_: &mut Isolate, _| {
      calls.lock().unwrap().push("always");
    })
  };

  isolate.collect_garbage();
  isolate.collect_garbage();
  assert_eq!(*calls.lock().unwrap(), vec!["once", "always", "always"]);

  isolate.remove_gc_callback(later);
  isolate.collect_garbage();
  assert_eq!(calls.lock().unwrap().len(), 3);
}

#[test]
fn collecting_from_a_callback_is_deferred() {
  let mut isolate = isolate();
  isolate.add_gc_prologue_callback(|isolate: &mut Isolate, _| {
    let stats = isolate.collect_garbage();
    assert_eq!(stats, Default::default());
  });

  isolate.collect_garbage();
  assert_eq!(isolate.gc_runs(), 1);
  assert!(isolate.collection_due());
  assert!(isolate.idle_notification());
  assert_eq!(isolate.gc_runs(), 2);
}

#[test]
fn idle_notification_collects_only_after_allocation() {
  let mut isolate = isolate();
  isolate.collect_garbage();
  assert!(!isolate.idle_notification());

  isolate.handle_scope().number(0.5);
  assert!(isolate.idle_notification());
  assert_eq!(isolate.gc_runs(), 2);
  assert!(!isolate.idle_notification());
}

#[test]
fn event_loop_turns_collect_once_the_threshold_is_crossed() {
  let options = IsolateOptions {
    gc_threshold_bytes: 64 * 32,
    ..IsolateOptions::default()
  };
  let mut isolate = Isolate::new(options, LocalHost::new());
  isolate.collect_garbage();

  {
    let mut scope = isolate.handle_scope();
    for i in 0..10 {
      scope.number(f64::from(i) + 0.5);
    }
  }
  isolate.run_event_loop_turn();
  assert_eq!(isolate.gc_runs(), 1);

  {
    let mut scope = isolate.handle_scope();
    for i in 0..64 {
      scope.number(f64::from(i) + 0.5);
    }
  }
  assert!(isolate.collection_due());
  isolate.run_event_loop_turn();
  assert_eq!(isolate.gc_runs(), 2);
  assert!(!isolate.collection_due());
}

#[test]
fn options_parse_from_partial_json() {
  let options = IsolateOptions::from_json(
    r#"{"gc_threshold_bytes": 1024, "capture_stack_trace_for_uncaught_exceptions": true}"#,
  )
  .unwrap();
  assert_eq!(options.gc_threshold_bytes, 1024);
  assert!(options.capture_stack_trace_for_uncaught_exceptions);
  assert_eq!(
    options.max_internal_fields,
    IsolateOptions::default().max_internal_fields
  );

  assert!(IsolateOptions::from_json(r#"{"gc_threshold": 1}"#).is_err());
  assert_eq!(IsolateOptions::from_json("{}").unwrap(), IsolateOptions::default());
}

#[test]
fn runtime_tracks_isolates_until_they_are_disposed() {
  let runtime = Runtime::new();
  let mut first = runtime.new_isolate(IsolateOptions::default(), LocalHost::new());
  let second = runtime.new_isolate(IsolateOptions::default(), LocalHost::new());
  assert_ne!(first.id(), second.id());
  assert_eq!(runtime.isolate_count(), 2);

  first.dispose();
  assert!(first.is_disposed());
  assert_eq!(runtime.isolate_count(), 1);
  assert!(runtime.handle(first.id()).is_none());
  assert!(runtime.handle(second.id()).is_some());

  // Disposal is idempotent.
  drop(first);
  assert_eq!(runtime.isolate_count(), 1);
}
