use isolate_js::{DispatchError, Isolate, IsolateOptions, LocalHost};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

fn isolate() -> Isolate {
  Isolate::new(IsolateOptions::default(), LocalHost::new())
}

#[test]
fn posted_tasks_run_in_submission_order() {
  let mut isolate = isolate();
  let handle = isolate.handle();
  let order = Arc::new(Mutex::new(Vec::new()));

  let poster = {
    let order = Arc::clone(&order);
    thread::spawn(move || {
      for i in 0..10 {
        let order = Arc::clone(&order);
        handle
          .post(move |_: &mut Isolate| order.lock().unwrap().push(i))
          .unwrap();
      }
    })
  };
  poster.join().unwrap();

  assert_eq!(isolate.handle().pending_tasks(), 10);
  assert_eq!(isolate.run_pending_tasks(), 10);
  assert_eq!(*order.lock().unwrap(), (0..10).collect::<Vec<_>>());
  assert_eq!(isolate.run_pending_tasks(), 0);
}

#[test]
fn sync_blocks_until_the_owner_runs_the_task() {
  let mut isolate = isolate();
  let handle = isolate.handle();
  let owner = thread::current().id();

  let caller = thread::spawn(move || {
    handle.sync(move |isolate: &mut Isolate| {
      assert_eq!(thread::current().id(), owner);
      isolate.context_count() + 41
    })
  });
  while !caller.is_finished() {
    isolate.wait_for_tasks(Some(Duration::from_millis(10)));
    isolate.run_pending_tasks();
  }
  assert_eq!(caller.join().unwrap(), Ok(41));
}

#[test]
fn sync_runs_after_everything_queued_before_it() {
  let mut isolate = isolate();
  let handle = isolate.handle();
  let order = Arc::new(Mutex::new(Vec::new()));

  for i in 0..3 {
    let order = Arc::clone(&order);
    handle
      .post(move |_: &mut Isolate| order.lock().unwrap().push(i))
      .unwrap();
  }
  let caller = {
    let order = Arc::clone(&order);
    thread::spawn(move || {
      handle.sync(move |_: &mut Isolate| {
        let mut order = order.lock().unwrap();
        let seen = order.clone();
        order.push(99);
        seen
      })
    })
  };
  while isolate.handle().pending_tasks() < 4 {
    thread::sleep(Duration::from_millis(1));
  }
  // The caller stays blocked until the owner drains its queue.
  thread::sleep(Duration::from_millis(20));
  assert!(!caller.is_finished());

  assert_eq!(isolate.run_pending_tasks(), 4);
  assert_eq!(caller.join().unwrap(), Ok(vec![0, 1, 2]));
  assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 99]);
}

#[test]
fn sync_on_the_owning_thread_is_refused() {
  let isolate = isolate();
  let handle = isolate.handle();
  assert_eq!(handle.sync(|_: &mut Isolate| ()), Err(DispatchError::OwnerThread));
  assert_eq!(handle.pending_tasks(), 0);
}

#[test]
fn disposal_abandons_queued_tasks_and_refuses_new_ones() {
  let mut isolate = isolate();
  let handle = isolate.handle();

  let caller = {
    let handle = handle.clone();
    thread::spawn(move || handle.sync(|_: &mut Isolate| 1))
  };
  while handle.pending_tasks() == 0 {
    thread::sleep(Duration::from_millis(1));
  }
  isolate.dispose();
  assert_eq!(caller.join().unwrap(), Err(DispatchError::Abandoned));

  assert!(handle.is_disposed());
  assert_eq!(handle.post(|_: &mut Isolate| ()), Err(DispatchError::Disposed));
  let late = thread::spawn(move || handle.sync(|_: &mut Isolate| 2));
  assert_eq!(late.join().unwrap(), Err(DispatchError::Disposed));
}

#[test]
fn tasks_queued_while_draining_run_in_the_same_drain() {
  let mut isolate = isolate();
  let handle = isolate.handle();
  let ran = Arc::new(AtomicUsize::new(0));

  let first = Arc::clone(&ran);
  handle
    .post(move |isolate: &mut Isolate| {
      first.fetch_add(1, Ordering::SeqCst);
      let second = Arc::clone(&first);
      isolate
        .handle()
        .post(move |_: &mut Isolate| {
          second.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    })
    .unwrap();

  assert_eq!(isolate.run_event_loop_turn(), 2);
  assert_eq!(ran.load(Ordering::SeqCst), 2);
}

#[test]
fn wake_hook_fires_for_each_submission() {
  let mut isolate = isolate();
  let wakes = Arc::new(AtomicUsize::new(0));
  let counter = Arc::clone(&wakes);
  isolate.set_wake_hook(Some(Arc::new(move || {
    counter.fetch_add(1, Ordering::SeqCst);
  })));

  let handle = isolate.handle();
  thread::spawn(move || {
    handle.post(|_: &mut Isolate| ()).unwrap();
    handle.post(|_: &mut Isolate| ()).unwrap();
  })
  .join()
  .unwrap();
  assert_eq!(wakes.load(Ordering::SeqCst), 2);
  assert!(isolate.wait_for_tasks(Some(Duration::ZERO)));
  assert_eq!(isolate.run_pending_tasks(), 2);

  isolate.set_wake_hook(None);
  isolate.handle().post(|_: &mut Isolate| ()).unwrap();
  assert_eq!(wakes.load(Ordering::SeqCst), 2);
}
