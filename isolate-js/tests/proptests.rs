use isolate_js::{Isolate, IsolateOptions, LocalHost, WeakCallbackInfo};
use proptest::prelude::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn accounted_bytes(len: usize) -> usize {
  (16 + 8 * len).div_ceil(32) * 32
}

proptest! {
  #[test]
  fn collection_keeps_exactly_the_rooted_arrays(
    arrays in prop::collection::vec((0usize..300, any::<bool>()), 0..40),
  ) {
    let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
    isolate.collect_garbage();
    let baseline = isolate.heap().used_bytes();

    let mut globals = Vec::new();
    let mut expected = baseline;
    {
      let mut scope = isolate.handle_scope();
      for &(len, keep) in &arrays {
        let array = scope.new_fixed_array(len);
        if keep {
          globals.push(scope.new_global(array).unwrap());
          expected += accounted_bytes(len);
        }
      }
    }

    isolate.collect_garbage();
    prop_assert_eq!(isolate.heap().used_bytes(), expected);
    prop_assert_eq!(isolate.global_count(), globals.len());

    for global in globals {
      isolate.reset_global(global);
    }
    isolate.collect_garbage();
    prop_assert_eq!(isolate.heap().used_bytes(), baseline);
    prop_assert_eq!(isolate.heap().chunk_count(), 1);
  }

  #[test]
  fn weak_callbacks_fire_once_per_weak_global(weak in prop::collection::vec(any::<bool>(), 0..24)) {
    let mut isolate = Isolate::new(IsolateOptions::default(), LocalHost::new());
    let fired = Arc::new(AtomicUsize::new(0));
    let mut globals = Vec::new();
    for &is_weak in &weak {
      let global = {
        let mut scope = isolate.handle_scope();
        let array = scope.new_fixed_array(1);
        scope.new_global(array).unwrap()
      };
      if is_weak {
        let fired = Arc::clone(&fired);
        isolate.set_weak(&global, 0, Some(Box::new(move |_: &mut WeakCallbackInfo| {
          fired.fetch_add(1, Ordering::SeqCst);
        })));
      }
      globals.push(global);
    }

    let weak_count = weak.iter().filter(|&&is_weak| is_weak).count();
    let stats = isolate.collect_garbage();
    prop_assert_eq!(stats.weak_callbacks, weak_count);
    prop_assert_eq!(stats.freed_objects, weak_count);
    prop_assert_eq!(fired.load(Ordering::SeqCst), weak_count);
    for (global, &is_weak) in globals.iter().zip(&weak) {
      prop_assert_eq!(isolate.global_is_empty(global), is_weak);
    }

    isolate.collect_garbage();
    prop_assert_eq!(fired.load(Ordering::SeqCst), weak_count);
    for global in globals {
      isolate.reset_global(global);
    }
  }
}
