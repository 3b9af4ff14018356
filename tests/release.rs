//! Release-barrier integration tests covering spec.md §8 invariant 4 and
//! the signal-arriving-mid-operation boundary, at the `ReleaseBarrier`
//! level (no real OS signal is raised in a test binary).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sourcemgr::release::ReleaseBarrier;

#[test]
fn operations_in_flight_when_release_begins_still_complete() {
    let barrier = Arc::new(ReleaseBarrier::new());
    let guard = barrier.enter().unwrap();

    let completed = Arc::new(AtomicUsize::new(0));
    let b = barrier.clone();
    let c = completed.clone();
    let releaser = std::thread::spawn(move || {
        b.release(|| {
            c.fetch_add(1, Ordering::SeqCst);
        });
    });

    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(completed.load(Ordering::SeqCst), 0, "teardown must wait for in-flight op");

    // The in-flight operation finishes its work, then drops its guard.
    drop(guard);
    releaser.join().unwrap();
    assert_eq!(completed.load(Ordering::SeqCst), 1);

    assert!(matches!(
        barrier.enter().unwrap_err(),
        sourcemgr::SourceManagerError::Released
    ));
}

#[test]
fn many_concurrent_operations_all_drain_before_teardown_runs() {
    let barrier = Arc::new(ReleaseBarrier::new());
    let guards: Vec<_> = (0..10).map(|_| barrier.enter().unwrap()).collect();
    assert_eq!(barrier.op_count(), 10);

    let torn_down = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let b = barrier.clone();
    let t = torn_down.clone();
    let releaser = std::thread::spawn(move || {
        b.release(|| t.store(true, Ordering::SeqCst));
    });

    std::thread::sleep(Duration::from_millis(50));
    assert!(!torn_down.load(Ordering::SeqCst));

    drop(guards);
    releaser.join().unwrap();
    assert!(torn_down.load(Ordering::SeqCst));
}
