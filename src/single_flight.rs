//! A generic single-flight map: at most one worker runs per key, additional
//! requesters attach to the in-progress result.
//!
//! Used by `DeductionCoordinator` (keyed by minimal matched prefix) and
//! `SourceCoordinator` (keyed by canonical project identifier). A uniform
//! abstraction here is cheaper than two bespoke ones and keeps the
//! single-flight contract (invariant 4 in spec.md §3) in one tested place.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Condvar, Mutex};

enum Slot<V> {
    InProgress,
    Done(V),
}

struct Cell<V> {
    slot: Mutex<Slot<V>>,
    condvar: Condvar,
}

/// Map from key to a value, computed at most once concurrently per key.
pub struct SingleFlight<K, V> {
    cells: Mutex<HashMap<K, Arc<Cell<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        SingleFlight {
            cells: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the value for `key`, computing it with `f` if no value is
    /// cached and no computation is in flight. Concurrent callers for the
    /// same `key` block until the first caller's `f` completes and then
    /// all receive its result (cloned).
    ///
    /// `f` is never invoked while holding the map lock, so it may itself
    /// recurse into `get_or_run` for a different key without deadlocking.
    pub fn get_or_run<E>(&self, key: K, f: impl FnOnce() -> Result<V, E>) -> Result<V, E> {
        let (cell, is_leader) = {
            let mut cells = self.cells.lock().unwrap();
            if let Some(cell) = cells.get(&key) {
                (cell.clone(), false)
            } else {
                let cell = Arc::new(Cell {
                    slot: Mutex::new(Slot::InProgress),
                    condvar: Condvar::new(),
                });
                cells.insert(key.clone(), cell.clone());
                (cell, true)
            }
        };

        if is_leader {
            let result = f();
            match &result {
                Ok(v) => {
                    let mut slot = cell.slot.lock().unwrap();
                    *slot = Slot::Done(v.clone());
                    cell.condvar.notify_all();
                }
                Err(_) => {
                    // Computation failed: remove the cell so a later caller
                    // can retry instead of waiting on a slot that will
                    // never resolve.
                    self.cells.lock().unwrap().remove(&key);
                    cell.condvar.notify_all();
                }
            }
            return result;
        }

        let guard = cell.slot.lock().unwrap();
        let guard = cell
            .condvar
            .wait_while(guard, |s| matches!(s, Slot::InProgress))
            .unwrap();
        match &*guard {
            Slot::Done(v) => Ok(v.clone()),
            Slot::InProgress => unreachable!("wait_while only returns once the slot is settled"),
        }
    }

    /// Forgets any settled entry for `key` so the next call recomputes it.
    /// No effect on an in-flight entry.
    pub fn invalidate(&self, key: &K) {
        self.cells.lock().unwrap().remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;

    #[test]
    fn concurrent_callers_share_one_computation() {
        let sf: Arc<SingleFlight<&'static str, i32>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(8));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sf = sf.clone();
                let calls = calls.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    sf.get_or_run("k", || {
                        calls.fetch_add(1, Ordering::SeqCst);
                        std::thread::sleep(std::time::Duration::from_millis(20));
                        Ok::<_, ()>(42)
                    })
                })
            })
            .collect();

        for h in handles {
            assert_eq!(h.join().unwrap(), Ok(42));
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_computation_can_be_retried() {
        let sf: SingleFlight<&'static str, i32> = SingleFlight::new();
        let first = sf.get_or_run("k", || Err::<i32, &'static str>("boom"));
        assert_eq!(first, Err("boom"));
        let second = sf.get_or_run("k", || Ok::<_, &'static str>(7));
        assert_eq!(second, Ok(7));
    }

    #[test]
    fn invalidate_forces_recompute() {
        let sf: SingleFlight<&'static str, i32> = SingleFlight::new();
        assert_eq!(sf.get_or_run("k", || Ok::<_, ()>(1)), Ok(1));
        sf.invalidate(&"k");
        assert_eq!(sf.get_or_run("k", || Ok::<_, ()>(2)), Ok(2));
    }
}
