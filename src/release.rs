//! Release barrier and signal handling (spec.md §4.6).
//!
//! [`ReleaseBarrier`] is the reader-writer lock plus op-count every facade
//! call passes through: normal operations hold the shared side via
//! [`ReleaseBarrier::enter`], teardown takes the exclusive side, which can
//! only be granted once every in-flight operation has dropped its
//! [`OpGuard`]. [`SignalHandler`] wires this into `ctrlc`, the same crate
//! `uv` and `pixi` use for their own "first Ctrl-C asks nicely, second one
//! kills" behavior.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Condvar, Mutex, RwLock, RwLockReadGuard};
use std::time::Duration;

use tracing::{debug, info};

use crate::error::{Result, SourceManagerError};

enum TeardownState {
    Idle,
    InProgress,
    Done,
}

/// Process-wide (per-`SourceManager`) release gate. See module docs.
pub struct ReleaseBarrier {
    lock: RwLock<()>,
    releasing: AtomicBool,
    op_count: AtomicI64,
    teardown_state: Mutex<TeardownState>,
    teardown_cv: Condvar,
}

impl Default for ReleaseBarrier {
    fn default() -> Self {
        ReleaseBarrier::new()
    }
}

impl ReleaseBarrier {
    pub fn new() -> Self {
        ReleaseBarrier {
            lock: RwLock::new(()),
            releasing: AtomicBool::new(false),
            op_count: AtomicI64::new(0),
            teardown_state: Mutex::new(TeardownState::Idle),
            teardown_cv: Condvar::new(),
        }
    }

    /// Registers the start of a facade operation. Fails with `Released` if
    /// release has begun; otherwise holds the barrier in shared mode for
    /// the lifetime of the returned guard, which teardown cannot proceed
    /// past until dropped.
    pub fn enter(&self) -> Result<OpGuard<'_>> {
        let guard = self.lock.read().unwrap();
        if self.releasing.load(Ordering::SeqCst) {
            drop(guard);
            return Err(SourceManagerError::Released);
        }
        self.op_count.fetch_add(1, Ordering::SeqCst);
        Ok(OpGuard { _read: guard, barrier: self })
    }

    pub fn op_count(&self) -> i64 {
        self.op_count.load(Ordering::SeqCst)
    }

    pub fn is_releasing(&self) -> bool {
        self.releasing.load(Ordering::SeqCst)
    }

    /// Runs `teardown` exactly once no matter how many callers invoke
    /// `release` concurrently; every caller blocks until the one physical
    /// teardown completes.
    pub fn release(&self, teardown: impl FnOnce()) {
        self.releasing.store(true, Ordering::SeqCst);
        {
            let mut state = self.teardown_state.lock().unwrap();
            match *state {
                TeardownState::Done => return,
                TeardownState::InProgress => {
                    let _unused = self
                        .teardown_cv
                        .wait_while(state, |s| !matches!(s, TeardownState::Done))
                        .unwrap();
                    return;
                }
                TeardownState::Idle => *state = TeardownState::InProgress,
            }
        }

        debug!("release: waiting for in-flight operations to drain");
        let exclusive = self.lock.write().unwrap();
        teardown();
        drop(exclusive);

        let mut state = self.teardown_state.lock().unwrap();
        *state = TeardownState::Done;
        self.teardown_cv.notify_all();
    }
}

/// RAII shared hold on the barrier. Its `Drop` is what lets a pending
/// `release` eventually acquire the exclusive side.
pub struct OpGuard<'a> {
    _read: RwLockReadGuard<'a, ()>,
    barrier: &'a ReleaseBarrier,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        self.barrier.op_count.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Installs (and, on drop, does not remove — `ctrlc` has no unregister API,
/// matching `uv`'s own use of the crate) a process-wide Ctrl-C handler that
/// drives `barrier`'s release. Mirrors spec.md §4.6: first signal arms a
/// 3-second "a second signal kills" window, prints the waiting message if
/// operations are in flight, and triggers teardown exactly once.
pub struct SignalHandler {
    quit_tx: Mutex<Option<std::sync::mpsc::Sender<()>>>,
}

impl SignalHandler {
    pub fn install(
        barrier: Arc<ReleaseBarrier>,
        teardown: Arc<dyn Fn() + Send + Sync>,
    ) -> anyhow::Result<Self> {
        let (quit_tx, quit_rx) = std::sync::mpsc::channel::<()>();
        let quit_rx = Arc::new(Mutex::new(quit_rx));
        let armed = Arc::new(AtomicBool::new(false));

        ctrlc::set_handler(move || {
            if armed.swap(true, Ordering::SeqCst) {
                // Second signal while the window is armed: let it kill us.
                std::process::exit(130);
            }

            let op_count = barrier.op_count();
            if op_count > 0 {
                #[allow(clippy::print_stdout)]
                {
                    println!("sourcemgr: waiting for {op_count} operation(s) to finish...");
                }
            }

            let barrier_for_release = barrier.clone();
            let teardown_for_release = teardown.clone();
            std::thread::spawn(move || {
                barrier_for_release.release(|| teardown_for_release());
            });

            let armed_for_timer = armed.clone();
            let quit_rx = quit_rx.clone();
            std::thread::spawn(move || {
                let rx = quit_rx.lock().unwrap();
                let _ = rx.recv_timeout(Duration::from_secs(3));
                armed_for_timer.store(false, Ordering::SeqCst);
            });
        })?;

        info!("installed signal handler");
        Ok(SignalHandler {
            quit_tx: Mutex::new(Some(quit_tx)),
        })
    }

    /// Called by an explicit `Release` so a concurrently-armed timer thread
    /// exits immediately instead of idling out its 3-second window.
    pub fn notify_quit(&self) {
        if let Some(tx) = self.quit_tx.lock().unwrap().as_ref() {
            let _ = tx.send(());
        }
    }
}
