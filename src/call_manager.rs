//! Registry of in-flight named operations, combined-context cancellation,
//! and aggregate duration metrics. No I/O happens in this module.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::AtomicBool;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::context::CancelToken;
use crate::error::{Result, SourceManagerError};

/// Extensible kind tag for a [`CallInfo`]. New kinds are added as the crate
/// grows new operations that should be tracked separately in metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallKind {
    HttpMetadata,
    ListVersions,
    SyncLocal,
    CheckExistence,
    RevisionPresentIn,
    ExportVersion,
    GetManifestAndLock,
    ListPackages,
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CallKind::HttpMetadata => "http-metadata",
            CallKind::ListVersions => "list-versions",
            CallKind::SyncLocal => "sync-local",
            CallKind::CheckExistence => "check-existence",
            CallKind::RevisionPresentIn => "revision-present-in",
            CallKind::ExportVersion => "export-version",
            CallKind::GetManifestAndLock => "get-manifest-and-lock",
            CallKind::ListPackages => "list-packages",
        };
        f.write_str(s)
    }
}

/// `{name, kind}` — identifies one logical in-flight call. Two calls with
/// the same `CallInfo` are the same logical call for single-flight
/// purposes (invariant 4, spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallInfo {
    pub name: String,
    pub kind: CallKind,
}

impl CallInfo {
    pub fn new(name: impl Into<String>, kind: CallKind) -> Self {
        CallInfo {
            name: name.into(),
            kind,
        }
    }
}

impl fmt::Display for CallInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.kind, self.name)
    }
}

/// Tracks a currently in-flight logical call: when it started and how many
/// callers are attached to it.
struct TimeCount {
    start: Instant,
    count: usize,
}

/// Aggregate duration metrics for one [`CallKind`]: how many logical calls
/// of that kind have fully completed, and the sum of their wall-clock
/// lifetimes. Accumulated only on the last completion for a given key
/// (invariant 6, spec.md §3).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DurCount {
    pub count: u64,
    pub dur: Duration,
}

struct State {
    running: HashMap<CallInfo, TimeCount>,
    ran: HashMap<CallKind, DurCount>,
}

/// Registry of in-flight named operations. See module docs.
pub struct CallManager {
    lifetime: CancelToken,
    cancelled: AtomicBool,
    state: Mutex<State>,
}

impl Default for CallManager {
    fn default() -> Self {
        CallManager::new()
    }
}

impl CallManager {
    pub fn new() -> Self {
        CallManager {
            lifetime: CancelToken::new(),
            cancelled: AtomicBool::new(false),
            state: Mutex::new(State {
                running: HashMap::new(),
                ran: HashMap::new(),
            }),
        }
    }

    /// The cancelable root context bound to the manager's lifetime.
    pub fn lifetime_context(&self) -> CancelToken {
        self.lifetime.clone()
    }

    /// Cancels the manager's lifetime context. Any outstanding combined
    /// context is cancelled as a result.
    pub fn cancel_all(&self) {
        self.cancelled
            .store(true, std::sync::atomic::Ordering::SeqCst);
        self.lifetime.cancel();
    }

    /// Registers the start of `info`, returning a combined cancellation
    /// context (`caller_ctx ∧ lifetime`) and a scoped guard. The guard's
    /// `Drop` is the "done" half of the contract: it is invoked exactly
    /// once, on every path (including panics), because it is tied to
    /// Rust's own scope-exit machinery rather than a caller-supplied
    /// closure the way the design's `doneHandle` is in languages without
    /// RAII.
    pub fn set_up_call(&self, caller_ctx: &CancelToken, info: CallInfo) -> Result<(CancelToken, CallGuard<'_>)> {
        if self.cancelled.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(SourceManagerError::Cancelled {
                operation: "set_up_call",
            });
        }

        {
            let mut state = self.state.lock().unwrap();
            match state.running.get_mut(&info) {
                Some(entry) => entry.count += 1,
                None => {
                    state.running.insert(
                        info.clone(),
                        TimeCount {
                            start: Instant::now(),
                            count: 1,
                        },
                    );
                }
            }
        }

        let combined = CancelToken::combine(caller_ctx, &self.lifetime);
        Ok((combined, CallGuard { manager: self, info }))
    }

    fn finish_call(&self, info: &CallInfo) {
        let mut state = self.state.lock().unwrap();
        let done_all = match state.running.get_mut(info) {
            Some(entry) => {
                entry.count -= 1;
                entry.count == 0
            }
            None => panic!("CallManager::done called without a matching run for {info}"),
        };
        if done_all {
            let entry = state.running.remove(info).expect("just checked present");
            let elapsed = entry.start.elapsed();
            let agg = state.ran.entry(info.kind).or_default();
            agg.count += 1;
            agg.dur += elapsed;
        }
    }

    /// A snapshot of completed-call aggregates, for callers that want to
    /// report metrics (e.g. a CLI's `--timings` output).
    pub fn completed_metrics(&self) -> HashMap<CallKind, DurCount> {
        self.state.lock().unwrap().ran.clone()
    }

    /// True while at least one call of `info` is in flight.
    pub fn is_running(&self, info: &CallInfo) -> bool {
        self.state.lock().unwrap().running.contains_key(info)
    }
}

/// RAII "done" handle returned by [`CallManager::set_up_call`]. Dropping it
/// (including via an early return or a panic unwind) is the one and only
/// completion signal for its call.
pub struct CallGuard<'a> {
    manager: &'a CallManager,
    info: CallInfo,
}

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.manager.finish_call(&self.info);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn running_entry_exists_between_run_and_done() {
        let mgr = CallManager::new();
        let info = CallInfo::new("github.com/foo/bar", CallKind::ListVersions);
        let caller = CancelToken::new();

        let (_ctx, guard) = mgr.set_up_call(&caller, info.clone()).unwrap();
        assert!(mgr.is_running(&info));
        drop(guard);
        assert!(!mgr.is_running(&info));
    }

    #[test]
    fn concurrent_same_call_shares_one_timing_window() {
        let mgr = CallManager::new();
        let info = CallInfo::new("github.com/foo/bar", CallKind::SyncLocal);
        let caller = CancelToken::new();

        let (_c1, g1) = mgr.set_up_call(&caller, info.clone()).unwrap();
        let (_c2, g2) = mgr.set_up_call(&caller, info.clone()).unwrap();
        assert!(mgr.is_running(&info));

        drop(g1);
        assert!(
            mgr.is_running(&info),
            "second attached caller keeps the entry alive"
        );
        assert_eq!(mgr.completed_metrics().get(&CallKind::SyncLocal), None);

        drop(g2);
        assert!(!mgr.is_running(&info));
        let metrics = mgr.completed_metrics();
        assert_eq!(metrics.get(&CallKind::SyncLocal).unwrap().count, 1);
    }

    #[test]
    fn duration_aggregates_across_multiple_logical_calls() {
        let mgr = CallManager::new();
        let caller = CancelToken::new();

        for i in 0..3 {
            let info = CallInfo::new(format!("pkg-{i}"), CallKind::ListVersions);
            let (_ctx, guard) = mgr.set_up_call(&caller, info).unwrap();
            drop(guard);
        }

        let metrics = mgr.completed_metrics();
        assert_eq!(metrics.get(&CallKind::ListVersions).unwrap().count, 3);
    }

    #[test]
    fn combined_context_is_cancelled_when_caller_is() {
        let mgr = CallManager::new();
        let caller = CancelToken::new();
        let info = CallInfo::new("pkg", CallKind::ListVersions);
        let (combined, _guard) = mgr.set_up_call(&caller, info).unwrap();
        assert!(!combined.is_cancelled());
        caller.cancel();
        assert!(combined.wait_timeout(Duration::from_secs(2)));
    }

    #[test]
    fn set_up_call_fails_after_cancel_all() {
        let mgr = CallManager::new();
        mgr.cancel_all();
        let caller = CancelToken::new();
        let info = CallInfo::new("pkg", CallKind::ListVersions);
        assert!(matches!(
            mgr.set_up_call(&caller, info),
            Err(SourceManagerError::Cancelled { .. })
        ));
    }

    #[test]
    #[should_panic(expected = "done called without a matching run")]
    fn done_without_run_panics() {
        let mgr = CallManager::new();
        let info = CallInfo::new("pkg", CallKind::ListVersions);
        mgr.finish_call(&info);
    }
}
