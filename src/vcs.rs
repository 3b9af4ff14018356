//! The injected VCS adapter interface (spec.md §6), consumed by
//! [`crate::gateway::SourceGateway`].
//!
//! Concrete VCS backends are out of scope for the core design; this module
//! only defines the trait. A default Git-backed implementation is
//! supplemented in [`crate::vcs::git`] so the crate is usable without every
//! caller having to write their own adapter.

use std::path::Path;

use crate::context::CancelToken;

pub mod git;

/// One ref (branch or tag name) and the revision it currently points at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VcsRef {
    pub name: String,
    pub revision: String,
}

/// Clone/fetch/checkout/export primitives for one VCS. Every operation
/// accepts a [`CancelToken`] and must honour cancellation promptly — it is
/// the adapter's job to poll it at I/O boundaries (a chunked network read,
/// a large tree walk) since this crate cannot interrupt foreign blocking
/// calls itself.
pub trait VcsAdapter: Send + Sync {
    /// Clones `remote` into a fresh working directory at `local_dir`.
    /// `local_dir`'s parent is guaranteed to exist; `local_dir` itself does
    /// not.
    fn clone(&self, ctx: &CancelToken, remote: &str, local_dir: &Path) -> anyhow::Result<()>;

    /// Fetches all refs and revisions the remote currently publishes into
    /// the existing working directory at `local_dir`.
    fn fetch(&self, ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<()>;

    /// Lists every ref currently known in the local cache at `local_dir`.
    fn list_refs(&self, ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<Vec<VcsRef>>;

    /// True iff `revision` is reachable from some ref in the local cache.
    fn contains(&self, ctx: &CancelToken, local_dir: &Path, revision: &str) -> anyhow::Result<bool>;

    /// Materializes the tree at `revision` into `dst_dir`, which must not
    /// exist or must be empty. No VCS metadata (e.g. `.git`) is written.
    fn export(
        &self,
        ctx: &CancelToken,
        local_dir: &Path,
        revision: &str,
        dst_dir: &Path,
    ) -> anyhow::Result<()>;

    /// True iff `remote` answers without cloning anything locally.
    fn is_reachable(&self, ctx: &CancelToken, remote: &str) -> anyhow::Result<bool>;
}

#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;

    /// An in-memory VCS for tests: a fixed table of remotes, each with a
    /// fixed set of refs and fixed file contents per revision. Lets
    /// integration tests exercise the gateway state machine without any
    /// real git or network I/O.
    pub struct FakeVcs {
        pub remotes: Mutex<HashMap<String, FakeRepo>>,
        pub unreachable: Mutex<std::collections::HashSet<String>>,
        pub corrupt_once: Mutex<std::collections::HashSet<String>>,
        /// Like `corrupt_once`, but keyed by remote rather than local path
        /// and never cleared — models a remote whose history is corrupt
        /// server-side, so a reclone does not recover it.
        pub always_corrupt: Mutex<std::collections::HashSet<String>>,
    }

    #[derive(Clone)]
    pub struct FakeRepo {
        pub refs: Vec<VcsRef>,
        /// revision -> (relative path -> file contents)
        pub trees: HashMap<String, HashMap<String, String>>,
    }

    impl FakeVcs {
        pub fn new() -> Self {
            FakeVcs {
                remotes: Mutex::new(HashMap::new()),
                unreachable: Mutex::new(Default::default()),
                corrupt_once: Mutex::new(Default::default()),
                always_corrupt: Mutex::new(Default::default()),
            }
        }

        pub fn add_repo(&self, remote: &str, repo: FakeRepo) {
            self.remotes
                .lock()
                .unwrap()
                .insert(remote.to_string(), repo);
        }

        pub fn mark_unreachable(&self, remote: &str) {
            self.unreachable.lock().unwrap().insert(remote.to_string());
        }

        pub fn mark_always_corrupt(&self, remote: &str) {
            self.always_corrupt.lock().unwrap().insert(remote.to_string());
        }

        /// Local dirs are tagged with the remote they were cloned from via
        /// a sentinel file, since the fake has no real git database.
        fn remote_for_local_dir(&self, local_dir: &Path) -> anyhow::Result<String> {
            let marker = local_dir.join(".fake-remote");
            Ok(fs::read_to_string(marker)?.trim().to_string())
        }
    }

    impl Default for FakeVcs {
        fn default() -> Self {
            Self::new()
        }
    }

    impl VcsAdapter for FakeVcs {
        fn clone(&self, _ctx: &CancelToken, remote: &str, local_dir: &Path) -> anyhow::Result<()> {
            if self.unreachable.lock().unwrap().contains(remote) {
                anyhow::bail!("fake: {remote} is unreachable");
            }
            if !self.remotes.lock().unwrap().contains_key(remote) {
                anyhow::bail!("fake: no such remote {remote}");
            }
            fs::create_dir_all(local_dir)?;
            fs::write(local_dir.join(".fake-remote"), remote)?;
            Ok(())
        }

        fn fetch(&self, _ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<()> {
            let remote = self.remote_for_local_dir(local_dir)?;
            if self.unreachable.lock().unwrap().contains(&remote) {
                anyhow::bail!("fake: {remote} is unreachable");
            }
            Ok(())
        }

        fn list_refs(&self, _ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<Vec<VcsRef>> {
            if self.corrupt_once.lock().unwrap().remove(&local_dir.display().to_string()) {
                anyhow::bail!("fake: corrupt local cache");
            }
            let remote = self.remote_for_local_dir(local_dir)?;
            if self.always_corrupt.lock().unwrap().contains(&remote) {
                anyhow::bail!("fake: persistently corrupt remote {remote}");
            }
            let remotes = self.remotes.lock().unwrap();
            let repo = remotes
                .get(&remote)
                .ok_or_else(|| anyhow::anyhow!("fake: no such remote {remote}"))?;
            Ok(repo.refs.clone())
        }

        fn contains(
            &self,
            ctx: &CancelToken,
            local_dir: &Path,
            revision: &str,
        ) -> anyhow::Result<bool> {
            let refs = self.list_refs(ctx, local_dir)?;
            Ok(refs.iter().any(|r| r.revision == revision))
        }

        fn export(
            &self,
            _ctx: &CancelToken,
            local_dir: &Path,
            revision: &str,
            dst_dir: &Path,
        ) -> anyhow::Result<()> {
            let remote = self.remote_for_local_dir(local_dir)?;
            let remotes = self.remotes.lock().unwrap();
            let repo = remotes
                .get(&remote)
                .ok_or_else(|| anyhow::anyhow!("fake: no such remote {remote}"))?;
            let tree = repo
                .trees
                .get(revision)
                .ok_or_else(|| anyhow::anyhow!("fake: no such revision {revision}"))?;
            fs::create_dir_all(dst_dir)?;
            for (path, contents) in tree {
                let full = dst_dir.join(path);
                if let Some(parent) = full.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(full, contents)?;
            }
            Ok(())
        }

        fn is_reachable(&self, _ctx: &CancelToken, remote: &str) -> anyhow::Result<bool> {
            Ok(!self.unreachable.lock().unwrap().contains(remote)
                && self.remotes.lock().unwrap().contains_key(remote))
        }
    }
}
