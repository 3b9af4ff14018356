//! [`SourceManager`]: the thread-safe facade (spec.md §4.1) and its
//! configuration and inter-process cache lock.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::info_span;

use crate::analyzer::ProjectAnalyzer;
use crate::call_manager::CallManager;
use crate::context::CancelToken;
use crate::deduction::{CurlMetadataFetcher, MetadataFetcher};
use crate::error::{Result, SourceManagerError};
use crate::identifier::{Lock, Manifest, PackageTree, ProjectIdentifier, ProjectRoot, Revision, Version};
use crate::release::{ReleaseBarrier, SignalHandler};
use crate::source_coordinator::SourceCoordinator;

/// Caller-supplied configuration. Unlike a CLI, this crate never reads a
/// config file itself — every field here is set by the embedding
/// application (grounded on `cargo-platform`'s small, dependency-light
/// config structs).
pub struct SourceManagerConfig {
    /// Root of the on-disk cache; `sm.lock` and `sources/` live under it.
    pub cache_dir: PathBuf,
    /// Suppresses all network I/O; cache-miss paths fail with `Unreachable`
    /// instead of dialing out. Grounded on `cargo`'s `--offline`.
    pub offline: bool,
    /// Suppresses installing the built-in `ctrlc` handler; the caller takes
    /// responsibility for calling `release()` itself on shutdown.
    pub manage_signals: bool,
}

impl SourceManagerConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        SourceManagerConfig {
            cache_dir: cache_dir.into(),
            offline: false,
            manage_signals: true,
        }
    }
}

/// Exclusively-held marker file at `<cachedir>/sm.lock` (spec.md §6). Its
/// presence at construction time means another instance may already be
/// live; its removal is part of physical teardown.
struct CacheLockFile {
    path: PathBuf,
}

impl CacheLockFile {
    fn acquire(cache_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(cache_dir).map_err(|e| SourceManagerError::CouldNotCreateLock {
            path: cache_dir.to_path_buf(),
            source: e,
        })?;
        let path = cache_dir.join("sm.lock");
        let mut open_opts = OpenOptions::new();
        open_opts.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            open_opts.mode(0o600);
        }
        open_opts
            .open(&path)
            .map_err(|e| SourceManagerError::CouldNotCreateLock {
                path: path.clone(),
                source: e,
            })?;
        Ok(CacheLockFile { path })
    }

    fn release(&self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

/// The entry point of this crate: a thread-safe facade over deduction,
/// source coordination, and per-source gateways, gated by a release
/// barrier and an inter-process cache lock.
pub struct SourceManager {
    barrier: Arc<ReleaseBarrier>,
    coordinator: SourceCoordinator,
    calls: Arc<CallManager>,
    analyzer: Arc<dyn ProjectAnalyzer>,
    lock_file: CacheLockFile,
    signal_handler: Option<SignalHandler>,
    offline: bool,
}

impl SourceManager {
    /// Constructs a manager with the default `curl`-backed metadata
    /// fetcher. Fails with `CouldNotCreateLock` if another instance
    /// already holds `cache_dir`.
    pub fn new(config: SourceManagerConfig, analyzer: Arc<dyn ProjectAnalyzer>) -> Result<Self> {
        Self::with_fetcher(config, analyzer, Arc::new(CurlMetadataFetcher))
    }

    pub fn with_fetcher(
        config: SourceManagerConfig,
        analyzer: Arc<dyn ProjectAnalyzer>,
        fetcher: Arc<dyn MetadataFetcher>,
    ) -> Result<Self> {
        Self::with_fetcher_and_vcs(config, analyzer, fetcher, None)
    }

    /// As [`Self::with_fetcher`], additionally overriding the VCS adapter
    /// every deduced source would otherwise get. Exposed for integration
    /// tests that exercise the full facade against a fake VCS.
    pub fn with_fetcher_and_vcs(
        config: SourceManagerConfig,
        analyzer: Arc<dyn ProjectAnalyzer>,
        fetcher: Arc<dyn MetadataFetcher>,
        vcs_override: Option<Arc<dyn crate::vcs::VcsAdapter>>,
    ) -> Result<Self> {
        let lock_file = CacheLockFile::acquire(&config.cache_dir)?;
        let calls = Arc::new(CallManager::new());
        let coordinator = SourceCoordinator::with_vcs_override(
            &config.cache_dir,
            calls.clone(),
            fetcher,
            vcs_override,
        )?;
        let barrier = Arc::new(ReleaseBarrier::new());

        let signal_handler = if config.manage_signals {
            let barrier_for_signal = barrier.clone();
            let lock_path = config.cache_dir.join("sm.lock");
            let teardown: Arc<dyn Fn() + Send + Sync> = Arc::new(move || {
                let _ = std::fs::remove_file(&lock_path);
            });
            match SignalHandler::install(barrier_for_signal, teardown) {
                Ok(h) => Some(h),
                Err(e) => {
                    tracing::warn!(error = %e, "could not install signal handler");
                    None
                }
            }
        } else {
            None
        };

        Ok(SourceManager {
            barrier,
            coordinator,
            calls,
            analyzer,
            lock_file,
            signal_handler,
            offline: config.offline,
        })
    }

    fn check_offline(&self, op: &'static str) -> Result<()> {
        if self.offline {
            return Err(SourceManagerError::Unreachable {
                source_id: op.to_string(),
                operation: op,
                message: "offline mode: network I/O suppressed".to_string(),
            });
        }
        Ok(())
    }

    pub fn source_exists(&self, ctx: &CancelToken, id: &ProjectIdentifier) -> Result<bool> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("source_exists", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.check_existence(ctx, crate::gateway::ExistenceMode::Any)
    }

    pub fn sync_source_for(&self, ctx: &CancelToken, id: &ProjectIdentifier) -> Result<()> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("sync_source_for", source = %id).entered();
        self.check_offline("sync-source-for")?;
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.sync_local(ctx)
    }

    pub fn list_versions(&self, ctx: &CancelToken, id: &ProjectIdentifier) -> Result<Vec<Version>> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("list_versions", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.list_versions(ctx)
    }

    pub fn revision_present_in(
        &self,
        ctx: &CancelToken,
        id: &ProjectIdentifier,
        revision: &Revision,
    ) -> Result<bool> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("revision_present_in", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.revision_present_in(ctx, revision)
    }

    pub fn list_packages(
        &self,
        ctx: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
    ) -> Result<PackageTree> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("list_packages", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.list_packages(ctx, version)
    }

    pub fn get_manifest_and_lock(
        &self,
        ctx: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
    ) -> Result<(Manifest, Lock)> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("get_manifest_and_lock", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.get_manifest_and_lock(ctx, version, self.analyzer.as_ref())
    }

    pub fn export_project(
        &self,
        ctx: &CancelToken,
        id: &ProjectIdentifier,
        version: &Version,
        dst_dir: &Path,
    ) -> Result<()> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("export_project", source = %id).entered();
        let gw = self.coordinator.gateway_for(ctx, id)?;
        gw.export_version_to(ctx, version, dst_dir)
    }

    pub fn deduce_project_root(&self, ctx: &CancelToken, import_path: &str) -> Result<ProjectRoot> {
        let _op = self.barrier.enter()?;
        let _span = info_span!("deduce_project_root", import_path).entered();
        self.coordinator.deduce_root(ctx, import_path)
    }

    pub fn analyzer_info(&self) -> Result<(String, String)> {
        let _op = self.barrier.enter()?;
        Ok(self.analyzer.info())
    }

    /// Idempotent; blocks until physical teardown (cache lock removal,
    /// manager-lifetime cancellation) completes, even if a concurrent
    /// signal already started it.
    pub fn release(&self) {
        if let Some(handler) = &self.signal_handler {
            handler.notify_quit();
        }
        let lock_file = &self.lock_file;
        let calls = &self.calls;
        self.barrier.release(|| {
            calls.cancel_all();
            lock_file.release();
        });
    }
}

impl Drop for SourceManager {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::fakes::FakeAnalyzer;
    use crate::deduction::fakes::FakeMetadataFetcher;

    fn manager(dir: &Path) -> SourceManager {
        let config = SourceManagerConfig {
            cache_dir: dir.to_path_buf(),
            offline: false,
            manage_signals: false,
        };
        SourceManager::with_fetcher(
            config,
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeMetadataFetcher::default()),
        )
        .unwrap()
    }

    #[test]
    fn construction_fails_if_lock_file_already_present() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path().join("sm.lock"), "").unwrap();

        let config = SourceManagerConfig {
            cache_dir: dir.path().to_path_buf(),
            offline: false,
            manage_signals: false,
        };
        let err = SourceManager::with_fetcher(
            config,
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeMetadataFetcher::default()),
        )
        .unwrap_err();
        assert!(matches!(err, SourceManagerError::CouldNotCreateLock { .. }));
    }

    #[test]
    fn release_removes_lock_file_and_rejects_further_ops() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        assert!(dir.path().join("sm.lock").exists());

        mgr.release();
        assert!(!dir.path().join("sm.lock").exists());

        let ctx = CancelToken::new();
        let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
        let err = mgr.source_exists(&ctx, &id).unwrap_err();
        assert!(matches!(err, SourceManagerError::Released));
    }

    #[test]
    fn offline_mode_rejects_sync() {
        let dir = tempfile::tempdir().unwrap();
        let config = SourceManagerConfig {
            cache_dir: dir.path().to_path_buf(),
            offline: true,
            manage_signals: false,
        };
        let mgr = SourceManager::with_fetcher(
            config,
            Arc::new(FakeAnalyzer::default()),
            Arc::new(FakeMetadataFetcher::default()),
        )
        .unwrap();
        let ctx = CancelToken::new();
        let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
        let err = mgr.sync_source_for(&ctx, &id).unwrap_err();
        assert!(matches!(err, SourceManagerError::Unreachable { .. }));
    }

    #[test]
    fn analyzer_info_delegates_to_injected_analyzer() {
        let dir = tempfile::tempdir().unwrap();
        let mgr = manager(dir.path());
        let (name, _version) = mgr.analyzer_info().unwrap();
        assert_eq!(name, "fake-analyzer");
    }
}
