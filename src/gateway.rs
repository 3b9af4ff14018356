//! [`SourceGateway`]: owns one source's on-disk cache and VCS adapter, and
//! serves the five source-level operations (spec.md §4.5).

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};

use sha2::{Digest, Sha256};
use tracing::{debug, instrument, trace};

use crate::analyzer::ProjectAnalyzer;
use crate::call_manager::{CallInfo, CallKind, CallManager};
use crate::context::CancelToken;
use crate::error::{Result, SourceManagerError};
use crate::identifier::{Lock, Manifest, PackageTree, ProjectIdentifier, Revision, Version};
use crate::package_scan::{DirectoryPackageScanner, PackageScanner};
use crate::vcs::{VcsAdapter, VcsRef};

/// Monotone cache-maturity states, in increasing order (spec.md §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum GatewayState {
    Uninitialized = 0,
    Created = 1,
    ExistenceCheckedLocal = 2,
    ExistenceCheckedUpstream = 3,
    VersionsListed = 4,
    FullSynced = 5,
}

impl GatewayState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => GatewayState::Uninitialized,
            1 => GatewayState::Created,
            2 => GatewayState::ExistenceCheckedLocal,
            3 => GatewayState::ExistenceCheckedUpstream,
            4 => GatewayState::VersionsListed,
            _ => GatewayState::FullSynced,
        }
    }
}

/// Which existence(s) `checkExistence` should consult.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExistenceMode {
    LocalCache,
    Upstream,
    Any,
}

struct VersionCache {
    versions: Vec<Version>,
    refs: Vec<VcsRef>,
}

/// Per-source coordinator: owns `<cachedir>/sources/<sanitized>` and the
/// [`VcsAdapter`] for this source, and serializes mutating operations on it
/// with `mutation_lock` (invariant 5, spec.md §3).
pub struct SourceGateway {
    id: ProjectIdentifier,
    remote: String,
    local_dir: PathBuf,
    vcs: Arc<dyn VcsAdapter>,
    scanner: Arc<dyn PackageScanner>,
    calls: Arc<CallManager>,
    state: AtomicU8,
    mutation_lock: Mutex<()>,
    version_cache: Mutex<Option<VersionCache>>,
}

impl SourceGateway {
    pub fn new(
        id: ProjectIdentifier,
        remote: String,
        sources_dir: &Path,
        vcs: Arc<dyn VcsAdapter>,
        calls: Arc<CallManager>,
    ) -> Self {
        let local_dir = sources_dir.join(sanitize(&remote));
        SourceGateway {
            id,
            remote,
            local_dir,
            vcs,
            scanner: Arc::new(DirectoryPackageScanner),
            calls,
            state: AtomicU8::new(GatewayState::Uninitialized as u8),
            mutation_lock: Mutex::new(()),
            version_cache: Mutex::new(None),
        }
    }

    /// Overrides the package-tree scanner used by `ListPackages`. Exposed
    /// for callers that know their ecosystem's source layout well enough to
    /// extract real import graphs.
    pub fn set_scanner(&mut self, scanner: Arc<dyn PackageScanner>) {
        self.scanner = scanner;
    }

    pub fn identifier(&self) -> &ProjectIdentifier {
        &self.id
    }

    pub fn state(&self) -> GatewayState {
        GatewayState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn advance_state(&self, at_least: GatewayState) {
        let target = at_least as u8;
        let mut cur = self.state.load(Ordering::SeqCst);
        while cur < target {
            match self.state.compare_exchange_weak(
                cur,
                target,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => break,
                Err(observed) => cur = observed,
            }
        }
    }

    fn track<T>(
        &self,
        ctx: &CancelToken,
        kind: CallKind,
        f: impl FnOnce(&CancelToken) -> Result<T>,
    ) -> Result<T> {
        let info = CallInfo::new(self.id.project_root.to_string(), kind);
        let (combined, _guard) = self.calls.set_up_call(ctx, info)?;
        if combined.is_cancelled() {
            return Err(SourceManagerError::Cancelled {
                operation: "gateway-call",
            });
        }
        f(&combined)
    }

    /// Clones the source if the local cache directory does not exist yet.
    /// Idempotent once cloned.
    fn ensure_cloned(&self, ctx: &CancelToken) -> Result<()> {
        if self.local_dir.exists() {
            self.advance_state(GatewayState::Created);
            return Ok(());
        }
        let _mutation = self.mutation_lock.lock().unwrap();
        if self.local_dir.exists() {
            self.advance_state(GatewayState::Created);
            return Ok(());
        }
        if let Some(parent) = self.local_dir.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                SourceManagerError::source_failure(&self.id, "clone", e.to_string())
            })?;
        }
        let staging = self.local_dir.with_extension("staging");
        let _ = std::fs::remove_dir_all(&staging);
        self.vcs
            .clone(ctx, &self.remote, &staging)
            .map_err(|e| SourceManagerError::unreachable(&self.id, "clone", e.to_string()))?;
        std::fs::rename(&staging, &self.local_dir)
            .map_err(|e| SourceManagerError::source_failure(&self.id, "clone", e.to_string()))?;
        self.advance_state(GatewayState::Created);
        Ok(())
    }

    /// Self-heals a corrupt local cache by deleting and recloning, exactly
    /// once, surfacing `CacheCorrupt` if the reclone also fails.
    fn self_heal<T>(
        &self,
        ctx: &CancelToken,
        operation: &'static str,
        first_attempt: impl FnOnce() -> std::result::Result<T, anyhow::Error>,
        retry: impl FnOnce() -> std::result::Result<T, anyhow::Error>,
    ) -> Result<T> {
        match first_attempt() {
            Ok(v) => Ok(v),
            Err(first_err) => {
                debug!(source = %self.id, %operation, error = %first_err, "self-healing corrupt cache");
                let _ = std::fs::remove_dir_all(&self.local_dir);
                self.state.store(GatewayState::Uninitialized as u8, Ordering::SeqCst);
                self.ensure_cloned(ctx)?;
                retry().map_err(|e| {
                    SourceManagerError::CacheCorrupt {
                        source_id: self.id.to_string(),
                        message: format!("{first_err}; reclone also failed: {e}"),
                    }
                })
            }
        }
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn check_existence(&self, ctx: &CancelToken, mode: ExistenceMode) -> Result<bool> {
        self.track(ctx, CallKind::CheckExistence, |ctx| {
            let local = self.local_dir.exists();
            if mode == ExistenceMode::LocalCache {
                self.advance_state(GatewayState::ExistenceCheckedLocal);
                return Ok(local);
            }
            if local && mode == ExistenceMode::Any {
                self.advance_state(GatewayState::ExistenceCheckedLocal);
                return Ok(true);
            }
            let upstream = self
                .vcs
                .is_reachable(ctx, &self.remote)
                .map_err(|e| SourceManagerError::unreachable(&self.id, "check-existence", e.to_string()))?;
            self.advance_state(GatewayState::ExistenceCheckedUpstream);
            Ok(match mode {
                ExistenceMode::Upstream => upstream,
                ExistenceMode::Any => local || upstream,
                ExistenceMode::LocalCache => unreachable!(),
            })
        })
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn sync_local(&self, ctx: &CancelToken) -> Result<()> {
        self.track(ctx, CallKind::SyncLocal, |ctx| {
            self.ensure_cloned(ctx)?;
            let _mutation = self.mutation_lock.lock().unwrap();
            self.self_heal(
                ctx,
                "sync",
                || self.vcs.fetch(ctx, &self.local_dir),
                || self.vcs.fetch(ctx, &self.local_dir),
            )?;
            *self.version_cache.lock().unwrap() = None;
            self.advance_state(GatewayState::FullSynced);
            Ok(())
        })
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn list_versions(&self, ctx: &CancelToken) -> Result<Vec<Version>> {
        self.track(ctx, CallKind::ListVersions, |ctx| {
            if let Some(cache) = self.version_cache.lock().unwrap().as_ref() {
                return Ok(cache.versions.clone());
            }
            self.ensure_cloned(ctx)?;
            let _mutation = self.mutation_lock.lock().unwrap();
            if let Some(cache) = self.version_cache.lock().unwrap().as_ref() {
                return Ok(cache.versions.clone());
            }
            let refs = self
                .self_heal(
                    ctx,
                    "list-versions",
                    || self.vcs.list_refs(ctx, &self.local_dir),
                    || self.vcs.list_refs(ctx, &self.local_dir),
                )?;
            let versions = refs_to_versions(&refs);
            *self.version_cache.lock().unwrap() = Some(VersionCache {
                versions: versions.clone(),
                refs,
            });
            self.advance_state(GatewayState::VersionsListed);
            Ok(versions)
        })
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn revision_present_in(&self, ctx: &CancelToken, revision: &Revision) -> Result<bool> {
        self.track(ctx, CallKind::RevisionPresentIn, |ctx| {
            self.ensure_cloned(ctx)?;
            let present = self.self_heal(
                ctx,
                "revision-present-in",
                || self.vcs.contains(ctx, &self.local_dir, &revision.0),
                || self.vcs.contains(ctx, &self.local_dir, &revision.0),
            )?;
            if present {
                return Ok(true);
            }
            // Not found locally: the revision may have been published after
            // our last sync. Fetch once and recheck before reporting false.
            let _mutation = self.mutation_lock.lock().unwrap();
            self.vcs
                .fetch(ctx, &self.local_dir)
                .map_err(|e| SourceManagerError::unreachable(&self.id, "revision-present-in", e.to_string()))?;
            *self.version_cache.lock().unwrap() = None;
            self.self_heal(
                ctx,
                "revision-present-in",
                || self.vcs.contains(ctx, &self.local_dir, &revision.0),
                || self.vcs.contains(ctx, &self.local_dir, &revision.0),
            )
        })
    }

    fn resolve_version(&self, ctx: &CancelToken, version: &Version) -> Result<Revision> {
        if let Some(rev) = version.resolved_revision() {
            return Ok(rev.clone());
        }
        self.ensure_cloned(ctx)?;
        self.list_versions(ctx)?;
        let cache = self.version_cache.lock().unwrap();
        let refs = &cache.as_ref().expect("just populated").refs;
        let found = match version {
            Version::Branch(name) => refs
                .iter()
                .find(|r| r.name == format!("refs/heads/{name}") || r.name == *name),
            Version::Tag(name) => refs
                .iter()
                .find(|r| r.name == format!("refs/tags/{name}") || r.name == *name),
            Version::SemVer(v) => refs.iter().find(|r| {
                let tag = r.name.trim_start_matches("refs/tags/");
                tag == v.to_string() || tag == format!("v{v}")
            }),
            Version::Revision(_) | Version::Paired(_, _) => unreachable!("handled above"),
        };
        found
            .map(|r| Revision(r.revision.clone()))
            .ok_or_else(|| SourceManagerError::NoSuchVersion {
                source_id: self.id.to_string(),
                version: version.to_string(),
            })
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn export_version_to(&self, ctx: &CancelToken, version: &Version, dst: &Path) -> Result<()> {
        if dst.exists() {
            let non_empty = std::fs::read_dir(dst)
                .map(|mut rd| rd.next().is_some())
                .unwrap_or(false);
            if non_empty {
                return Err(SourceManagerError::BadInput(format!(
                    "export destination {} is not empty",
                    dst.display()
                )));
            }
        }
        self.track(ctx, CallKind::ExportVersion, |ctx| {
            let revision = self.resolve_version(ctx, version)?;
            self.ensure_cloned(ctx)?;
            self.vcs
                .export(ctx, &self.local_dir, &revision.0, dst)
                .map_err(|e| SourceManagerError::source_failure(&self.id, "export-version", e.to_string()))
        })
    }

    #[instrument(skip(self, ctx), fields(source = %self.id))]
    pub fn list_packages(&self, ctx: &CancelToken, version: &Version) -> Result<PackageTree> {
        self.track(ctx, CallKind::ListPackages, |ctx| {
            let tmp = tempfile::tempdir()
                .map_err(|e| SourceManagerError::source_failure(&self.id, "list-packages", e.to_string()))?;
            self.export_to_dir(ctx, version, tmp.path())?;
            Ok(self.scanner.scan(tmp.path(), self.id.project_root.as_str()))
        })
    }

    #[instrument(skip(self, ctx, analyzer), fields(source = %self.id))]
    pub fn get_manifest_and_lock(
        &self,
        ctx: &CancelToken,
        version: &Version,
        analyzer: &dyn ProjectAnalyzer,
    ) -> Result<(Manifest, Lock)> {
        self.track(ctx, CallKind::GetManifestAndLock, |ctx| {
            let tmp = tempfile::tempdir().map_err(|e| {
                SourceManagerError::source_failure(&self.id, "get-manifest-and-lock", e.to_string())
            })?;
            self.export_to_dir(ctx, version, tmp.path())?;
            analyzer
                .derive_manifest_and_lock(tmp.path(), self.id.project_root.as_str())
                .map_err(|e| SourceManagerError::AnalyzerFailure {
                    source_id: self.id.to_string(),
                    version: version.to_string(),
                    message: e.to_string(),
                })
        })
    }

    /// Shared by `list_packages`/`get_manifest_and_lock`: export into a
    /// directory the caller already owns (here, one already inside a
    /// `TempDir` whose removal is handled by the caller's drop).
    fn export_to_dir(&self, ctx: &CancelToken, version: &Version, dst: &Path) -> Result<()> {
        let revision = self.resolve_version(ctx, version)?;
        self.ensure_cloned(ctx)?;
        self.vcs
            .export(ctx, &self.local_dir, &revision.0, dst)
            .map_err(|e| SourceManagerError::source_failure(&self.id, "export", e.to_string()))
    }
}

fn refs_to_versions(refs: &[VcsRef]) -> Vec<Version> {
    refs.iter()
        .map(|r| {
            let rev = Revision(r.revision.clone());
            if let Some(name) = r.name.strip_prefix("refs/heads/") {
                Version::Branch(name.to_string()).paired_with(rev)
            } else if let Some(name) = r.name.strip_prefix("refs/tags/") {
                if let Ok(v) = semver::Version::parse(name.trim_start_matches('v')) {
                    Version::SemVer(v).paired_with(rev)
                } else {
                    Version::Tag(name.to_string()).paired_with(rev)
                }
            } else {
                Version::Tag(r.name.clone()).paired_with(rev)
            }
        })
        .collect()
}

/// `<cachedir>/sources/<sanitized-network-name>`: replaces each of `:` `/`
/// `+` with `-` and each `-` with `--` so the mapping stays injective
/// (spec.md §6).
pub fn sanitize(network_name: &str) -> String {
    let mut out = String::with_capacity(network_name.len() + 8);
    for ch in network_name.chars() {
        match ch {
            '-' => out.push_str("--"),
            ':' | '/' | '+' => out.push('-'),
            other => out.push(other),
        }
    }
    // Keep the directory name bounded and collision-resistant even for very
    // long import paths by appending a short content hash, the same idea
    // as cargo's own git-source `ident()` (see DESIGN.md).
    let mut hasher = Sha256::new();
    hasher.update(network_name.as_bytes());
    let digest = hasher.finalize();
    let short_hash = hex_prefix(&digest, 8);
    format!("{out}-{short_hash}")
}

fn hex_prefix(bytes: &[u8], nibbles: usize) -> String {
    let mut s = String::with_capacity(nibbles);
    for b in bytes {
        if s.len() >= nibbles {
            break;
        }
        s.push_str(&format!("{b:02x}"));
    }
    s.truncate(nibbles);
    s
}
