//! [`SourceCoordinator`]: canonicalizes a [`ProjectIdentifier`] to a
//! [`SourceGateway`], guaranteeing one gateway per underlying source even
//! when multiple aliases resolve to it (spec.md §4.4).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::call_manager::CallManager;
use crate::context::CancelToken;
use crate::deduction::{DeductionCoordinator, MetadataFetcher, VcsKind};
use crate::error::{Result, SourceManagerError};
use crate::gateway::SourceGateway;
use crate::identifier::{ProjectIdentifier, ProjectRoot};
use crate::vcs::git::GitVcs;
use crate::vcs::VcsAdapter;

/// Maps every `ProjectIdentifier` (and alias) that resolves to the same
/// underlying source to the same `Arc<SourceGateway>`.
pub struct SourceCoordinator {
    sources_dir: PathBuf,
    calls: Arc<CallManager>,
    deduction: DeductionCoordinator,
    /// Overrides the VCS adapter construction `VcsKind` would otherwise
    /// select. Used by tests to exercise the full facade against a fake
    /// VCS instead of real git/network I/O; a production caller leaves
    /// this unset and gets the default per-kind adapter (`GitVcs` today).
    vcs_override: Option<Arc<dyn VcsAdapter>>,
    gateways: Mutex<HashMap<ProjectRoot, Arc<SourceGateway>>>,
    aliases: Mutex<HashMap<String, ProjectRoot>>,
    creation: crate::single_flight::SingleFlight<ProjectRoot, Arc<SourceGateway>>,
}

impl SourceCoordinator {
    pub fn new(cache_dir: &Path, calls: Arc<CallManager>, fetcher: Arc<dyn MetadataFetcher>) -> Result<Self> {
        Self::with_vcs_override(cache_dir, calls, fetcher, None)
    }

    pub fn with_vcs_override(
        cache_dir: &Path,
        calls: Arc<CallManager>,
        fetcher: Arc<dyn MetadataFetcher>,
        vcs_override: Option<Arc<dyn VcsAdapter>>,
    ) -> Result<Self> {
        let sources_dir = cache_dir.join("sources");
        std::fs::create_dir_all(&sources_dir)
            .map_err(|e| SourceManagerError::CouldNotCreateLock {
                path: sources_dir.clone(),
                source: e,
            })?;
        Ok(SourceCoordinator {
            sources_dir,
            deduction: DeductionCoordinator::new(calls.clone(), fetcher),
            calls,
            vcs_override,
            gateways: Mutex::new(HashMap::new()),
            aliases: Mutex::new(HashMap::new()),
            creation: crate::single_flight::SingleFlight::new(),
        })
    }

    /// Resolves `id` to its gateway, creating one if this is the first time
    /// `id`'s canonical source has been seen. `id.network_name`, when set,
    /// is what deduction actually runs against (invariant 3, spec.md §3).
    pub fn gateway_for(&self, ctx: &CancelToken, id: &ProjectIdentifier) -> Result<Arc<SourceGateway>> {
        let effective = id.effective_network_name().to_string();

        if let Some(root) = self.aliases.lock().unwrap().get(&effective).cloned() {
            if let Some(gw) = self.gateways.lock().unwrap().get(&root) {
                return Ok(gw.clone());
            }
        }

        let (root, recipe) = self.deduction.deduce(ctx, &effective)?;

        if let Some(gw) = self.gateways.lock().unwrap().get(&root) {
            self.register_alias(effective, root);
            return Ok(gw.clone());
        }

        let sources_dir = self.sources_dir.clone();
        let calls = self.calls.clone();
        let gateways = &self.gateways;
        let vcs_override = self.vcs_override.clone();
        let root_for_closure = root.clone();
        let gw = self.creation.get_or_run(root.clone(), move || -> Result<Arc<SourceGateway>> {
            if let Some(gw) = gateways.lock().unwrap().get(&root_for_closure) {
                return Ok(gw.clone());
            }
            debug!(root = %root_for_closure, remote = %recipe.remote_url, "creating gateway");
            let vcs: Arc<dyn VcsAdapter> = match vcs_override {
                Some(v) => v,
                None => match recipe.vcs {
                    VcsKind::Git => Arc::new(GitVcs::new()),
                },
            };
            let gateway_id = ProjectIdentifier::new(root_for_closure.clone());
            let gw = Arc::new(SourceGateway::new(
                gateway_id,
                recipe.remote_url.clone(),
                &sources_dir,
                vcs,
                calls.clone(),
            ));
            gateways
                .lock()
                .unwrap()
                .insert(root_for_closure.clone(), gw.clone());
            Ok(gw)
        })?;

        self.register_alias(effective, root);
        Ok(gw)
    }

    /// Pure deduction: resolves `import_path` to its canonical
    /// `ProjectRoot`, possibly probing the network, without creating or
    /// registering a `SourceGateway` as a side effect (spec.md §4.1 table —
    /// `deduce_project_root` is read-only).
    pub fn deduce_root(&self, ctx: &CancelToken, import_path: &str) -> Result<ProjectRoot> {
        let (root, _recipe) = self.deduction.deduce(ctx, import_path)?;
        Ok(root)
    }

    fn register_alias(&self, alias: String, root: ProjectRoot) {
        self.aliases.lock().unwrap().entry(alias).or_insert(root);
    }

    /// Number of distinct underlying sources resolved so far. Exposed for
    /// tests and for a caller's own diagnostics, not used internally.
    pub fn gateway_count(&self) -> usize {
        self.gateways.lock().unwrap().len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deduction::fakes::FakeMetadataFetcher;
    use crate::identifier::ProjectRoot;

    fn coordinator() -> (tempfile::TempDir, SourceCoordinator) {
        let dir = tempfile::tempdir().unwrap();
        let coord = SourceCoordinator::new(
            dir.path(),
            Arc::new(CallManager::new()),
            Arc::new(FakeMetadataFetcher::default()),
        )
        .unwrap();
        (dir, coord)
    }

    #[test]
    fn same_identifier_yields_same_gateway() {
        let (_dir, coord) = coordinator();
        let ctx = CancelToken::new();
        let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));

        let g1 = coord.gateway_for(&ctx, &id).unwrap();
        let g2 = coord.gateway_for(&ctx, &id).unwrap();
        assert!(Arc::ptr_eq(&g1, &g2));
        assert_eq!(coord.gateway_count(), 1);
    }

    #[test]
    fn alias_via_network_name_shares_gateway_with_canonical_root() {
        let (_dir, coord) = coordinator();
        let ctx = CancelToken::new();

        let canonical = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
        let g1 = coord.gateway_for(&ctx, &canonical).unwrap();

        let alias = ProjectIdentifier::with_network_name(
            ProjectRoot::new("github.com/foo/bar/vendored"),
            "github.com/foo/bar",
        );
        let g2 = coord.gateway_for(&ctx, &alias).unwrap();

        assert!(Arc::ptr_eq(&g1, &g2));
        assert_eq!(coord.gateway_count(), 1);
    }

    #[test]
    fn distinct_sources_get_distinct_gateways() {
        let (_dir, coord) = coordinator();
        let ctx = CancelToken::new();
        let a = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
        let b = ProjectIdentifier::new(ProjectRoot::new("github.com/other/repo"));

        coord.gateway_for(&ctx, &a).unwrap();
        coord.gateway_for(&ctx, &b).unwrap();
        assert_eq!(coord.gateway_count(), 2);
    }

    #[test]
    fn concurrent_resolution_of_same_identifier_creates_one_gateway() {
        let (_dir, coord) = coordinator();
        let coord = Arc::new(coord);
        let id = Arc::new(ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar")));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let coord = coord.clone();
                let id = id.clone();
                std::thread::spawn(move || {
                    let ctx = CancelToken::new();
                    coord.gateway_for(&ctx, &id).unwrap()
                })
            })
            .collect();
        let gws: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for g in &gws[1..] {
            assert!(Arc::ptr_eq(&gws[0], g));
        }
        assert_eq!(coord.gateway_count(), 1);
    }
}
