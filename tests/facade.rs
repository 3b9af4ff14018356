//! Facade-level integration tests (spec.md §8), exercised through
//! [`SourceManager`] against the fake VCS/analyzer/metadata-fetcher test
//! doubles instead of real network or git I/O.

use std::collections::HashMap;
use std::sync::Arc;

use sourcemgr::analyzer::fakes::FakeAnalyzer;
use sourcemgr::deduction::fakes::FakeMetadataFetcher;
use sourcemgr::vcs::fakes::{FakeRepo, FakeVcs};
use sourcemgr::{
    CancelToken, PackageScanner, ProjectIdentifier, ProjectRoot, Revision, SourceManager,
    SourceManagerConfig, SourceManagerError, Version, VcsAdapter, VcsRef,
};

fn fake_vcs_with_one_repo(remote: &str) -> Arc<FakeVcs> {
    let vcs = Arc::new(FakeVcs::new());
    let mut trees = HashMap::new();
    trees.insert(
        "rev1".to_string(),
        HashMap::from([
            ("README.md".to_string(), "hello".to_string()),
            ("src/lib.txt".to_string(), "fn main() {}".to_string()),
        ]),
    );
    vcs.add_repo(
        remote,
        FakeRepo {
            refs: vec![
                VcsRef {
                    name: "refs/heads/main".to_string(),
                    revision: "rev1".to_string(),
                },
                VcsRef {
                    name: "refs/tags/v1.0.0".to_string(),
                    revision: "rev1".to_string(),
                },
            ],
            trees,
        },
    );
    vcs
}

fn manager_with(vcs: Arc<dyn VcsAdapter>, dir: &std::path::Path) -> SourceManager {
    let config = SourceManagerConfig {
        cache_dir: dir.to_path_buf(),
        offline: false,
        manage_signals: false,
    };
    SourceManager::with_fetcher_and_vcs(
        config,
        Arc::new(FakeAnalyzer::default()),
        Arc::new(FakeMetadataFetcher::default()),
        Some(vcs),
    )
    .unwrap()
}

#[test]
fn source_exists_and_list_versions_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));

    assert!(mgr.source_exists(&ctx, &id).unwrap());
    let versions = mgr.list_versions(&ctx, &id).unwrap();
    assert_eq!(versions.len(), 2);
}

#[test]
fn export_then_list_packages_yield_the_same_tree() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
    let version = Version::Branch("main".to_string());

    let via_list_packages = mgr.list_packages(&ctx, &id, &version).unwrap();

    let export_dir = tempfile::tempdir().unwrap();
    std::fs::remove_dir(export_dir.path()).unwrap();
    mgr.export_project(&ctx, &id, &version, export_dir.path()).unwrap();
    let scanned = sourcemgr::DirectoryPackageScanner.scan(export_dir.path(), "github.com/foo/bar");

    assert_eq!(
        scanned.0.keys().collect::<Vec<_>>(),
        via_list_packages.0.keys().collect::<Vec<_>>()
    );
}

#[test]
fn revision_present_in_true_for_known_revision_only() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));

    assert!(mgr
        .revision_present_in(&ctx, &id, &Revision("rev1".to_string()))
        .unwrap());
    assert!(!mgr
        .revision_present_in(&ctx, &id, &Revision("does-not-exist".to_string()))
        .unwrap());
}

#[test]
fn get_manifest_and_lock_delegates_to_injected_analyzer() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));

    let (manifest, lock) = mgr
        .get_manifest_and_lock(&ctx, &id, &Version::Branch("main".to_string()))
        .unwrap();
    assert_eq!(manifest.0["root"], "github.com/foo/bar");
    assert_eq!(lock.0["locked"], true);
}

#[test]
fn release_is_idempotent_and_rejects_further_ops() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    assert!(dir.path().join("sm.lock").exists());

    mgr.release();
    mgr.release();
    assert!(!dir.path().join("sm.lock").exists());

    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
    let err = mgr.source_exists(&ctx, &id).unwrap_err();
    assert!(matches!(err, SourceManagerError::Released));
}

#[test]
fn construction_with_existing_lock_creates_no_other_cache_state() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path()).unwrap();
    std::fs::write(dir.path().join("sm.lock"), "").unwrap();

    let config = SourceManagerConfig {
        cache_dir: dir.path().to_path_buf(),
        offline: false,
        manage_signals: false,
    };
    let err = SourceManager::with_fetcher_and_vcs(
        config,
        Arc::new(FakeAnalyzer::default()),
        Arc::new(FakeMetadataFetcher::default()),
        None,
    )
    .unwrap_err();
    assert!(matches!(err, SourceManagerError::CouldNotCreateLock { .. }));
    assert!(!dir.path().join("sources").exists());
}

#[test]
fn aliased_identifiers_share_one_underlying_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();

    let canonical = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
    let alias = ProjectIdentifier::with_network_name(
        ProjectRoot::new("github.com/foo/bar/vendor/bar"),
        "github.com/foo/bar",
    );

    assert!(mgr.source_exists(&ctx, &canonical).unwrap());
    assert!(mgr.source_exists(&ctx, &alias).unwrap());
    let v1 = mgr.list_versions(&ctx, &canonical).unwrap();
    let v2 = mgr.list_versions(&ctx, &alias).unwrap();
    assert_eq!(v1, v2);
}

#[test]
fn deduce_project_root_is_read_only_and_does_not_register_a_gateway() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();

    let root = mgr
        .deduce_project_root(&ctx, "github.com/foo/bar/sub/pkg")
        .unwrap();
    assert_eq!(root.as_str(), "github.com/foo/bar");
}

#[test]
fn sync_twice_in_a_row_does_not_change_the_outcome() {
    let dir = tempfile::tempdir().unwrap();
    let vcs = fake_vcs_with_one_repo("https://github.com/foo/bar");
    let mgr = manager_with(vcs, dir.path());
    let ctx = CancelToken::new();
    let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));

    mgr.sync_source_for(&ctx, &id).unwrap();
    mgr.sync_source_for(&ctx, &id).unwrap();
    let versions = mgr.list_versions(&ctx, &id).unwrap();
    assert_eq!(versions.len(), 2);
}
