//! Deduction scenarios and boundaries from spec.md §8, against the public
//! `DeductionCoordinator` API.

use std::sync::Arc;

use sourcemgr::deduction::fakes::FakeMetadataFetcher;
use sourcemgr::{CallManager, CancelToken, DeductionCoordinator};

fn coordinator() -> (DeductionCoordinator, Arc<FakeMetadataFetcher>) {
    let fetcher = Arc::new(FakeMetadataFetcher::default());
    (
        DeductionCoordinator::new(Arc::new(CallManager::new()), fetcher.clone()),
        fetcher,
    )
}

#[test]
fn gopkg_in_versioned_pseudo_host_scenario() {
    let (coord, _fetcher) = coordinator();
    let ctx = CancelToken::new();
    let (root, _recipe) = coord.deduce(&ctx, "gopkg.in/foo.v2/bar").unwrap();
    assert_eq!(root.as_str(), "gopkg.in/foo.v2");
}

#[test]
fn trailing_slash_on_import_path_is_normalized_away() {
    let (coord, _fetcher) = coordinator();
    let ctx = CancelToken::new();
    let (with_slash, _) = coord.deduce(&ctx, "github.com/foo/bar/").unwrap();
    let (without_slash, _) = coord.deduce(&ctx, "github.com/foo/bar").unwrap();
    assert_eq!(with_slash, without_slash);
}

#[test]
fn descendant_of_a_probed_path_performs_no_second_probe() {
    let (coord, fetcher) = coordinator();
    fetcher.add_page(
        "https://example.com/proj?source-get=1",
        r#"<meta name="source-import" content="example.com/proj git https://example.com/proj.git">"#,
    );
    let ctx = CancelToken::new();

    let (root, _) = coord.deduce(&ctx, "example.com/proj").unwrap();
    let (root_descendant, _) = coord.deduce(&ctx, "example.com/proj/pkg/sub").unwrap();
    assert_eq!(root, root_descendant);
    assert_eq!(fetcher.calls.load(std::sync::atomic::Ordering::SeqCst), 1);
}

#[test]
fn unmatched_path_with_no_probe_registered_is_no_match_or_unreachable() {
    let (coord, _fetcher) = coordinator();
    let ctx = CancelToken::new();
    // No static rule matches and no page was registered for the probe, so
    // the fake fetcher's error surfaces as UnreachableMetadata.
    let err = coord.deduce(&ctx, "example.com/totally/unknown").unwrap_err();
    assert!(matches!(
        err,
        sourcemgr::SourceManagerError::UnreachableMetadata { .. }
    ));
}
