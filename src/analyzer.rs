//! The injected `ProjectAnalyzer` interface (spec.md §6).
//!
//! Manifest/lock parsing is deliberately out of this crate's scope: the
//! analyzer is supplied by the caller so this crate never has to know the
//! ecosystem's manifest format.

use std::path::Path;

use crate::identifier::{Lock, Manifest};

/// Derives manifest/lock data from a freshly-exported source tree, and
/// identifies itself for cache-versioning purposes.
pub trait ProjectAnalyzer: Send + Sync {
    /// Invoked on a freshly-exported source tree rooted at `path`, whose
    /// canonical import path is `import_root`.
    fn derive_manifest_and_lock(
        &self,
        path: &Path,
        import_root: &str,
    ) -> anyhow::Result<(Manifest, Lock)>;

    /// `(name, version)` of this analyzer implementation, used to version
    /// cached analyzer output so a cache is not served across an analyzer
    /// upgrade that changed its output format.
    fn info(&self) -> (String, String);
}

/// Test double for [`ProjectAnalyzer`]. Behind the `testing` feature (on by
/// default for the crate's own `#[cfg(test)]` builds) so integration tests
/// under `tests/` can use it too, the way `cargo`'s own support crates
/// expose fixture helpers behind a feature flag.
#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An analyzer that records how many times it was invoked and returns
    /// a fixed manifest/lock pair, for use in this crate's own tests and in
    /// integration tests under `tests/`.
    #[derive(Default)]
    pub struct FakeAnalyzer {
        pub calls: AtomicUsize,
        pub fail: std::sync::atomic::AtomicBool,
    }

    impl ProjectAnalyzer for FakeAnalyzer {
        fn derive_manifest_and_lock(
            &self,
            path: &Path,
            import_root: &str,
        ) -> anyhow::Result<(Manifest, Lock)> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("fake analyzer configured to fail");
            }
            if !path.exists() {
                anyhow::bail!("export path {} does not exist", path.display());
            }
            let manifest = Manifest(serde_json::json!({ "root": import_root }));
            let lock = Lock(serde_json::json!({ "root": import_root, "locked": true }));
            Ok((manifest, lock))
        }

        fn info(&self) -> (String, String) {
            ("fake-analyzer".to_string(), "0.0.0".to_string())
        }
    }
}
