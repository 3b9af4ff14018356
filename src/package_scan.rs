//! Package-tree scanning.
//!
//! `ListPackages` walks an exported source tree and reports one package per
//! populated directory. Extracting a real import graph is ecosystem-specific
//! (it requires knowing the target language's syntax) and is therefore
//! delegated to an injected [`PackageScanner`], mirroring how
//! [`crate::analyzer::ProjectAnalyzer`] is injected for manifest/lock
//! parsing. [`DirectoryPackageScanner`] is the built-in default: it reports
//! every non-empty directory as a package with an empty import list, which
//! is enough to satisfy `ListPackages`'s contract (a tree keyed by
//! sub-import-path) without assuming any particular source language.

use std::path::Path;

use walkdir::WalkDir;

use crate::identifier::{PackageInfo, PackageOrError, PackageTree};

/// Scans an exported tree rooted at `root_dir` (whose canonical import path
/// is `import_root`) into a [`PackageTree`].
pub trait PackageScanner: Send + Sync {
    fn scan(&self, root_dir: &Path, import_root: &str) -> PackageTree;
}

/// Default scanner: one package per directory (including the root) that
/// contains at least one regular file, skipping VCS metadata directories.
/// `Imports`/`TestImports` are left empty since extracting them requires a
/// language-specific parser this crate does not assume.
#[derive(Debug, Default, Clone, Copy)]
pub struct DirectoryPackageScanner;

impl PackageScanner for DirectoryPackageScanner {
    fn scan(&self, root_dir: &Path, import_root: &str) -> PackageTree {
        let mut tree = PackageTree::new();

        for entry in WalkDir::new(root_dir)
            .into_iter()
            .filter_entry(|e| e.file_name() != ".git")
        {
            let entry = match entry {
                Ok(e) => e,
                Err(e) => {
                    let path = e.path().unwrap_or(root_dir).display().to_string();
                    tree.insert(path, PackageOrError::Error(e.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let has_file = std::fs::read_dir(entry.path())
                .map(|mut rd| rd.any(|e| e.map(|e| e.file_type().map(|t| t.is_file()).unwrap_or(false)).unwrap_or(false)))
                .unwrap_or(false);
            if !has_file {
                continue;
            }

            let rel = entry
                .path()
                .strip_prefix(root_dir)
                .unwrap_or(entry.path())
                .to_string_lossy()
                .replace('\\', "/");
            let import_path = if rel.is_empty() {
                import_root.to_string()
            } else {
                format!("{import_root}/{rel}")
            };
            let name = entry
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| import_root.to_string());

            tree.insert(
                import_path.clone(),
                PackageOrError::Package(PackageInfo {
                    name,
                    import_path: import_path.clone(),
                    comment_path: import_path,
                    imports: Vec::new(),
                    test_imports: Vec::new(),
                }),
            );
        }

        tree
    }
}
