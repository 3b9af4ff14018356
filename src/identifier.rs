//! Core data model: [`ProjectIdentifier`], [`ProjectRoot`], [`Version`], and
//! the package-tree shape returned by `ListPackages`.

use std::collections::BTreeMap;
use std::fmt;

/// The canonical import-path prefix under which a project lives.
///
/// This is a normalized import path string and doubles as the primary key
/// for every map in this crate that is keyed by project.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProjectRoot(String);

impl ProjectRoot {
    /// Builds a `ProjectRoot` from an already-normalized path. Normalization
    /// (no trailing slash, no duplicate slashes) is the caller's job here;
    /// `DeductionCoordinator` is what actually normalizes raw import paths.
    pub fn new(path: impl Into<String>) -> Self {
        ProjectRoot(path.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if `self` is `other` or an import-path ancestor of it, i.e.
    /// `other` is `self` followed by `/` and more path segments.
    pub fn is_prefix_of(&self, other: &str) -> bool {
        other == self.0 || other.starts_with(&format!("{}/", self.0))
    }
}

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `{ProjectRoot, NetworkName}` — identifies a project to the facade.
///
/// `network_name`, when set, overrides where the source is actually fetched
/// from; two identifiers are source-equivalent when their effective network
/// names resolve to the same underlying repository (see
/// [`ProjectIdentifier::effective_network_name`]).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProjectIdentifier {
    pub project_root: ProjectRoot,
    pub network_name: Option<String>,
}

impl ProjectIdentifier {
    pub fn new(project_root: ProjectRoot) -> Self {
        ProjectIdentifier {
            project_root,
            network_name: None,
        }
    }

    pub fn with_network_name(project_root: ProjectRoot, network_name: impl Into<String>) -> Self {
        ProjectIdentifier {
            project_root,
            network_name: Some(network_name.into()),
        }
    }

    /// The name actually used to reach the underlying repository: the
    /// override if present, otherwise the project root.
    pub fn effective_network_name(&self) -> &str {
        self.network_name
            .as_deref()
            .unwrap_or_else(|| self.project_root.as_str())
    }
}

impl fmt::Display for ProjectIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.network_name {
            Some(n) if n != self.project_root.as_str() => {
                write!(f, "{} ({})", self.project_root, n)
            }
            _ => write!(f, "{}", self.project_root),
        }
    }
}

/// An immutable revision hash, as reported by the VCS (e.g. a git SHA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Revision(pub String);

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A version of a source: symbolic (branch/tag), exact (a semver), an
/// immutable revision, or a symbolic version paired with its resolved
/// revision (the memoized resolution).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Version {
    Branch(String),
    Tag(String),
    SemVer(semver::Version),
    Revision(Revision),
    Paired(Box<Version>, Revision),
}

impl Version {
    /// True for variants that are not already pinned to a revision.
    pub fn is_symbolic(&self) -> bool {
        !matches!(self, Version::Revision(_) | Version::Paired(_, _))
    }

    /// The revision this version resolves to, if it already carries one.
    pub fn resolved_revision(&self) -> Option<&Revision> {
        match self {
            Version::Revision(r) => Some(r),
            Version::Paired(_, r) => Some(r),
            _ => None,
        }
    }

    /// Pairs a symbolic version with its resolved revision. Pairing an
    /// already-paired or already-revision version replaces the revision.
    pub fn paired_with(self, rev: Revision) -> Version {
        match self {
            Version::Paired(inner, _) => Version::Paired(inner, rev),
            Version::Revision(_) => Version::Revision(rev),
            other => Version::Paired(Box::new(other), rev),
        }
    }

    /// String rendering used as solver hash input.
    ///
    /// Tagged so that a branch and a tag sharing the same name render
    /// differently (`"branch:v1"` vs `"tag:v1"`); this narrows, but per
    /// `original_source/` does not eliminate, the non-injectivity the
    /// upstream `gps` library documents for this rendering — two distinct
    /// *revisions* reachable only by different refs still hash by revision
    /// alone once paired. See DESIGN.md, "Hash-input rendering".
    pub fn hash_input(&self) -> String {
        match self {
            Version::Branch(b) => format!("branch:{b}"),
            Version::Tag(t) => format!("tag:{t}"),
            Version::SemVer(v) => format!("semver:{v}"),
            Version::Revision(r) => format!("rev:{r}"),
            Version::Paired(inner, r) => format!("{}@{}", inner.hash_input(), r),
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Branch(b) => write!(f, "{b}"),
            Version::Tag(t) => write!(f, "{t}"),
            Version::SemVer(v) => write!(f, "{v}"),
            Version::Revision(r) => write!(f, "{r}"),
            Version::Paired(inner, r) => write!(f, "{inner} ({r})"),
        }
    }
}

/// Parsed metadata for one package within a project tree, or the parse
/// error for a sub-import-path that failed to parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub name: String,
    pub import_path: String,
    pub comment_path: String,
    pub imports: Vec<String>,
    pub test_imports: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PackageOrError {
    Package(PackageInfo),
    Error(String),
}

/// A mapping from sub-import-path to either parsed package metadata or a
/// per-subpath parse error. Uses a `BTreeMap` so iteration order is stable
/// for callers that print it (the spec makes no ordering promise on
/// version lists, but a package tree is naturally keyed and sorted keys
/// are cheap and convenient).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageTree(pub BTreeMap<String, PackageOrError>);

impl PackageTree {
    pub fn new() -> Self {
        PackageTree(BTreeMap::new())
    }

    pub fn insert(&mut self, subpath: impl Into<String>, entry: PackageOrError) {
        self.0.insert(subpath.into(), entry);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Opaque manifest data produced by the injected [`crate::analyzer::ProjectAnalyzer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest(pub serde_json::Value);

/// Opaque lock data produced by the injected [`crate::analyzer::ProjectAnalyzer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lock(pub serde_json::Value);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_root_prefix_matching() {
        let root = ProjectRoot::new("github.com/foo/bar");
        assert!(root.is_prefix_of("github.com/foo/bar"));
        assert!(root.is_prefix_of("github.com/foo/bar/baz"));
        assert!(!root.is_prefix_of("github.com/foo/barbaz"));
        assert!(!root.is_prefix_of("github.com/foo/ba"));
    }

    #[test]
    fn effective_network_name_falls_back_to_root() {
        let id = ProjectIdentifier::new(ProjectRoot::new("github.com/foo/bar"));
        assert_eq!(id.effective_network_name(), "github.com/foo/bar");

        let id = ProjectIdentifier::with_network_name(
            ProjectRoot::new("github.com/foo/bar"),
            "github.com/foo/bar-fork",
        );
        assert_eq!(id.effective_network_name(), "github.com/foo/bar-fork");
    }

    #[test]
    fn hash_input_distinguishes_branch_and_tag_of_same_name() {
        let branch = Version::Branch("v1".to_string());
        let tag = Version::Tag("v1".to_string());
        assert_ne!(branch.hash_input(), tag.hash_input());
    }

    #[test]
    fn pairing_replaces_existing_revision() {
        let v = Version::Branch("main".to_string()).paired_with(Revision("abc".into()));
        let v = v.paired_with(Revision("def".into()));
        assert_eq!(v.resolved_revision(), Some(&Revision("def".into())));
    }
}
