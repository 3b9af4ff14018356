//! Core of a dependency-resolution toolkit's source-management layer:
//! existence checks, version listing, revision containment, manifest/lock
//! derivation and project-at-version export for version-controlled package
//! sources.
//!
//! [`SourceManager`] is the entry point. It is constructed with a
//! [`SourceManagerConfig`] and a caller-supplied [`ProjectAnalyzer`], and
//! resolves [`ProjectIdentifier`]s to on-disk [`SourceGateway`]s through a
//! [`SourceCoordinator`], deducing unfamiliar import paths via a
//! [`DeductionCoordinator`]. VCS access is pluggable through [`VcsAdapter`];
//! a `git2`-backed default is supplied in [`vcs::git`].

pub mod analyzer;
pub mod call_manager;
pub mod context;
pub mod deduction;
pub mod error;
pub mod gateway;
pub mod identifier;
pub mod manager;
pub mod package_scan;
pub mod release;
pub mod single_flight;
pub mod source_coordinator;
pub mod vcs;

pub use analyzer::ProjectAnalyzer;
pub use call_manager::{CallInfo, CallKind, CallManager, DurCount};
pub use context::CancelToken;
pub use deduction::{DeductionCoordinator, SourceRecipe, VcsKind};
pub use error::{Result, SourceManagerError};
pub use gateway::{ExistenceMode, GatewayState, SourceGateway};
pub use identifier::{
    Lock, Manifest, PackageInfo, PackageOrError, PackageTree, ProjectIdentifier, ProjectRoot,
    Revision, Version,
};
pub use manager::{SourceManager, SourceManagerConfig};
pub use package_scan::{DirectoryPackageScanner, PackageScanner};
pub use source_coordinator::SourceCoordinator;
pub use vcs::git::GitVcs;
pub use vcs::{VcsAdapter, VcsRef};
