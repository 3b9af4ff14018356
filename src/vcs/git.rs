//! Default [`VcsAdapter`] implementation backed by `git2`, grounded on
//! `cargo`'s own `GitSource`/`GitDatabase` handling (see the verbatim copy
//! of it kept as `other_examples/astral-sh-uv` `puffin-vcs/src/source.rs`
//! in this workspace's retrieval pack).
//!
//! `cargo` separates a shared "db" clone from per-revision "checkouts"; this
//! adapter is simpler because `SourceGateway` already gives every source
//! its own private cache directory, so there is exactly one local clone per
//! source and `export` walks its tree directly rather than materializing a
//! second working-tree checkout first.

use std::path::Path;

use git2::{Direction, Oid, Repository};
use tracing::trace;

use crate::context::CancelToken;
use crate::vcs::{VcsAdapter, VcsRef};

/// Git-backed [`VcsAdapter`]. Stateless beyond its git2 configuration.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitVcs;

impl GitVcs {
    pub fn new() -> Self {
        GitVcs
    }
}

fn check_cancelled(ctx: &CancelToken) -> anyhow::Result<()> {
    if ctx.is_cancelled() {
        anyhow::bail!("operation cancelled");
    }
    Ok(())
}

impl VcsAdapter for GitVcs {
    fn clone(&self, ctx: &CancelToken, remote: &str, local_dir: &Path) -> anyhow::Result<()> {
        check_cancelled(ctx)?;
        trace!(remote, dir = %local_dir.display(), "git clone (bare)");
        git2::build::RepoBuilder::new()
            .bare(true)
            .clone(remote, local_dir)?;
        Ok(())
    }

    fn fetch(&self, ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<()> {
        check_cancelled(ctx)?;
        let repo = Repository::open_bare(local_dir)?;
        let mut remote = repo.find_remote("origin").or_else(|_| {
            // Mirror clones from `git2::build::RepoBuilder` always name the
            // remote `origin`; this fallback only matters for a cache
            // directory the caller pointed us at directly.
            repo.remotes()?
                .iter()
                .flatten()
                .next()
                .map(|name| repo.find_remote(name))
                .ok_or_else(|| git2::Error::from_str("no remotes configured"))?
        })?;
        trace!(dir = %local_dir.display(), "git fetch");
        remote.fetch(
            &["refs/heads/*:refs/heads/*", "refs/tags/*:refs/tags/*"],
            None,
            None,
        )?;
        Ok(())
    }

    fn list_refs(&self, ctx: &CancelToken, local_dir: &Path) -> anyhow::Result<Vec<VcsRef>> {
        check_cancelled(ctx)?;
        let repo = Repository::open_bare(local_dir)?;
        let mut out = Vec::new();
        for reference in repo.references()? {
            let reference = reference?;
            let Some(name) = reference.name() else {
                continue;
            };
            let Some(target) = reference.peel_to_commit().ok().map(|c| c.id()) else {
                continue;
            };
            out.push(VcsRef {
                name: name.to_string(),
                revision: target.to_string(),
            });
        }
        Ok(out)
    }

    fn contains(
        &self,
        ctx: &CancelToken,
        local_dir: &Path,
        revision: &str,
    ) -> anyhow::Result<bool> {
        check_cancelled(ctx)?;
        let repo = Repository::open_bare(local_dir)?;
        let oid = match Oid::from_str(revision) {
            Ok(oid) => oid,
            Err(_) => return Ok(false),
        };
        if repo.find_commit(oid).is_err() {
            return Ok(false);
        }
        let mut walk = repo.revwalk()?;
        for reference in repo.references()? {
            let reference = reference?;
            if let Some(target) = reference.target() {
                let _ = walk.push(target);
            }
        }
        for step in walk {
            check_cancelled(ctx)?;
            if step? == oid {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn export(
        &self,
        ctx: &CancelToken,
        local_dir: &Path,
        revision: &str,
        dst_dir: &Path,
    ) -> anyhow::Result<()> {
        check_cancelled(ctx)?;
        let repo = Repository::open_bare(local_dir)?;
        let oid = Oid::from_str(revision)?;
        let commit = repo.find_commit(oid)?;
        let tree = commit.tree()?;
        std::fs::create_dir_all(dst_dir)?;
        write_tree(ctx, &repo, &tree, dst_dir)?;
        Ok(())
    }

    fn is_reachable(&self, ctx: &CancelToken, remote: &str) -> anyhow::Result<bool> {
        check_cancelled(ctx)?;
        let mut handle = git2::Remote::create_detached(remote)?;
        match handle.connect(Direction::Fetch) {
            Ok(()) => {
                let _ = handle.disconnect();
                Ok(true)
            }
            Err(_) => Ok(false),
        }
    }
}

/// Recursively writes a git tree's blobs to `dst_dir`, skipping gitlinks
/// (submodules) since those point at a separate repository this adapter
/// has no handle to. Executable bits are preserved on Unix.
fn write_tree(
    ctx: &CancelToken,
    repo: &Repository,
    tree: &git2::Tree,
    dst_dir: &Path,
) -> anyhow::Result<()> {
    for entry in tree.iter() {
        check_cancelled(ctx)?;
        let Some(name) = entry.name() else { continue };
        let out_path = dst_dir.join(name);
        match entry.kind() {
            Some(git2::ObjectType::Blob) => {
                let blob = entry.to_object(repo)?.peel_to_blob()?;
                std::fs::write(&out_path, blob.content())?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let mode = entry.filemode();
                    let is_exec = mode & 0o111 != 0;
                    let perms = std::fs::Permissions::from_mode(if is_exec { 0o755 } else { 0o644 });
                    std::fs::set_permissions(&out_path, perms)?;
                }
            }
            Some(git2::ObjectType::Tree) => {
                std::fs::create_dir_all(&out_path)?;
                let subtree = entry.to_object(repo)?.peel_to_tree()?;
                write_tree(ctx, repo, &subtree, &out_path)?;
            }
            _ => {
                // Submodule gitlink or unrecognized entry kind; skip.
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn is_reachable_rejects_garbage_url() {
        let vcs = GitVcs::new();
        let ctx = CancelToken::new();
        let ok = vcs.is_reachable(&ctx, "not-a-real-protocol://nowhere.invalid/x");
        assert!(ok.is_err() || ok == Ok(false));
    }

    #[test]
    fn clone_into_bare_repo_then_list_refs_roundtrips() {
        let src = tempfile::tempdir().unwrap();
        let repo = Repository::init(src.path()).unwrap();
        std::fs::write(src.path().join("f.txt"), "hello").unwrap();
        let mut index = repo.index().unwrap();
        index.add_path(Path::new("f.txt")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = git2::Signature::now("test", "test@example.com").unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "init", &tree, &[])
            .unwrap();

        let dst = tempfile::tempdir().unwrap();
        let local_dir = dst.path().join("cache");
        let vcs = GitVcs::new();
        let ctx = CancelToken::new();
        vcs.clone(
            &ctx,
            src.path().to_str().unwrap(),
            &local_dir,
        )
        .unwrap();

        let refs = vcs.list_refs(&ctx, &local_dir).unwrap();
        assert!(!refs.is_empty());
        let rev = &refs[0].revision;
        assert!(vcs.contains(&ctx, &local_dir, rev).unwrap());
        assert!(!vcs
            .contains(&ctx, &local_dir, "0000000000000000000000000000000000000000")
            .unwrap());

        let export_dir = dst.path().join("export");
        vcs.export(&ctx, &local_dir, rev, &export_dir).unwrap();
        assert_eq!(
            std::fs::read_to_string(export_dir.join("f.txt")).unwrap(),
            "hello"
        );
        assert!(!export_dir.join(".git").exists());
    }
}
