//! [`DeductionCoordinator`]: resolves an import path to a canonical
//! [`ProjectRoot`] plus a source-construction recipe (spec.md §4.3).

use std::sync::{Arc, Mutex};

use regex::Regex;
use std::sync::OnceLock;
use tracing::{debug, trace};

use crate::call_manager::{CallInfo, CallKind, CallManager};
use crate::context::CancelToken;
use crate::error::{Result, SourceManagerError};
use crate::identifier::ProjectRoot;

/// The only VCS kind this crate ships a default adapter for. The recipe
/// still carries a kind tag so a caller's own `VcsAdapter` registry can
/// support more without this coordinator needing to know about them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VcsKind {
    Git,
}

/// What `SourceCoordinator` needs to construct a gateway for a deduced
/// project: which VCS it is, and the URL to reach it at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRecipe {
    pub vcs: VcsKind,
    pub remote_url: String,
}

/// Fetches the metadata document used to resolve import paths with no
/// static rule. Injected so tests (and callers who want a different wire
/// format) don't depend on real network I/O.
pub trait MetadataFetcher: Send + Sync {
    fn fetch(&self, ctx: &CancelToken, url: &str) -> anyhow::Result<String>;
}

/// Default fetcher: a single HTTP GET via `curl`, honoring cancellation by
/// aborting the transfer from curl's progress callback.
pub struct CurlMetadataFetcher;

impl MetadataFetcher for CurlMetadataFetcher {
    fn fetch(&self, ctx: &CancelToken, url: &str) -> anyhow::Result<String> {
        let mut handle = curl::easy::Easy::new();
        handle.url(url)?;
        handle.useragent("sourcemgr/0.1")?;
        handle.follow_location(true)?;
        handle.progress(true)?;
        let ctx = ctx.clone();
        handle.progress_function(move |_, _, _, _| !ctx.is_cancelled())?;

        let mut body = Vec::new();
        {
            let mut transfer = handle.transfer();
            transfer.write_function(|data| {
                body.extend_from_slice(data);
                Ok(data.len())
            })?;
            transfer.perform()?;
        }
        Ok(String::from_utf8_lossy(&body).into_owned())
    }
}

/// One announcement parsed from a metadata probe response: `prefix` is the
/// import-path prefix it covers, `remote_url` is where to fetch it from.
struct Announcement {
    prefix: String,
    vcs: VcsKind,
    remote_url: String,
}

fn meta_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<meta\s+name="source-import"\s+content="([^\s"]+)\s+(git)\s+([^"]+)"\s*/?>"#)
            .expect("static regex is valid")
    })
}

fn parse_announcements(body: &str) -> Vec<Announcement> {
    meta_tag_regex()
        .captures_iter(body)
        .filter_map(|c| {
            let vcs = match &c[2] {
                "git" => VcsKind::Git,
                _ => return None,
            };
            Some(Announcement {
                prefix: c[1].to_string(),
                vcs,
                remote_url: c[3].to_string(),
            })
        })
        .collect()
}

struct MemoEntry {
    root: ProjectRoot,
    recipe: SourceRecipe,
}

/// Resolves import paths to project roots, memoizing by longest matching
/// prefix and single-flighting concurrent probes for the same path.
pub struct DeductionCoordinator {
    calls: Arc<CallManager>,
    fetcher: Arc<dyn MetadataFetcher>,
    memo: Mutex<Vec<MemoEntry>>,
    probe_single_flight: crate::single_flight::SingleFlight<String, (ProjectRoot, SourceRecipe)>,
}

impl DeductionCoordinator {
    pub fn new(calls: Arc<CallManager>, fetcher: Arc<dyn MetadataFetcher>) -> Self {
        DeductionCoordinator {
            calls,
            fetcher,
            memo: Mutex::new(Vec::new()),
            probe_single_flight: crate::single_flight::SingleFlight::new(),
        }
    }

    pub fn with_default_fetcher(calls: Arc<CallManager>) -> Self {
        Self::new(calls, Arc::new(CurlMetadataFetcher))
    }

    fn memo_lookup(&self, path: &str) -> Option<(ProjectRoot, SourceRecipe)> {
        let memo = self.memo.lock().unwrap();
        memo.iter()
            .filter(|e| e.root.is_prefix_of(path))
            .max_by_key(|e| e.root.as_str().len())
            .map(|e| (e.root.clone(), e.recipe.clone()))
    }

    fn memoize(&self, root: ProjectRoot, recipe: SourceRecipe) {
        let mut memo = self.memo.lock().unwrap();
        if !memo.iter().any(|e| e.root == root) {
            memo.push(MemoEntry { root, recipe });
        }
    }

    /// Resolves `import_path` to its canonical project root plus the
    /// recipe used to construct a source for it. Memoized: a second call
    /// for the same path or any descendant path performs no probe
    /// (spec.md §8 property 6 / scenario 2).
    pub fn deduce(&self, ctx: &CancelToken, import_path: &str) -> Result<(ProjectRoot, SourceRecipe)> {
        let path = import_path.trim_end_matches('/');
        if let Some(hit) = self.memo_lookup(path) {
            trace!(path, "deduction memo hit, no probe performed");
            return Ok(hit);
        }

        let info = CallInfo::new(path.to_string(), CallKind::HttpMetadata);
        let (combined, _guard) = self.calls.set_up_call(ctx, info)?;

        if let Some((root, recipe)) = static_rules(path) {
            self.memoize(root.clone(), recipe.clone());
            return Ok((root, recipe));
        }

        if combined.is_cancelled() {
            return Err(SourceManagerError::Cancelled {
                operation: "deduce",
            });
        }

        let probe_root = probe_key(path);
        let fetcher = self.fetcher.clone();
        let probe_ctx = combined.clone();
        let probe_path = path.to_string();
        let result = self.probe_single_flight.get_or_run(probe_root.clone(), move || {
            probe(&*fetcher, &probe_ctx, &probe_root, &probe_path)
        });

        match result {
            Ok((root, recipe)) => {
                self.memoize(root.clone(), recipe.clone());
                Ok((root, recipe))
            }
            Err(e) => Err(e),
        }
    }
}

/// The unit of work a single metadata probe answers for: by convention the
/// first three import-path segments (host/owner/repo), falling back to
/// fewer when the path is shorter.
fn probe_key(path: &str) -> String {
    path.split('/').take(3).collect::<Vec<_>>().join("/")
}

fn probe(
    fetcher: &dyn MetadataFetcher,
    ctx: &CancelToken,
    probe_root: &str,
    full_path: &str,
) -> Result<(ProjectRoot, SourceRecipe)> {
    let url = format!("https://{probe_root}?source-get=1");
    debug!(url, "probing for source-import metadata");
    let body = fetcher
        .fetch(ctx, &url)
        .map_err(|e| SourceManagerError::UnreachableMetadata {
            path: full_path.to_string(),
            message: e.to_string(),
        })?;

    let announcements = parse_announcements(&body);
    if announcements.is_empty() {
        return Err(SourceManagerError::MalformedMetadata {
            path: full_path.to_string(),
            message: "no source-import meta tag found".to_string(),
        });
    }

    announcements
        .into_iter()
        .filter(|a| ProjectRoot::new(a.prefix.clone()).is_prefix_of(full_path))
        .max_by_key(|a| a.prefix.len())
        .map(|a| {
            (
                ProjectRoot::new(a.prefix),
                SourceRecipe {
                    vcs: a.vcs,
                    remote_url: a.remote_url,
                },
            )
        })
        .ok_or_else(|| SourceManagerError::NoMatch {
            path: full_path.to_string(),
        })
}

/// Static, zero-I/O classification against well-known hosting schemes.
/// Consulted before any probe is attempted.
fn static_rules(path: &str) -> Option<(ProjectRoot, SourceRecipe)> {
    rule_versioned_pseudo_host(path)
        .or_else(|| rule_known_host(path, "github.com"))
        .or_else(|| rule_known_host(path, "bitbucket.org"))
        .or_else(|| rule_explicit_vcs_suffix(path))
}

/// `gopkg.in/foo.v2/bar` → root `gopkg.in/foo.v2`; also the two-segment
/// form `gopkg.in/user/foo.v2/bar` → root `gopkg.in/user/foo.v2`.
fn rule_versioned_pseudo_host(path: &str) -> Option<(ProjectRoot, SourceRecipe)> {
    if !path.starts_with("gopkg.in/") {
        return None;
    }
    let segs: Vec<&str> = path.split('/').collect();
    let (root_segs, pkg_for_remote) = if segs.len() >= 3 && segs[2].contains(".v") {
        // gopkg.in/user/pkg.vN/...
        (&segs[..3], segs[2].split(".v").next().unwrap_or(segs[2]))
    } else if segs.len() >= 2 && segs[1].contains(".v") {
        // gopkg.in/pkg.vN/...
        (&segs[..2], segs[1].split(".v").next().unwrap_or(segs[1]))
    } else {
        return None;
    };
    let root = ProjectRoot::new(root_segs.join("/"));
    let remote_url = if root_segs.len() == 3 {
        format!("https://github.com/{}/{}", root_segs[1], pkg_for_remote)
    } else {
        format!("https://github.com/go-{pkg_for_remote}/{pkg_for_remote}")
    };
    Some((
        root,
        SourceRecipe {
            vcs: VcsKind::Git,
            remote_url,
        },
    ))
}

/// `<host>/<owner>/<repo>(/...)?` for a small table of well-known hosts
/// whose URL shape is known to be exactly that.
fn rule_known_host(path: &str, host: &str) -> Option<(ProjectRoot, SourceRecipe)> {
    let rest = path.strip_prefix(host)?.strip_prefix('/')?;
    let mut segs = rest.splitn(3, '/');
    let owner = segs.next()?;
    let repo = segs.next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    let root = ProjectRoot::new(format!("{host}/{owner}/{repo}"));
    Some((
        root,
        SourceRecipe {
            vcs: VcsKind::Git,
            remote_url: format!("https://{host}/{owner}/{repo}"),
        },
    ))
}

/// A path segment carrying an explicit `.git` suffix names its own root
/// regardless of host, e.g. `example.com/code/proj.git/sub` → root
/// `example.com/code/proj.git`.
fn rule_explicit_vcs_suffix(path: &str) -> Option<(ProjectRoot, SourceRecipe)> {
    let segs: Vec<&str> = path.split('/').collect();
    let idx = segs.iter().position(|s| s.ends_with(".git"))?;
    let root = ProjectRoot::new(segs[..=idx].join("/"));
    Some((
        root.clone(),
        SourceRecipe {
            vcs: VcsKind::Git,
            remote_url: format!("https://{}", root.as_str()),
        },
    ))
}

#[cfg(any(test, feature = "testing"))]
pub mod fakes {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    pub struct FakeMetadataFetcher {
        pub pages: StdMutex<HashMap<String, String>>,
        pub calls: std::sync::atomic::AtomicUsize,
        pub fail: StdMutex<Option<String>>,
    }

    impl FakeMetadataFetcher {
        pub fn add_page(&self, url: &str, body: &str) {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), body.to_string());
        }
    }

    impl MetadataFetcher for FakeMetadataFetcher {
        fn fetch(&self, _ctx: &CancelToken, url: &str) -> anyhow::Result<String> {
            self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if let Some(msg) = self.fail.lock().unwrap().clone() {
                anyhow::bail!(msg);
            }
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("fake: no page registered for {url}"))
        }
    }
}
