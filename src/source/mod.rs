use git2::{
    build::CheckoutBuilder, AutotagOption, ErrorCode, FetchOptions, ObjectType, Oid,
    RemoteCallbacks, Repository, SubmoduleUpdateOptions,
};
use std::{
    fmt, fs, io,
    path::{Path, PathBuf},
    str::FromStr,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

pub mod capability;

use capability::CapabilityError;

pub const DEFAULT_REMOTE: &str = "origin";

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("{path} is not a checkout of {url}")]
    RepositoryMismatch { path: PathBuf, url: String },
    #[error("{reference} was not found in {url}")]
    RefNotFound { reference: String, url: String },
    #[error("unsupported reference {reference}: {reason}")]
    UnsupportedRefKind { reference: String, reason: String },
    #[error("failed to fetch {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: git2::Error,
    },
    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),
    #[error("failed to prepare {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to query remote capabilities: {0}")]
    Capability(#[source] CapabilityError),
    #[error("source resolution was cancelled")]
    Cancelled,
    #[error("source resolution task failed: {0}")]
    Task(String),
}

/// A fully qualified git reference.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GitRef {
    Head,
    Branch(String),
    Tag(String),
    Commit(Oid),
}

impl GitRef {
    /// Refspec fetching only this reference from `remote`.
    pub fn refspec(&self, remote: &str) -> String {
        match self {
            GitRef::Head => format!("+HEAD:refs/remotes/{}/HEAD", remote),
            GitRef::Branch(name) => format!("+refs/heads/{}:refs/remotes/{}/{}", name, remote, name),
            GitRef::Tag(name) => format!("+refs/tags/{}:refs/tags/{}", name, name),
            GitRef::Commit(oid) => format!("+{}:refs/remotes/{}/{}", oid, remote, oid),
        }
    }

    /// Local reference the fetched object lands in, if any.
    fn local_name(&self, remote: &str) -> Option<String> {
        match self {
            GitRef::Head => Some(format!("refs/remotes/{}/HEAD", remote)),
            GitRef::Branch(name) => Some(format!("refs/remotes/{}/{}", remote, name)),
            GitRef::Tag(name) => Some(format!("refs/tags/{}", name)),
            GitRef::Commit(_) => None,
        }
    }
}

/// Refspec used when the remote cannot serve an arbitrary commit id.
pub fn fallback_refspec(remote: &str) -> String {
    format!("+refs/heads/*:refs/remotes/{}/*", remote)
}

impl FromStr for GitRef {
    type Err = SourceError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        if value == "HEAD" {
            return Ok(GitRef::Head);
        }

        if let Some(name) = value.strip_prefix("refs/heads/") {
            if !name.is_empty() {
                return Ok(GitRef::Branch(name.to_string()));
            }
        }

        if let Some(name) = value.strip_prefix("refs/tags/") {
            if !name.is_empty() {
                return Ok(GitRef::Tag(name.to_string()));
            }
        }

        if value.len() == 40 && value.chars().all(|c| c.is_ascii_hexdigit()) {
            return Oid::from_str(value)
                .map(GitRef::Commit)
                .map_err(|err| SourceError::UnsupportedRefKind {
                    reference: value.to_string(),
                    reason: err.message().to_string(),
                });
        }

        Err(SourceError::UnsupportedRefKind {
            reference: value.to_string(),
            reason: "expected HEAD, refs/heads/<name>, refs/tags/<name> or a full commit id"
                .to_string(),
        })
    }
}

impl fmt::Display for GitRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GitRef::Head => write!(f, "HEAD"),
            GitRef::Branch(name) => write!(f, "refs/heads/{}", name),
            GitRef::Tag(name) => write!(f, "refs/tags/{}", name),
            GitRef::Commit(oid) => write!(f, "{}", oid),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SourceRef {
    pub repository_url: String,
    pub git_ref: GitRef,
    pub local_path: PathBuf,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedSource {
    pub path: PathBuf,
    pub commit: Oid,
}

impl From<CapabilityError> for SourceError {
    fn from(err: CapabilityError) -> Self {
        match err {
            CapabilityError::Cancelled => SourceError::Cancelled,
            err => SourceError::Capability(err),
        }
    }
}

/// How a commit id ref is fetched.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitFetch {
    /// Ask for the commit itself.
    ById,
    /// Fetch every branch and look the commit up locally.
    AllBranches,
}

/// Fetches `source.git_ref` into `source.local_path` and checks it out.
pub async fn resolve(
    source: &SourceRef,
    cancel: &CancellationToken,
) -> Result<ResolvedSource, SourceError> {
    let commit_fetch = match source.git_ref {
        GitRef::Commit(_) => {
            if capability::supports_fetch_by_oid(&source.repository_url, cancel).await? {
                CommitFetch::ById
            } else {
                CommitFetch::AllBranches
            }
        }
        _ => CommitFetch::ById,
    };

    resolve_with(source, commit_fetch, cancel).await
}

/// [`resolve`] with the commit fetch strategy already decided.
pub async fn resolve_with(
    source: &SourceRef,
    commit_fetch: CommitFetch,
    cancel: &CancellationToken,
) -> Result<ResolvedSource, SourceError> {
    info!(
        url = %source.repository_url,
        reference = %source.git_ref,
        path = %source.local_path.display(),
        "resolving source"
    );

    let source = source.clone();
    let cancel = cancel.clone();

    tokio::task::spawn_blocking(move || resolve_blocking(&source, commit_fetch, &cancel))
        .await
        .map_err(|err| SourceError::Task(err.to_string()))?
}

fn resolve_blocking(
    source: &SourceRef,
    commit_fetch: CommitFetch,
    cancel: &CancellationToken,
) -> Result<ResolvedSource, SourceError> {
    let (repo, remote) = open_or_init(source)?;

    ensure_active(cancel)?;

    let refspec = match &source.git_ref {
        GitRef::Commit(_) if commit_fetch == CommitFetch::AllBranches => {
            info!("remote cannot serve commit ids, fetching all branches");
            fallback_refspec(&remote)
        }
        git_ref => git_ref.refspec(&remote),
    };

    fetch(&repo, &remote, &source.repository_url, &refspec, cancel)?;

    ensure_active(cancel)?;

    let commit = resolve_commit(&repo, &remote, source)?;

    checkout(&repo, &source.git_ref, commit)?;

    ensure_active(cancel)?;

    update_submodules(&repo, cancel)?;

    info!(commit = %commit, path = %source.local_path.display(), "source ready");

    Ok(ResolvedSource {
        path: source.local_path.clone(),
        commit,
    })
}

fn ensure_active(cancel: &CancellationToken) -> Result<(), SourceError> {
    if cancel.is_cancelled() {
        return Err(SourceError::Cancelled);
    }
    Ok(())
}

fn has_contents(path: &Path) -> Result<bool, SourceError> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_some()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(source) => Err(SourceError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Opens the existing checkout tracking `url`, or starts a new one.
fn open_or_init(source: &SourceRef) -> Result<(Repository, String), SourceError> {
    let path = &source.local_path;

    if has_contents(path)? {
        let mismatch = || SourceError::RepositoryMismatch {
            path: path.clone(),
            url: source.repository_url.clone(),
        };

        let repo = match Repository::open(path) {
            Ok(repo) => repo,
            Err(err) if err.code() == ErrorCode::NotFound => return Err(mismatch()),
            Err(err) => return Err(err.into()),
        };

        let remote = repo
            .remotes()?
            .iter()
            .flatten()
            .find(|name| {
                repo.find_remote(name)
                    .ok()
                    .and_then(|remote| remote.url().map(|url| url == source.repository_url))
                    .unwrap_or(false)
            })
            .map(str::to_string);

        let Some(remote) = remote else {
            return Err(mismatch());
        };

        debug!(remote = %remote, "reusing existing repository");

        return Ok((repo, remote));
    }

    fs::create_dir_all(path).map_err(|source| SourceError::Io {
        path: path.clone(),
        source,
    })?;

    let repo = Repository::init(path)?;
    repo.remote(DEFAULT_REMOTE, &source.repository_url)?;

    Ok((repo, DEFAULT_REMOTE.to_string()))
}

/// How a remote is reached, as far as fetching is concerned.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// A path or `file://` URL.
    Local,
    Http(Url),
    Daemon(Url),
    /// `ssh://`, scp-like `[user@]host:path` and any other scheme.
    Other,
}

impl Transport {
    pub fn of(url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => match parsed.scheme() {
                "file" => Transport::Local,
                "http" | "https" => Transport::Http(parsed),
                "git" => Transport::Daemon(parsed),
                _ => Transport::Other,
            },
            Err(_) if is_scp_like(url) => Transport::Other,
            Err(_) => Transport::Local,
        }
    }

    pub fn is_network(&self) -> bool {
        !matches!(self, Transport::Local)
    }
}

/// `[user@]host:path`, where no `/` comes before the first `:`.
fn is_scp_like(url: &str) -> bool {
    url.split_once(':')
        .map(|(host, _)| !host.is_empty() && !host.contains('/'))
        .unwrap_or(false)
}

/// Shallow clones are only possible over network transports.
pub fn is_network_url(url: &str) -> bool {
    Transport::of(url).is_network()
}

fn fetch_options<'a>(url: &str, cancel: &'a CancellationToken) -> FetchOptions<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.transfer_progress(|_| !cancel.is_cancelled());
    callbacks.sideband_progress(|_| !cancel.is_cancelled());

    let mut options = FetchOptions::new();
    options
        .remote_callbacks(callbacks)
        .download_tags(AutotagOption::None);

    if is_network_url(url) {
        options.depth(1);
    }

    options
}

fn fetch(
    repo: &Repository,
    remote: &str,
    url: &str,
    refspec: &str,
    cancel: &CancellationToken,
) -> Result<(), SourceError> {
    debug!(refspec = %refspec, "fetching");

    let mut remote = repo.find_remote(remote)?;
    let mut options = fetch_options(url, cancel);

    remote
        .fetch(&[refspec], Some(&mut options), None)
        .map_err(|source| {
            if cancel.is_cancelled() {
                SourceError::Cancelled
            } else {
                SourceError::Transport {
                    url: url.to_string(),
                    source,
                }
            }
        })
}

fn resolve_commit(repo: &Repository, remote: &str, source: &SourceRef) -> Result<Oid, SourceError> {
    let not_found = || SourceError::RefNotFound {
        reference: source.git_ref.to_string(),
        url: source.repository_url.clone(),
    };

    let Some(local_name) = source.git_ref.local_name(remote) else {
        let GitRef::Commit(oid) = source.git_ref else {
            return Err(not_found());
        };
        return repo
            .find_commit(oid)
            .map(|commit| commit.id())
            .map_err(|_| not_found());
    };

    let reference = repo.find_reference(&local_name).map_err(|_| not_found())?;
    let target = reference.resolve()?.target().ok_or_else(not_found)?;

    match source.git_ref {
        GitRef::Tag(_) => peel_tag(repo, target, &source.git_ref),
        _ => Ok(target),
    }
}

/// Follows a chain of tag objects down to the commit it names.
fn peel_tag(repo: &Repository, target: Oid, git_ref: &GitRef) -> Result<Oid, SourceError> {
    let mut object = repo.find_object(target, None)?;

    loop {
        match object.kind() {
            Some(ObjectType::Commit) => return Ok(object.id()),
            Some(ObjectType::Tag) => {
                let tag = object.as_tag().ok_or_else(|| SourceError::UnsupportedRefKind {
                    reference: git_ref.to_string(),
                    reason: format!("{} is not a readable tag", object.id()),
                })?;
                let next = tag.target()?;
                debug!(tag = %tag.name().unwrap_or_default(), target = %next.id(), "dereferencing tag");
                object = next;
            }
            kind => {
                return Err(SourceError::UnsupportedRefKind {
                    reference: git_ref.to_string(),
                    reason: format!(
                        "tag points at a {} instead of a commit",
                        kind.map(|k| k.str()).unwrap_or("unknown object")
                    ),
                })
            }
        }
    }
}

fn checkout(repo: &Repository, git_ref: &GitRef, oid: Oid) -> Result<(), SourceError> {
    let commit = repo.find_commit(oid)?;

    let mut builder = CheckoutBuilder::new();
    builder.force();

    repo.checkout_tree(commit.as_object(), Some(&mut builder))?;
    repo.set_head_detached(oid)?;

    if let GitRef::Branch(name) = git_ref {
        repo.branch(name, &commit, true)?;
        repo.set_head(&format!("refs/heads/{}", name))?;
    }

    debug!(commit = %oid, "checked out");

    Ok(())
}

fn update_submodules(repo: &Repository, cancel: &CancellationToken) -> Result<(), SourceError> {
    for mut submodule in repo.submodules()? {
        ensure_active(cancel)?;

        let url = submodule.url().unwrap_or_default().to_string();
        let name = submodule.name().unwrap_or_default().to_string();

        info!(submodule = %name, url = %url, "updating submodule");

        let mut update = SubmoduleUpdateOptions::new();
        update.fetch(fetch_options(&url, cancel));

        submodule
            .update(true, Some(&mut update))
            .map_err(|source| {
                if cancel.is_cancelled() {
                    SourceError::Cancelled
                } else {
                    SourceError::Transport {
                        url: url.clone(),
                        source,
                    }
                }
            })?;

        match submodule.open() {
            Ok(nested) => update_submodules(&nested, cancel)?,
            Err(err) => warn!(submodule = %name, "failed to open submodule: {}", err),
        }
    }

    Ok(())
}
