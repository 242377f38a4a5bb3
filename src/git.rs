//! Clone reconciliation.
//!
//! Reconciling a repository is split in three steps: [`GitClient::classify_local_clone`]
//! inspects the target directory, [`decide`] maps the observed state and the remote state
//! to a [`SyncAction`] without touching anything, and [`GitClient::reconcile`] carries the
//! action out. A mismatched branch or remote is never repaired in place; the working copy
//! is discarded and cloned again.

use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::process::Command as AsyncCommand;
use tracing::{debug, info, warn};
use url::Url;

use crate::cancel::CancelFlag;
use crate::config::{OwnerRule, SyncConfig};
use crate::discovery::RepositoryDescriptor;
use crate::error::ReconcileError;

/// Userinfo password GitHub accepts alongside a token
const TOKEN_PASSWORD: &str = "x-oauth-basic";

/// Observable state of a working copy, as read from the filesystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalClone {
    pub path: PathBuf,
    /// `None` for a detached HEAD
    pub current_branch: Option<String>,
    pub current_commit: String,
    /// Name of the first configured remote
    pub remote_name: Option<String>,
    /// That remote's URL with any embedded credentials removed
    pub remote_url: Option<String>,
}

/// What is found at a repository's target path
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCloneState {
    /// Nothing exists at the path
    Absent,
    /// Something exists but is not a usable repository rooted at the path
    Invalid { reason: String },
    /// A repository rooted at the path
    Valid(LocalClone),
}

/// What the hosting service says the working copy should look like
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteState {
    pub default_branch: String,
    pub head_commit: String,
    pub clone_url: String,
    pub ssh_url: Option<String>,
}

impl From<&RepositoryDescriptor> for RemoteState {
    fn from(repo: &RepositoryDescriptor) -> Self {
        Self {
            default_branch: repo.default_branch.clone(),
            head_commit: repo.head_commit.clone(),
            clone_url: repo.clone_url.clone(),
            ssh_url: repo.ssh_url.clone(),
        }
    }
}

/// The minimal action bringing a working copy in sync
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SyncAction {
    /// Already current
    None,
    FastForward,
    FreshClone,
    DiscardAndClone,
}

/// Outcome of reconciling one repository
#[derive(Debug)]
pub struct SyncResult {
    pub full_name: String,
    pub local_path: PathBuf,
    pub action: SyncAction,
    pub error: Option<ReconcileError>,
}

impl SyncResult {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Pick the action for an observed local state. Pure; touches nothing.
pub fn decide(local: &LocalCloneState, remote: &RemoteState) -> SyncAction {
    match local {
        LocalCloneState::Absent => SyncAction::FreshClone,
        LocalCloneState::Invalid { .. } => SyncAction::DiscardAndClone,
        LocalCloneState::Valid(clone) => {
            if clone.current_branch.as_deref() != Some(remote.default_branch.as_str()) {
                return SyncAction::DiscardAndClone;
            }

            let remote_matches = clone.remote_url.as_deref().is_some_and(|url| {
                remote_urls_match(url, &remote.clone_url)
                    || remote
                        .ssh_url
                        .as_deref()
                        .is_some_and(|ssh| remote_urls_match(url, ssh))
            });
            if !remote_matches {
                return SyncAction::DiscardAndClone;
            }

            if clone.current_commit == remote.head_commit {
                SyncAction::None
            } else {
                SyncAction::FastForward
            }
        }
    }
}

/// Compare two remote URLs ignoring embedded credentials, a trailing `/` and `.git`.
pub fn remote_urls_match(actual: &str, expected: &str) -> bool {
    normalize_remote_url(actual) == normalize_remote_url(expected)
}

fn normalize_remote_url(url: &str) -> String {
    let stripped = strip_credentials(url);
    stripped
        .trim_end_matches('/')
        .trim_end_matches(".git")
        .to_string()
}

/// Remove any userinfo from a URL. Non-URL remotes (scp-like SSH, paths) are kept as is.
pub fn strip_credentials(url: &str) -> String {
    match Url::parse(url) {
        Ok(mut parsed) if parsed.has_host() && matches!(parsed.scheme(), "http" | "https") => {
            // Both only fail for URLs that cannot carry credentials at all
            let _ = parsed.set_username("");
            let _ = parsed.set_password(None);
            parsed.to_string()
        }
        _ => url.to_string(),
    }
}

/// Embed the owner's credential in an HTTPS clone URL.
///
/// URLs of any other scheme, and owners without a usable credential, are left untouched
/// so that SSH agents and anonymous access keep working.
pub fn authenticated_url(clone_url: &str, owner: &OwnerRule) -> String {
    let Some(token) = owner.usable_credential() else {
        return clone_url.to_string();
    };

    match Url::parse(clone_url) {
        Ok(mut parsed) if parsed.scheme() == "https" && parsed.has_host() => {
            if parsed.set_username(token).is_err()
                || parsed.set_password(Some(TOKEN_PASSWORD)).is_err()
            {
                return clone_url.to_string();
            }
            parsed.to_string()
        }
        _ => clone_url.to_string(),
    }
}

/// Git operations handler
#[derive(Debug, Clone)]
pub struct GitClient {
    fast_forward_only: bool,
}

impl GitClient {
    pub fn new(config: &SyncConfig) -> Self {
        Self {
            fast_forward_only: config.fast_forward_only,
        }
    }

    /// Inspect `path` and report what is there.
    pub async fn classify_local_clone(&self, path: &Path) -> Result<LocalCloneState, ReconcileError> {
        let metadata = match tokio::fs::symlink_metadata(path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LocalCloneState::Absent);
            }
            Err(source) => {
                return Err(ReconcileError::Filesystem {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let invalid = |reason: &str| -> Result<LocalCloneState, ReconcileError> {
            debug!("{} is not a usable clone: {}", path.display(), reason);
            Ok(LocalCloneState::Invalid {
                reason: reason.to_string(),
            })
        };

        if !metadata.is_dir() {
            return invalid("not a directory");
        }
        if !path.join(".git").exists() {
            return invalid("no .git metadata");
        }

        // A stray .git inside an unrelated parent repository must not count
        let Some(toplevel) = self.git_stdout(path, &["rev-parse", "--show-toplevel"]).await? else {
            return invalid("git does not recognize a repository");
        };
        if !same_directory(Path::new(&toplevel), path).await {
            return invalid("repository root is elsewhere");
        }

        let Some(current_commit) = self.git_stdout(path, &["rev-parse", "HEAD"]).await? else {
            return invalid("HEAD does not resolve to a commit");
        };

        let current_branch = self
            .git_stdout(path, &["branch", "--show-current"])
            .await?
            .filter(|b| !b.is_empty());

        let remote_name = self
            .git_stdout(path, &["remote"])
            .await?
            .and_then(|remotes| remotes.lines().next().map(str::to_string));

        let remote_url = match &remote_name {
            Some(name) => self
                .git_stdout(path, &["remote", "get-url", name])
                .await?
                .map(|url| strip_credentials(&url)),
            None => None,
        };

        Ok(LocalCloneState::Valid(LocalClone {
            path: path.to_path_buf(),
            current_branch,
            current_commit,
            remote_name,
            remote_url,
        }))
    }

    /// Work out the action for `repo` at `target` without changing anything.
    pub async fn plan(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<SyncAction, ReconcileError> {
        let state = self.classify_local_clone(target).await?;
        Ok(decide(&state, &RemoteState::from(repo)))
    }

    /// Bring the working copy at `target` in sync with `repo`.
    ///
    /// Never fails as a whole: errors end up in the returned [`SyncResult`].
    pub async fn reconcile(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
        cancel: &CancelFlag,
    ) -> SyncResult {
        let mut result = SyncResult {
            full_name: repo.full_name.clone(),
            local_path: target.to_path_buf(),
            action: SyncAction::None,
            error: None,
        };

        if cancel.is_cancelled() {
            result.error = Some(ReconcileError::Cancelled);
            return result;
        }

        let state = match self.classify_local_clone(target).await {
            Ok(state) => state,
            Err(e) => {
                result.error = Some(e);
                return result;
            }
        };

        result.action = decide(&state, &RemoteState::from(repo));
        debug!("{}: {:?} -> {:?}", repo.full_name, state, result.action);

        let outcome = match (result.action, &state) {
            (SyncAction::None, _) => {
                info!("{} is up to date", repo.full_name);
                Ok(())
            }
            (SyncAction::FastForward, LocalCloneState::Valid(clone)) => {
                self.pull(clone, repo).await
            }
            (SyncAction::FreshClone, _) => self.clone_shallow(repo, target).await,
            (SyncAction::DiscardAndClone | SyncAction::FastForward, _) => {
                match discard(target).await {
                    Ok(()) => self.clone_shallow(repo, target).await,
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = outcome {
            warn!("{}: {:?} failed: {}", repo.full_name, result.action, e);
            result.error = Some(e);
        }

        result
    }

    /// Shallow clone of the default branch into `target`.
    ///
    /// A failed clone leaves no partial directory behind.
    async fn clone_shallow(
        &self,
        repo: &RepositoryDescriptor,
        target: &Path,
    ) -> Result<(), ReconcileError> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| ReconcileError::Filesystem {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }

        let url = authenticated_url(&repo.clone_url, &repo.owner);
        info!(
            "Cloning {} ({}) -> {}",
            strip_credentials(&url),
            repo.default_branch,
            target.display()
        );

        let output = git_command()
            .args([
                "clone",
                "--depth",
                "1",
                "--branch",
                repo.default_branch.as_str(),
                url.as_str(),
            ])
            .arg(target)
            .output()
            .await
            .map_err(|source| ReconcileError::Git {
                command: "clone".to_string(),
                source,
            })?;

        if !output.status.success() {
            remove_partial_clone(target).await;
            return Err(ReconcileError::CloneFailed {
                url: strip_credentials(&repo.clone_url),
                message: redact(&stderr_of(&output), &url, &repo.clone_url),
            });
        }

        // The token stays out of .git/config; pulls pass it on the command line
        if url != repo.clone_url {
            let output = git_command()
                .args(["remote", "set-url", "origin", repo.clone_url.as_str()])
                .current_dir(target)
                .output()
                .await
                .map_err(|source| ReconcileError::Git {
                    command: "remote set-url".to_string(),
                    source,
                })?;

            if !output.status.success() {
                remove_partial_clone(target).await;
                return Err(ReconcileError::CloneFailed {
                    url: strip_credentials(&repo.clone_url),
                    message: redact(&stderr_of(&output), &url, &repo.clone_url),
                });
            }
        }

        Ok(())
    }

    /// Force-pull the default branch into an existing clone.
    ///
    /// Pulls from the clone URL directly so the owner's credential is used without ever
    /// being stored in the working copy.
    async fn pull(&self, clone: &LocalClone, repo: &RepositoryDescriptor) -> Result<(), ReconcileError> {
        let url = authenticated_url(&repo.clone_url, &repo.owner);
        info!(
            "Pulling {} from {} in {}",
            repo.default_branch,
            strip_credentials(&url),
            clone.path.display()
        );

        let output = git_command()
            .args(self.pull_arguments(&url, &repo.default_branch))
            .current_dir(&clone.path)
            .output()
            .await
            .map_err(|source| ReconcileError::Git {
                command: "pull".to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ReconcileError::PullFailed {
                branch: repo.default_branch.clone(),
                message: redact(&stderr_of(&output), &url, &repo.clone_url),
            });
        }

        Ok(())
    }

    fn pull_arguments(&self, url: &str, branch: &str) -> Vec<String> {
        let mut args = vec!["pull".to_string(), "--force".to_string()];
        if self.fast_forward_only {
            args.push("--ff-only".to_string());
        }
        args.push(url.to_string());
        args.push(format!("refs/heads/{}", branch));
        args
    }

    /// Run a read-only git query in `path`; `None` when git reports failure.
    async fn git_stdout(&self, path: &Path, args: &[&str]) -> Result<Option<String>, ReconcileError> {
        let output = git_command()
            .args(args)
            .current_dir(path)
            .output()
            .await
            .map_err(|source| ReconcileError::Git {
                command: args.join(" "),
                source,
            })?;

        if output.status.success() {
            Ok(Some(String::from_utf8_lossy(&output.stdout).trim().to_string()))
        } else {
            Ok(None)
        }
    }
}

/// Delete whatever is at `target`, directory or not.
async fn discard(target: &Path) -> Result<(), ReconcileError> {
    info!("Discarding {}", target.display());
    let metadata = tokio::fs::symlink_metadata(target).await;
    let removal = match metadata {
        Ok(m) if m.is_dir() => tokio::fs::remove_dir_all(target).await,
        Ok(_) => tokio::fs::remove_file(target).await,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    };

    removal.map_err(|source| ReconcileError::Filesystem {
        path: target.to_path_buf(),
        source,
    })
}

async fn remove_partial_clone(target: &Path) {
    if target.exists() {
        if let Err(e) = tokio::fs::remove_dir_all(target).await {
            warn!("Failed to clean up {}: {}", target.display(), e);
        }
    }
}

async fn same_directory(a: &Path, b: &Path) -> bool {
    match (tokio::fs::canonicalize(a).await, tokio::fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

fn git_command() -> AsyncCommand {
    let mut command = AsyncCommand::new("git");
    // Never block on an interactive credential prompt
    command.env("GIT_TERMINAL_PROMPT", "0");
    command.kill_on_drop(true);
    command
}

fn stderr_of(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).trim().to_string()
}

/// Replace a credential-bearing URL in git output with its public form.
fn redact(message: &str, secret_url: &str, public_url: &str) -> String {
    if secret_url == public_url {
        message.to_string()
    } else {
        message.replace(secret_url, public_url)
    }
}
