//! Common test utilities: throwaway git upstreams and a static repository host

#![allow(dead_code)]

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;

use repoget::config::OwnerRule;
use repoget::discovery::{RemoteRepository, RepositoryDescriptor, RepositoryHost};
use repoget::error::CatalogError;

/// Whether a usable `git` binary is on the PATH
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// Run git in `dir` with a fixed identity and return trimmed stdout
pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args([
            "-c",
            "user.name=repoget tests",
            "-c",
            "user.email=tests@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");

    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).trim().to_string()
}

/// Create an upstream repository on `main` holding `files`, committed once
pub fn create_upstream(dir: &Path, files: &[(&str, &str)]) -> PathBuf {
    std::fs::create_dir_all(dir).expect("failed to create upstream dir");
    git(dir, &["init", "--quiet"]);
    git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"]);

    for (path, content) in files {
        write_file(dir, path, content);
    }
    git(dir, &["add", "--all"]);
    git(dir, &["commit", "--quiet", "-m", "initial"]);

    dir.to_path_buf()
}

/// Add or change one file upstream and return the new head commit
pub fn commit_file(repo: &Path, path: &str, content: &str) -> String {
    write_file(repo, path, content);
    git(repo, &["add", "--all"]);
    git(repo, &["commit", "--quiet", "-m", &format!("update {}", path)]);
    head(repo)
}

pub fn head(repo: &Path) -> String {
    git(repo, &["rev-parse", "HEAD"])
}

pub fn current_branch(repo: &Path) -> String {
    git(repo, &["branch", "--show-current"])
}

pub fn file_url(path: &Path) -> String {
    format!("file://{}", path.display())
}

fn write_file(root: &Path, path: &str, content: &str) {
    let target = root.join(path);
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).expect("failed to create parent dir");
    }
    std::fs::write(target, content).expect("failed to write file");
}

/// A listed repository backed by a local upstream
pub fn remote(owner: &str, name: &str, upstream: &Path) -> RemoteRepository {
    RemoteRepository {
        name: name.to_string(),
        owner_login: owner.to_string(),
        clone_url: file_url(upstream),
        ssh_url: None,
        default_branch: "main".to_string(),
    }
}

/// Descriptor for a local upstream at its current head
pub fn descriptor(owner: Arc<OwnerRule>, name: &str, upstream: &Path) -> RepositoryDescriptor {
    let login = owner.name.clone();
    RepositoryDescriptor::new(owner, remote(&login, name, upstream), head(upstream))
}

/// Repository host serving a fixed listing with heads captured at construction
pub struct StaticHost {
    repositories: Vec<(RemoteRepository, String)>,
}

impl StaticHost {
    pub fn new(repositories: Vec<(RemoteRepository, &Path)>) -> Self {
        Self {
            repositories: repositories
                .into_iter()
                .map(|(repo, upstream)| (repo, head(upstream)))
                .collect(),
        }
    }
}

#[async_trait]
impl RepositoryHost for StaticHost {
    async fn list_repositories(&self) -> Result<Vec<RemoteRepository>, CatalogError> {
        Ok(self.repositories.iter().map(|(r, _)| r.clone()).collect())
    }

    async fn default_branch_head(&self, repo: &RemoteRepository) -> Result<String, CatalogError> {
        self.repositories
            .iter()
            .find(|(r, _)| r.name == repo.name)
            .map(|(_, head)| head.clone())
            .ok_or_else(|| CatalogError::Api {
                owner: repo.owner_login.clone(),
                message: format!("unknown repository {}", repo.name),
            })
    }
}
