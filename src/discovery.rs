//! Repository discovery abstraction layer
//!
//! This module turns configured owners into [`RepositoryDescriptor`]s. Each owner gets its
//! own [`RepositoryHost`] (built from that owner's credential) so a failing owner never
//! affects the others.

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::config::{Config, OwnerRule};
use crate::error::CatalogError;
use crate::github::GitHubClient;
use crate::pattern::fnmatch_any;

/// A repository as reported by the hosting service, before filtering
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteRepository {
    pub name: String,
    pub owner_login: String,
    /// HTTPS clone URL
    pub clone_url: String,
    /// Alternative SSH clone URL
    pub ssh_url: Option<String>,
    pub default_branch: String,
}

/// Everything needed to reconcile one repository
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryDescriptor {
    /// owner/name
    pub full_name: String,
    pub name: String,
    #[serde(skip)]
    pub owner: Arc<OwnerRule>,
    pub owner_login: String,
    pub clone_url: String,
    pub ssh_url: Option<String>,
    pub default_branch: String,
    /// Commit id at the head of the default branch
    pub head_commit: String,
}

impl RepositoryDescriptor {
    /// Build a descriptor from a listed repository and its default branch head
    pub fn new(owner: Arc<OwnerRule>, repo: RemoteRepository, head_commit: String) -> Self {
        Self {
            full_name: format!("{}/{}", repo.owner_login, repo.name),
            name: repo.name,
            owner,
            owner_login: repo.owner_login,
            clone_url: repo.clone_url,
            ssh_url: repo.ssh_url,
            default_branch: repo.default_branch,
            head_commit,
        }
    }
}

/// Hosting service access scoped to one owner and its credential
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RepositoryHost: Send + Sync {
    /// Enumerate every repository visible under the owner
    async fn list_repositories(&self) -> Result<Vec<RemoteRepository>, CatalogError>;

    /// Commit id at the head of the repository's default branch
    async fn default_branch_head(&self, repo: &RemoteRepository) -> Result<String, CatalogError>;
}

/// A failure recorded while listing, scoped to an owner or one of its repositories
#[derive(Debug, Clone)]
pub struct CatalogFailure {
    pub owner: String,
    pub repository: Option<String>,
    pub error: CatalogError,
}

/// Result of listing every configured owner
#[derive(Debug, Default)]
pub struct CatalogListing {
    pub repositories: Vec<RepositoryDescriptor>,
    pub failures: Vec<CatalogFailure>,
}

/// Lists in-scope repositories across all configured owners
pub struct RemoteCatalog {
    sources: Vec<(Arc<OwnerRule>, Box<dyn RepositoryHost>)>,
}

impl RemoteCatalog {
    pub fn new() -> Self {
        Self {
            sources: Vec::new(),
        }
    }

    pub fn add_source(&mut self, owner: Arc<OwnerRule>, host: Box<dyn RepositoryHost>) {
        self.sources.push((owner, host));
    }

    /// One GitHub client per configured owner, authenticated with that owner's credential.
    ///
    /// Owners whose client cannot be built are reported as failures, not errors.
    pub fn for_github(config: &Config) -> (Self, Vec<CatalogFailure>) {
        let mut catalog = Self::new();
        let mut failures = Vec::new();

        for owner in config.owners() {
            match GitHubClient::for_owner(owner.clone()) {
                Ok(client) => catalog.add_source(owner.clone(), Box::new(client)),
                Err(error) => {
                    warn!("Skipping owner {}: {}", owner.name, error);
                    failures.push(CatalogFailure {
                        owner: owner.name.clone(),
                        repository: None,
                        error,
                    });
                }
            }
        }

        (catalog, failures)
    }

    /// List every in-scope repository, in owner declaration order.
    ///
    /// A repository is in scope when its name matches at least one of the owner's name
    /// globs. A repository already listed under an earlier owner entry is skipped.
    pub async fn list_repositories(&self) -> CatalogListing {
        let mut listing = CatalogListing::default();
        let mut seen = HashSet::new();

        for (owner, host) in &self.sources {
            let repos = match host.list_repositories().await {
                Ok(repos) => repos,
                Err(error) => {
                    warn!("Failed to list repositories for {}: {}", owner.name, error);
                    listing.failures.push(CatalogFailure {
                        owner: owner.name.clone(),
                        repository: None,
                        error,
                    });
                    continue;
                }
            };

            let total = repos.len();
            let mut kept = 0usize;

            for repo in repos {
                if !fnmatch_any(&repo.name, &owner.repos.name) {
                    debug!("Excluding {}/{}: no name pattern matches", owner.name, repo.name);
                    continue;
                }

                let full_name = format!("{}/{}", repo.owner_login, repo.name);
                if !seen.insert(full_name.clone()) {
                    debug!("Skipping duplicate listing of {}", full_name);
                    continue;
                }

                match host.default_branch_head(&repo).await {
                    Ok(head) => {
                        listing
                            .repositories
                            .push(RepositoryDescriptor::new(owner.clone(), repo, head));
                        kept += 1;
                    }
                    Err(error) => {
                        warn!("Failed to resolve default branch of {}: {}", full_name, error);
                        listing.failures.push(CatalogFailure {
                            owner: owner.name.clone(),
                            repository: Some(repo.name),
                            error,
                        });
                    }
                }
            }

            info!("Owner {}: {} of {} repositories in scope", owner.name, kept, total);
        }

        listing
    }
}

impl Default for RemoteCatalog {
    fn default() -> Self {
        Self::new()
    }
}
