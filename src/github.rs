use async_trait::async_trait;
use octocrab::models::Repository;
use octocrab::Octocrab;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::config::{OwnerKind, OwnerRule};
use crate::discovery::{RemoteRepository, RepositoryHost};
use crate::error::CatalogError;

const PER_PAGE: u8 = 100;

/// GitHub client scoped to a single owner and that owner's credential
pub struct GitHubClient {
    client: Octocrab,
    owner: Arc<OwnerRule>,
}

#[derive(Serialize)]
struct PageParams {
    per_page: u8,
    page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    affiliation: Option<&'static str>,
}

#[derive(Deserialize)]
struct AuthenticatedUser {
    login: String,
}

#[derive(Deserialize)]
struct BranchHead {
    commit: BranchCommit,
}

#[derive(Deserialize)]
struct BranchCommit {
    sha: String,
}

impl GitHubClient {
    /// Create a client for `owner` against the public GitHub API.
    ///
    /// Uses the owner's credential when one is configured and anonymous access otherwise.
    pub fn for_owner(owner: Arc<OwnerRule>) -> Result<Self, CatalogError> {
        Self::build(owner, None)
    }

    /// Same as [`GitHubClient::for_owner`] against another API root (GitHub Enterprise).
    pub fn with_base_uri(owner: Arc<OwnerRule>, base_uri: &str) -> Result<Self, CatalogError> {
        Self::build(owner, Some(base_uri))
    }

    fn build(owner: Arc<OwnerRule>, base_uri: Option<&str>) -> Result<Self, CatalogError> {
        let api_error = |e: octocrab::Error| CatalogError::Api {
            owner: owner.name.clone(),
            message: format!("failed to create GitHub client: {}", e),
        };

        let mut builder = Octocrab::builder();
        if let Some(uri) = base_uri {
            builder = builder.base_uri(uri).map_err(api_error)?;
        }

        let client = match owner.usable_credential() {
            Some(token) => {
                debug!("Using configured credential for owner {}", owner.name);
                builder.personal_token(token.to_string())
            }
            None => {
                debug!("No credential for owner {}, using anonymous access", owner.name);
                builder
            }
        }
        .build()
        .map_err(api_error)?;

        Ok(Self { client, owner })
    }

    pub fn owner(&self) -> &OwnerRule {
        &self.owner
    }

    /// List all repositories of an organization
    async fn list_organization_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        let org = &self.owner.name;
        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let page_repos = self
                .client
                .orgs(org.as_str())
                .list_repos()
                .per_page(PER_PAGE)
                .page(page)
                .send()
                .await
                .map_err(|e| classify_error(org, e))?;

            let count = page_repos.items.len();
            repositories.extend(page_repos.items);

            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        Ok(repositories)
    }

    /// List the repositories of a user account.
    ///
    /// When the credential belongs to that user, private repositories are listed through
    /// `/user/repos`; otherwise only the public ones are visible.
    async fn list_user_repositories(&self) -> Result<Vec<Repository>, CatalogError> {
        let user = &self.owner.name;

        if self.owner.usable_credential().is_some() {
            let me: AuthenticatedUser = self
                .client
                .get("/user", None::<&()>)
                .await
                .map_err(|e| classify_error(user, e))?;

            if me.login.eq_ignore_ascii_case(user) {
                let repositories = self.list_pages("/user/repos", Some("owner")).await?;
                return Ok(repositories
                    .into_iter()
                    .filter(|repo| {
                        repo.owner
                            .as_ref()
                            .map_or(true, |o| o.login.eq_ignore_ascii_case(user))
                    })
                    .collect());
            }
            debug!(
                "Credential for {} belongs to {}, listing public repositories only",
                user, me.login
            );
        }

        self.list_pages(&format!("/users/{}/repos", user), None).await
    }

    async fn list_pages(
        &self,
        route: &str,
        affiliation: Option<&'static str>,
    ) -> Result<Vec<Repository>, CatalogError> {
        let user = &self.owner.name;
        let mut repositories = Vec::new();
        let mut page = 1u32;

        loop {
            let params = PageParams {
                per_page: PER_PAGE,
                page,
                affiliation,
            };
            let items: Vec<Repository> = self
                .client
                .get(route, Some(&params))
                .await
                .map_err(|e| classify_error(user, e))?;

            let count = items.len();
            repositories.extend(items);

            if count < PER_PAGE as usize {
                break;
            }
            page += 1;
        }

        Ok(repositories)
    }

    fn to_remote(&self, repo: Repository) -> RemoteRepository {
        let owner_login = repo
            .owner
            .as_ref()
            .map(|o| o.login.clone())
            .unwrap_or_else(|| self.owner.name.clone());

        let clone_url = repo
            .clone_url
            .as_ref()
            .map(|u| u.to_string())
            .unwrap_or_else(|| format!("https://github.com/{}/{}.git", owner_login, repo.name));

        let default_branch = repo.default_branch.clone().unwrap_or_else(|| {
            debug!("{} reports no default branch, assuming main", repo.name);
            "main".to_string()
        });

        RemoteRepository {
            name: repo.name,
            owner_login,
            clone_url,
            ssh_url: repo.ssh_url,
            default_branch,
        }
    }
}

#[async_trait]
impl RepositoryHost for GitHubClient {
    async fn list_repositories(&self) -> Result<Vec<RemoteRepository>, CatalogError> {
        debug!("Fetching repositories for {:?} {}", self.owner.kind, self.owner.name);

        let repositories = match self.owner.kind {
            OwnerKind::Organization => self.list_organization_repositories().await?,
            OwnerKind::User => self.list_user_repositories().await?,
        };

        info!(
            "Found {} repositories for {}",
            repositories.len(),
            self.owner.name
        );

        Ok(repositories
            .into_iter()
            .map(|repo| self.to_remote(repo))
            .collect())
    }

    async fn default_branch_head(&self, repo: &RemoteRepository) -> Result<String, CatalogError> {
        let route = format!(
            "/repos/{}/{}/branches/{}",
            repo.owner_login, repo.name, repo.default_branch
        );

        let head: BranchHead = self
            .client
            .get(&route, None::<&()>)
            .await
            .map_err(|e| match classify_error(&self.owner.name, e) {
                CatalogError::OwnerNotFound { owner } => CatalogError::Api {
                    owner,
                    message: format!(
                        "branch {} of {} not found",
                        repo.default_branch, repo.name
                    ),
                },
                other => other,
            })?;

        Ok(head.commit.sha)
    }
}

/// Map an octocrab error onto the catalog taxonomy.
fn classify_error(owner: &str, error: octocrab::Error) -> CatalogError {
    match error {
        octocrab::Error::GitHub { source, .. } => {
            classify_status(owner, source.status_code.as_u16(), &source.message)
        }
        other => CatalogError::Api {
            owner: owner.to_string(),
            message: other.to_string(),
        },
    }
}

/// Map an HTTP status and GitHub error message onto the catalog taxonomy.
pub(crate) fn classify_status(owner: &str, status: u16, message: &str) -> CatalogError {
    let owner = owner.to_string();
    let message = message.to_string();
    let rate_limited = message.to_lowercase().contains("rate limit");

    match status {
        429 => CatalogError::RateLimited { owner, message },
        403 if rate_limited => CatalogError::RateLimited { owner, message },
        401 | 403 => CatalogError::AuthenticationFailed { owner, message },
        404 => CatalogError::OwnerNotFound { owner },
        _ => CatalogError::Api { owner, message },
    }
}
