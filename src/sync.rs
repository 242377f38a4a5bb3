//! Sync Engine - Orchestrates parallel repository synchronization
//!
//! A run lists the in-scope repositories, reconciles their working copies concurrently
//! under a bounded pool, and then walks every successfully synced working copy to collect
//! the documentation directories and ignore paths, in catalog order.

use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, error, info, warn};

use crate::cancel::CancelFlag;
use crate::config::Config;
use crate::discovery::{CatalogFailure, RemoteCatalog, RepositoryDescriptor};
use crate::error::{ConfigError, ReconcileError};
use crate::filter::{select_directories, DirectorySelection};
use crate::git::{GitClient, SyncAction, SyncResult};
use crate::settings::{apply_local_settings, resolve};

/// Results from a complete sync operation
#[derive(Debug, Default)]
pub struct SyncReport {
    /// Directories to document, across all repositories in catalog order
    pub directories: Vec<PathBuf>,
    /// Paths to exclude, in the same order
    pub ignore_directories: Vec<PathBuf>,
    /// One result per listed repository, in catalog order
    pub results: Vec<SyncResult>,
    pub catalog_failures: Vec<CatalogFailure>,
    pub duration: Duration,
}

impl SyncReport {
    /// Repositories whose reconciliation failed
    pub fn failures(&self) -> impl Iterator<Item = &SyncResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn successful(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    /// Whether every owner listed and every repository reconciled
    pub fn is_clean(&self) -> bool {
        self.catalog_failures.is_empty() && self.failures().next().is_none()
    }

    /// Combine this run's lists with caller-supplied ones.
    ///
    /// The caller's entries always come after this run's entries.
    pub fn merge_with(
        &self,
        caller_directories: &[PathBuf],
        caller_ignores: &[PathBuf],
    ) -> DirectorySelection {
        let mut directories = self.directories.clone();
        directories.extend_from_slice(caller_directories);

        let mut ignored = self.ignore_directories.clone();
        ignored.extend_from_slice(caller_ignores);

        DirectorySelection {
            directories,
            ignored,
        }
    }
}

/// The main sync engine that orchestrates repository synchronization
pub struct SyncEngine {
    config: Arc<Config>,
    clone_root: PathBuf,
    catalog: RemoteCatalog,
    /// Owners whose hosting client could not be created
    setup_failures: Vec<CatalogFailure>,
    git_client: GitClient,
}

impl SyncEngine {
    /// Create an engine backed by GitHub, one client per configured owner.
    pub fn new(config: Config) -> Result<Self, ConfigError> {
        let (catalog, setup_failures) = RemoteCatalog::for_github(&config);
        let mut engine = Self::with_catalog(config, catalog)?;
        engine.setup_failures = setup_failures;
        Ok(engine)
    }

    /// Create an engine over an already assembled catalog.
    pub fn with_catalog(config: Config, catalog: RemoteCatalog) -> Result<Self, ConfigError> {
        let clone_root = config.clone_root()?;
        let git_client = GitClient::new(&config.sync);

        Ok(Self {
            config: Arc::new(config),
            clone_root,
            catalog,
            setup_failures: Vec::new(),
            git_client,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn clone_root(&self) -> &Path {
        &self.clone_root
    }

    /// Working copy location of a repository: `<clone_root>/<owner>/<name>`
    pub fn local_path(&self, repo: &RepositoryDescriptor) -> PathBuf {
        self.owner_dir(repo).join(&repo.name)
    }

    fn owner_dir(&self, repo: &RepositoryDescriptor) -> PathBuf {
        self.clone_root.join(&repo.owner_login)
    }

    /// List every in-scope repository without touching the filesystem
    pub async fn list(&self) -> (Vec<RepositoryDescriptor>, Vec<CatalogFailure>) {
        let listing = self.catalog.list_repositories().await;
        let mut failures = self.setup_failures.clone();
        failures.extend(listing.failures);
        (listing.repositories, failures)
    }

    /// Run a complete sync: list, reconcile, then select directories.
    ///
    /// Never fails as a whole. Per-owner and per-repository failures are on the report.
    pub async fn run(&self, cancel: &CancelFlag) -> SyncReport {
        let start_time = Instant::now();
        info!("Starting repository synchronization");

        let (repositories, catalog_failures) = self.list().await;
        info!("Discovered {} repositories", repositories.len());

        let mut results = self.reconcile_all(&repositories, cancel).await;

        let mut report = SyncReport {
            catalog_failures,
            ..Default::default()
        };

        for repo in &repositories {
            let Some(result) = results.remove(&repo.full_name) else {
                continue;
            };

            if result.is_success() && !cancel.is_cancelled() {
                if let Some(selection) = self.select(repo, &result.local_path, cancel).await {
                    report.directories.extend(selection.directories);
                    report.ignore_directories.extend(selection.ignored);
                }
            } else if let Some(error) = &result.error {
                debug!("Not filtering {}: {}", repo.full_name, error);
            }

            report.results.push(result);
        }

        report.duration = start_time.elapsed();

        info!(
            "Sync completed in {:.2}s: {} successful, {} failed, {} owner failures",
            report.duration.as_secs_f64(),
            report.successful(),
            report.failures().count(),
            report.catalog_failures.len()
        );

        report
    }

    /// Dry run: list and decide an action for every repository, mutating nothing.
    pub async fn plan(&self) -> SyncReport {
        let start_time = Instant::now();
        info!("Running dry-run sync analysis");

        let (repositories, catalog_failures) = self.list().await;
        let mut report = SyncReport {
            catalog_failures,
            ..Default::default()
        };

        for repo in &repositories {
            let local_path = self.local_path(repo);
            let (action, error) = match self.git_client.plan(repo, &local_path).await {
                Ok(action) => (action, None),
                Err(e) => (SyncAction::None, Some(e)),
            };

            report.results.push(SyncResult {
                full_name: repo.full_name.clone(),
                local_path,
                action,
                error,
            });
        }

        report.duration = start_time.elapsed();
        report
    }

    /// Reconcile every repository under a bounded pool, keyed by full name.
    async fn reconcile_all(
        &self,
        repositories: &[RepositoryDescriptor],
        cancel: &CancelFlag,
    ) -> HashMap<String, SyncResult> {
        let max_parallel = self.config.sync.max_parallel.max(1);
        info!(
            "Syncing {} repositories with concurrency {}",
            repositories.len(),
            max_parallel
        );

        let semaphore = Arc::new(Semaphore::new(max_parallel));

        // One creation guard per owner directory, shared by that owner's tasks
        let mut owner_guards: HashMap<PathBuf, Arc<OnceCell<()>>> = HashMap::new();

        let mut futures = FuturesUnordered::new();

        for repo in repositories {
            let owner_dir = self.owner_dir(repo);
            let guard = owner_guards.entry(owner_dir.clone()).or_default().clone();
            let semaphore = semaphore.clone();
            let target = self.local_path(repo);

            futures.push(async move {
                // The semaphore is never closed; a failed acquire only lifts the bound
                let _permit = semaphore.acquire().await.ok();

                let result = if cancel.is_cancelled() {
                    SyncResult {
                        full_name: repo.full_name.clone(),
                        local_path: target,
                        action: SyncAction::None,
                        error: Some(ReconcileError::Cancelled),
                    }
                } else {
                    match ensure_owner_dir(&guard, &owner_dir).await {
                        Ok(()) => self.git_client.reconcile(repo, &target, cancel).await,
                        Err(e) => SyncResult {
                            full_name: repo.full_name.clone(),
                            local_path: target,
                            action: SyncAction::None,
                            error: Some(e),
                        },
                    }
                };

                (repo.full_name.clone(), result)
            });
        }

        let mut results = HashMap::with_capacity(repositories.len());
        while let Some((full_name, result)) = futures.next().await {
            match &result.error {
                None => debug!("{}: {:?}", full_name, result.action),
                Some(ReconcileError::Cancelled) => debug!("{}: cancelled", full_name),
                Some(e) => error!("{} failed: {}", full_name, e),
            }
            results.insert(full_name, result);
        }

        results
    }

    /// Resolve settings and walk one working copy on the blocking pool.
    async fn select(
        &self,
        repo: &RepositoryDescriptor,
        working_copy: &Path,
        cancel: &CancelFlag,
    ) -> Option<DirectorySelection> {
        let config = self.config.clone();
        let owner_login = repo.owner_login.clone();
        let name = repo.name.clone();
        let working_copy = working_copy.to_path_buf();
        let cancel = cancel.clone();

        let task = tokio::task::spawn_blocking(move || {
            let mut settings = resolve(
                &owner_login,
                &name,
                config.default_settings(),
                config.override_rules(),
            );
            if let Err(e) = apply_local_settings(&mut settings, &working_copy) {
                warn!("Ignoring local settings for {}/{}: {}", owner_login, name, e);
            }
            select_directories(&settings, &working_copy, &cancel)
        });

        match task.await {
            Ok(Ok(selection)) => {
                debug!(
                    "{}: {} directories, {} ignored",
                    repo.full_name,
                    selection.directories.len(),
                    selection.ignored.len()
                );
                Some(selection)
            }
            Ok(Err(cancelled)) => {
                info!("Directory selection for {} stopped: {}", repo.full_name, cancelled);
                None
            }
            Err(e) => {
                error!("Directory selection for {} failed: {}", repo.full_name, e);
                None
            }
        }
    }
}

/// Create an owner directory at most once per run, however many tasks ask.
async fn ensure_owner_dir(guard: &OnceCell<()>, owner_dir: &Path) -> Result<(), ReconcileError> {
    guard
        .get_or_try_init(|| async {
            debug!("Ensuring owner directory {}", owner_dir.display());
            tokio::fs::create_dir_all(owner_dir)
                .await
                .map_err(|source| ReconcileError::Filesystem {
                    path: owner_dir.to_path_buf(),
                    source,
                })
        })
        .await
        .map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{OwnerKind, OwnerRule, RepoNameRules};
    use crate::discovery::{MockRepositoryHost, RemoteRepository};
    use crate::error::CatalogError;
    use assert_matches::assert_matches;

    fn config(clone_dir: &Path) -> Config {
        let mut config = Config::from_yaml_str(
            "owners: [{name: acme}]\nrepo_conf: {defaults: {dirs: [src], top_level_packages: ['*']}}",
        )
        .unwrap();
        config.clone_dir = clone_dir.to_string_lossy().into_owned();
        config
    }

    fn owner(name: &str) -> Arc<OwnerRule> {
        Arc::new(OwnerRule {
            name: name.to_string(),
            kind: OwnerKind::Organization,
            credential: String::new(),
            repos: RepoNameRules::default(),
        })
    }

    /// A repository whose clone URL cannot possibly be fetched
    fn unreachable_repo(root: &Path, name: &str) -> RemoteRepository {
        RemoteRepository {
            name: name.to_string(),
            owner_login: "acme".to_string(),
            clone_url: format!("file://{}/missing/{}.git", root.display(), name),
            ssh_url: None,
            default_branch: "main".to_string(),
        }
    }

    fn engine_with_repos(temp: &Path, names: &[&str]) -> SyncEngine {
        let repos: Vec<RemoteRepository> =
            names.iter().map(|n| unreachable_repo(temp, n)).collect();

        let mut host = MockRepositoryHost::new();
        host.expect_list_repositories()
            .returning(move || Ok(repos.clone()));
        host.expect_default_branch_head()
            .returning(|_| Ok("0".repeat(40)));

        let mut catalog = RemoteCatalog::new();
        catalog.add_source(owner("acme"), Box::new(host));

        SyncEngine::with_catalog(config(&temp.join("repos")), catalog).unwrap()
    }

    #[test]
    fn test_merge_with_appends_caller_lists() {
        let report = SyncReport {
            directories: vec![PathBuf::from("/r/a")],
            ignore_directories: vec![PathBuf::from("/r/a/gen")],
            ..Default::default()
        };

        let merged = report.merge_with(&[PathBuf::from("/extra")], &[PathBuf::from("/skip")]);
        assert_eq!(
            merged.directories,
            vec![PathBuf::from("/r/a"), PathBuf::from("/extra")]
        );
        assert_eq!(
            merged.ignored,
            vec![PathBuf::from("/r/a/gen"), PathBuf::from("/skip")]
        );
    }

    #[tokio::test]
    async fn test_failing_owner_is_reported_not_fatal() {
        let temp = tempfile::TempDir::new().unwrap();
        let mut host = MockRepositoryHost::new();
        host.expect_list_repositories().returning(|| {
            Err(CatalogError::OwnerNotFound {
                owner: "acme".to_string(),
            })
        });

        let mut catalog = RemoteCatalog::new();
        catalog.add_source(owner("acme"), Box::new(host));
        let engine =
            SyncEngine::with_catalog(config(&temp.path().join("repos")), catalog).unwrap();

        let report = engine.run(&CancelFlag::new()).await;
        assert!(report.results.is_empty());
        assert_eq!(report.catalog_failures.len(), 1);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn test_failed_clone_is_recorded_and_excluded() {
        let temp = tempfile::TempDir::new().unwrap();
        let engine = engine_with_repos(temp.path(), &["lib-a", "lib-b"]);

        let report = engine.run(&CancelFlag::new()).await;

        let names: Vec<&str> = report.results.iter().map(|r| r.full_name.as_str()).collect();
        assert_eq!(names, vec!["acme/lib-a", "acme/lib-b"]);
        assert_eq!(report.failures().count(), 2);
        assert!(report.directories.is_empty());
        assert!(report.ignore_directories.is_empty());

        // The owner directory exists even though every clone failed
        assert!(temp.path().join("repos/acme").is_dir());
        assert!(!temp.path().join("repos/acme/lib-a").exists());
    }

    #[tokio::test]
    async fn test_cancelled_run_reconciles_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let engine = engine_with_repos(temp.path(), &["lib-a"]);
        let cancel = CancelFlag::new();
        cancel.cancel();

        let report = engine.run(&cancel).await;
        assert_eq!(report.results.len(), 1);
        assert_matches!(report.results[0].error, Some(ReconcileError::Cancelled));
        assert!(!temp.path().join("repos/acme").exists());
    }

    #[tokio::test]
    async fn test_plan_mutates_nothing() {
        let temp = tempfile::TempDir::new().unwrap();
        let engine = engine_with_repos(temp.path(), &["lib-a"]);

        let report = engine.plan().await;
        assert_eq!(report.results.len(), 1);
        assert_eq!(report.results[0].action, SyncAction::FreshClone);
        assert_eq!(
            report.results[0].local_path,
            temp.path().join("repos/acme/lib-a")
        );
        assert!(!temp.path().join("repos").exists());
    }
}
