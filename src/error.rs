//! Error types for repoget.
//!
//! Errors are split by blast radius: a [`ConfigError`] aborts the whole run, a
//! [`CatalogError`] drops one owner (or one repository listing), a [`ReconcileError`]
//! drops one repository, and a [`SettingsError`] only skips the local settings merge.

use std::path::PathBuf;

use thiserror::Error;

/// Failures while loading the configuration document. Always fatal.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file does not exist.
    #[error("configuration not found at {path}")]
    NotFound { path: PathBuf },

    /// The document parsed but is structurally invalid, or failed to parse at all.
    #[error("malformed configuration{}: {message}", path.as_ref().map(|p| format!(" at {}", p.display())).unwrap_or_default())]
    Malformed {
        path: Option<PathBuf>,
        message: String,
    },

    /// Reading the file failed for a reason other than absence.
    #[error("failed to read configuration at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Failures talking to the hosting service for one owner.
#[derive(Debug, Clone, Error)]
pub enum CatalogError {
    /// Bad or expired credential.
    #[error("authentication failed for owner {owner}: {message}")]
    AuthenticationFailed { owner: String, message: String },

    /// The API rate limit was hit. Retrying is the caller's business.
    #[error("rate limited while listing {owner}: {message}")]
    RateLimited { owner: String, message: String },

    /// The owner does not exist or is not visible with the given credential.
    #[error("owner {owner} not found")]
    OwnerNotFound { owner: String },

    /// Any other API or transport failure.
    #[error("hosting API error for {owner}: {message}")]
    Api { owner: String, message: String },
}

impl CatalogError {
    /// Whether retrying later could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CatalogError::RateLimited { .. })
    }
}

/// Failures reconciling one repository's working copy.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// `git clone` failed. The URL never carries a credential.
    #[error("clone of {url} failed: {message}")]
    CloneFailed { url: String, message: String },

    /// `git pull` failed.
    #[error("pull of branch {branch} failed: {message}")]
    PullFailed { branch: String, message: String },

    /// Creating or deleting directories failed.
    #[error("filesystem operation on {path} failed: {source}")]
    Filesystem {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A git invocation could not be started at all.
    #[error("failed to run git {command}: {source}")]
    Git {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The run was cancelled before this repository was reconciled.
    #[error("cancelled")]
    Cancelled,
}

/// Failures reading a repository-local settings file. Recoverable.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("malformed local settings at {path}: {message}")]
    LocalSettingsMalformed { path: PathBuf, message: String },
}

/// Returned by long-running walks when the run was cancelled mid-way.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("operation cancelled")]
pub struct Cancelled;
