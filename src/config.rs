use dirs::config_dir;
use path_clean::PathClean;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::warn;

use crate::error::ConfigError;
use crate::pattern;
use crate::settings::{PartialRepoSettings, RepoSettings};

/// Credential values that stand for "no credential configured".
const CREDENTIAL_PLACEHOLDERS: &[&str] = &["N/A", "none", "-"];

/// Main configuration structure for repoget
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Directory that holds one sub-directory per owner
    #[serde(default = "default_clone_dir")]
    pub clone_dir: String,

    /// Owners whose repositories are in scope
    pub owners: Vec<Arc<OwnerRule>>,

    /// Per-repository settings: defaults plus ordered overrides
    pub repo_conf: RepoConf,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Kind of account owning repositories on the hosting service
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum OwnerKind {
    #[default]
    Organization,
    User,
}

/// An owner and the name globs selecting its repositories
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OwnerRule {
    pub name: String,

    #[serde(default)]
    pub kind: OwnerKind,

    /// Opaque access token; empty means anonymous access
    #[serde(default)]
    pub credential: String,

    #[serde(default)]
    pub repos: RepoNameRules,
}

/// Repository name globs for one owner, OR-ed together
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RepoNameRules {
    #[serde(default = "default_name_globs")]
    pub name: Vec<String>,
}

/// Defaults and overrides for per-repository settings
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct RepoConf {
    pub defaults: RepoSettings,

    #[serde(default)]
    pub overrides: Vec<OverrideRule>,
}

/// Settings applied to repositories whose owner and name match the globs
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct OverrideRule {
    #[serde(default = "default_glob")]
    pub name: String,

    #[serde(default = "default_glob")]
    pub owner: String,

    pub settings: PartialRepoSettings,
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct SyncConfig {
    /// Maximum parallel reconciliations
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Refuse non fast-forward pulls
    #[serde(default = "default_true")]
    pub fast_forward_only: bool,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level used when RUST_LOG is unset
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default value functions
fn default_clone_dir() -> String {
    "repos".to_string()
}
fn default_glob() -> String {
    "*".to_string()
}
fn default_name_globs() -> Vec<String> {
    vec![default_glob()]
}
fn default_true() -> bool {
    true
}
fn default_max_parallel() -> usize {
    4
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RepoNameRules {
    fn default() -> Self {
        Self {
            name: default_name_globs(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_parallel: default_max_parallel(),
            fast_forward_only: default_true(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl OwnerRule {
    /// The credential to use, if one is really configured.
    ///
    /// Empty strings, placeholders and unexpanded `${VAR}` references count as absent.
    pub fn usable_credential(&self) -> Option<&str> {
        let credential = self.credential.trim();
        if credential.is_empty()
            || credential.starts_with("${")
            || CREDENTIAL_PLACEHOLDERS.contains(&credential)
        {
            None
        } else {
            Some(credential)
        }
    }
}

impl Config {
    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| {
            if source.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound {
                    path: path.to_path_buf(),
                }
            } else {
                ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        Self::parse(&content, Some(path))
    }

    /// Parse configuration from YAML text
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        Self::parse(content, None)
    }

    fn parse(content: &str, path: Option<&Path>) -> Result<Self, ConfigError> {
        let malformed = |message: String| ConfigError::Malformed {
            path: path.map(Path::to_path_buf),
            message,
        };

        let mut config: Config =
            serde_yaml::from_str(content).map_err(|e| malformed(e.to_string()))?;

        config.validate().map_err(malformed)?;
        config.expand_credentials();

        Ok(config)
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Option<PathBuf> {
        config_dir().map(|dir| dir.join("repoget").join("repoget.yml"))
    }

    /// Owners in declared order
    pub fn owners(&self) -> &[Arc<OwnerRule>] {
        &self.owners
    }

    /// Override rules in declared order
    pub fn override_rules(&self) -> &[OverrideRule] {
        &self.repo_conf.overrides
    }

    pub fn default_settings(&self) -> &RepoSettings {
        &self.repo_conf.defaults
    }

    /// Absolute, cleaned clone directory with `~` and environment variables expanded.
    ///
    /// Relative directories are resolved against the current working directory.
    pub fn clone_root(&self) -> Result<PathBuf, ConfigError> {
        let expanded = shellexpand::full(&self.clone_dir).map_err(|e| ConfigError::Malformed {
            path: None,
            message: format!("failed to expand clone_dir {:?}: {}", self.clone_dir, e),
        })?;

        let mut root = PathBuf::from(expanded.as_ref());
        if root.is_relative() {
            let cwd = std::env::current_dir().map_err(|source| ConfigError::Io {
                path: root.clone(),
                source,
            })?;
            root = cwd.join(root);
        }

        Ok(root.clean())
    }

    fn validate(&self) -> Result<(), String> {
        if self.sync.max_parallel == 0 {
            return Err("sync.max_parallel must be at least 1".to_string());
        }

        for owner in &self.owners {
            if owner.name.trim().is_empty() {
                return Err("owner name must not be empty".to_string());
            }
            for glob in &owner.repos.name {
                pattern::validate(glob)?;
            }
        }

        self.repo_conf.defaults.validate_patterns()?;

        for rule in &self.repo_conf.overrides {
            pattern::validate(&rule.name)?;
            pattern::validate(&rule.owner)?;
            rule.settings.validate_patterns()?;
        }

        Ok(())
    }

    /// Expand `${VAR}` references in owner credentials.
    ///
    /// An unset variable leaves the credential unusable rather than failing the load,
    /// so that owners without a token in the environment fall back to anonymous access.
    fn expand_credentials(&mut self) {
        for owner in &mut self.owners {
            if !owner.credential.contains('$') {
                continue;
            }
            match shellexpand::env(&owner.credential) {
                Ok(expanded) => {
                    let expanded = expanded.into_owned();
                    Arc::make_mut(owner).credential = expanded;
                }
                Err(e) => {
                    warn!(
                        "Credential for owner {} references an unset variable ({}), using anonymous access",
                        owner.name, e.var_name
                    );
                    Arc::make_mut(owner).credential.clear();
                }
            }
        }
    }
}
