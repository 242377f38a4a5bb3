//! Per-repository settings and their resolution.
//!
//! Effective settings are built in three layers: the configured defaults, every matching
//! override rule, and finally an optional `docs_info.yml` found inside the repository's
//! working copy. Between overrides the last-declared matching rule wins, key by key.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;

use crate::config::OverrideRule;
use crate::error::SettingsError;
use crate::pattern::{self, fnmatch};

/// File name looked up inside working copies for repository-local settings
pub const LOCAL_SETTINGS_FILE: &str = "docs_info.yml";

/// Highest settings schema version this build understands
pub const SETTINGS_VERSION: u32 = 1;

/// Fully resolved settings for one repository
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct RepoSettings {
    /// Whether the repository contributes any directories at all
    pub enabled: bool,

    /// Relative directory patterns, matched segment by segment
    pub dirs: Vec<String>,

    /// Entries joined under each matched directory and reported as ignored
    pub ignore: Vec<String>,

    /// Child directory name patterns selected under each matched directory
    pub top_level_packages: Vec<String>,

    /// Select matched directories themselves instead of their package children
    pub implicit_namespaces: bool,
}

/// A settings fragment: only the keys that are present get merged
#[derive(Debug, Deserialize, Serialize, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PartialRepoSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dirs: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ignore: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_level_packages: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub implicit_namespaces: Option<bool>,
}

impl RepoSettings {
    /// Merge the keys present in `partial`, leaving the others untouched.
    pub fn merge(&mut self, partial: &PartialRepoSettings) {
        if let Some(enabled) = partial.enabled {
            self.enabled = enabled;
        }
        if let Some(dirs) = &partial.dirs {
            self.dirs = dirs.clone();
        }
        if let Some(ignore) = &partial.ignore {
            self.ignore = ignore.clone();
        }
        if let Some(packages) = &partial.top_level_packages {
            self.top_level_packages = packages.clone();
        }
        if let Some(implicit) = partial.implicit_namespaces {
            self.implicit_namespaces = implicit;
        }
    }

    pub(crate) fn validate_patterns(&self) -> Result<(), String> {
        validate_all(&self.dirs)?;
        validate_all(&self.ignore)?;
        validate_all(&self.top_level_packages)
    }
}

impl PartialRepoSettings {
    /// Take every key from `other` that is not already set here.
    pub fn fill_from(&mut self, other: &PartialRepoSettings) {
        if self.enabled.is_none() {
            self.enabled = other.enabled;
        }
        if self.dirs.is_none() {
            self.dirs = other.dirs.clone();
        }
        if self.ignore.is_none() {
            self.ignore = other.ignore.clone();
        }
        if self.top_level_packages.is_none() {
            self.top_level_packages = other.top_level_packages.clone();
        }
        if self.implicit_namespaces.is_none() {
            self.implicit_namespaces = other.implicit_namespaces;
        }
    }

    pub(crate) fn validate_patterns(&self) -> Result<(), String> {
        if let Some(version) = self.version {
            if version == 0 || version > SETTINGS_VERSION {
                return Err(format!(
                    "unsupported settings version {} (expected {})",
                    version, SETTINGS_VERSION
                ));
            }
        }
        for list in [&self.dirs, &self.ignore, &self.top_level_packages]
            .into_iter()
            .flatten()
        {
            validate_all(list)?;
        }
        Ok(())
    }
}

fn validate_all(patterns: &[String]) -> Result<(), String> {
    patterns.iter().try_for_each(|p| pattern::validate(p))
}

/// Resolve the configured settings for `owner/name`.
///
/// Rules are walked in reverse declared order and each key is claimed by the first
/// matching rule that sets it, so the last-declared match wins per key. Keys no rule
/// sets keep their default. No filesystem or network access happens here.
pub fn resolve(
    owner_login: &str,
    repo_name: &str,
    defaults: &RepoSettings,
    overrides: &[OverrideRule],
) -> RepoSettings {
    let mut claimed = PartialRepoSettings::default();

    for rule in overrides.iter().rev() {
        if fnmatch(repo_name, &rule.name) && fnmatch(owner_login, &rule.owner) {
            debug!(
                "Override (name={}, owner={}) applies to {}/{}",
                rule.name, rule.owner, owner_login, repo_name
            );
            claimed.fill_from(&rule.settings);
        }
    }

    let mut settings = defaults.clone();
    settings.merge(&claimed);
    settings
}

/// Find the first local settings file in a top-down walk of the working copy.
///
/// Each directory's own files are looked at before any of its subdirectories, so a file
/// at the root always wins over one nested deeper.
pub fn find_local_settings(working_copy: &Path) -> Option<PathBuf> {
    WalkDir::new(working_copy)
        .follow_links(false)
        .sort_by(|a, b| {
            a.file_type()
                .is_dir()
                .cmp(&b.file_type().is_dir())
                .then_with(|| a.file_name().cmp(b.file_name()))
        })
        .into_iter()
        .filter_entry(|entry| entry.file_name() != ".git")
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == LOCAL_SETTINGS_FILE)
        .map(|entry| entry.into_path())
}

/// Parse a local settings file.
pub fn load_local_settings(path: &Path) -> Result<PartialRepoSettings, SettingsError> {
    let malformed = |message: String| SettingsError::LocalSettingsMalformed {
        path: path.to_path_buf(),
        message,
    };

    let content = std::fs::read_to_string(path).map_err(|e| malformed(e.to_string()))?;

    // An empty document means "no overrides"
    if content.trim().is_empty() {
        return Ok(PartialRepoSettings::default());
    }

    let partial: PartialRepoSettings =
        serde_yaml::from_str(&content).map_err(|e| malformed(e.to_string()))?;
    partial.validate_patterns().map_err(malformed)?;

    Ok(partial)
}

/// Merge a repository-local settings file on top of `settings`, if one exists.
///
/// Returns whether a file was merged. On error `settings` is left untouched.
pub fn apply_local_settings(
    settings: &mut RepoSettings,
    working_copy: &Path,
) -> Result<bool, SettingsError> {
    let Some(path) = find_local_settings(working_copy) else {
        return Ok(false);
    };

    let partial = load_local_settings(&path)?;
    debug!("Merging local settings from {}", path.display());
    settings.merge(&partial);
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use quickcheck_macros::quickcheck;
    use tempfile::TempDir;

    fn defaults() -> RepoSettings {
        RepoSettings {
            enabled: true,
            dirs: vec!["src".to_string()],
            ignore: vec![],
            top_level_packages: vec!["*".to_string()],
            implicit_namespaces: false,
        }
    }

    fn rule(name: &str, owner: &str, settings: PartialRepoSettings) -> OverrideRule {
        OverrideRule {
            name: name.to_string(),
            owner: owner.to_string(),
            settings,
        }
    }

    fn dirs(values: &[&str]) -> PartialRepoSettings {
        PartialRepoSettings {
            dirs: Some(values.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_matching_override_yields_defaults() {
        let overrides = vec![rule("other", "*", dirs(&["a"]))];
        assert_eq!(resolve("acme", "foo", &defaults(), &overrides), defaults());
    }

    #[test]
    fn test_last_declared_matching_rule_wins() {
        let overrides = vec![rule("*", "*", dirs(&["a"])), rule("foo", "*", dirs(&["b"]))];
        let settings = resolve("acme", "foo", &defaults(), &overrides);
        assert_eq!(settings.dirs, vec!["b"]);

        let settings = resolve("acme", "bar", &defaults(), &overrides);
        assert_eq!(settings.dirs, vec!["a"]);
    }

    #[test]
    fn test_merge_is_per_key() {
        let overrides = vec![
            rule(
                "*",
                "acme",
                PartialRepoSettings {
                    enabled: Some(false),
                    dirs: Some(vec!["lib".to_string()]),
                    ..Default::default()
                },
            ),
            rule("foo", "*", dirs(&["python"])),
        ];
        let settings = resolve("acme", "foo", &defaults(), &overrides);
        // dirs comes from the later rule, enabled from the earlier one
        assert!(!settings.enabled);
        assert_eq!(settings.dirs, vec!["python"]);
        assert_eq!(settings.top_level_packages, vec!["*"]);
    }

    #[test]
    fn test_owner_glob_must_match_too() {
        let overrides = vec![rule("foo", "acme", dirs(&["b"]))];
        assert_eq!(resolve("other", "foo", &defaults(), &overrides).dirs, vec!["src"]);
        assert_eq!(resolve("acme", "foo", &defaults(), &overrides).dirs, vec!["b"]);
    }

    #[quickcheck]
    fn prop_non_matching_overrides_are_identity(names: Vec<String>) -> bool {
        // Override names all carry a prefix the repository name cannot have.
        let overrides: Vec<OverrideRule> = names
            .iter()
            .map(|n| rule(&format!("x{}", n.replace(['*', '?', '['], "")), "*", dirs(&["z"])))
            .collect();
        resolve("acme", "repo", &defaults(), &overrides) == defaults()
    }

    #[test]
    fn test_local_settings_merged_last() {
        let temp_dir = TempDir::new().unwrap();
        let nested = temp_dir.path().join("docs");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(
            nested.join(LOCAL_SETTINGS_FILE),
            "version: 1\ndirs: [\"python\"]\nignore: [\"tests\"]\n",
        )
        .unwrap();

        let mut settings = defaults();
        assert!(apply_local_settings(&mut settings, temp_dir.path()).unwrap());
        assert_eq!(settings.dirs, vec!["python"]);
        assert_eq!(settings.ignore, vec!["tests"]);
        assert!(settings.enabled);
        assert_eq!(settings.top_level_packages, vec!["*"]);
    }

    #[test]
    fn test_root_local_settings_win_over_nested_ones() {
        let temp_dir = TempDir::new().unwrap();
        let vendored = temp_dir.path().join("a_vendor");
        std::fs::create_dir_all(&vendored).unwrap();
        std::fs::write(vendored.join(LOCAL_SETTINGS_FILE), "dirs: [\"vendor\"]\n").unwrap();
        std::fs::write(
            temp_dir.path().join(LOCAL_SETTINGS_FILE),
            "dirs: [\"python\"]\n",
        )
        .unwrap();

        assert_eq!(
            find_local_settings(temp_dir.path()),
            Some(temp_dir.path().join(LOCAL_SETTINGS_FILE))
        );

        let mut settings = defaults();
        apply_local_settings(&mut settings, temp_dir.path()).unwrap();
        assert_eq!(settings.dirs, vec!["python"]);
    }

    #[test]
    fn test_local_settings_absent() {
        let temp_dir = TempDir::new().unwrap();
        let mut settings = defaults();
        assert!(!apply_local_settings(&mut settings, temp_dir.path()).unwrap());
        assert_eq!(settings, defaults());
    }

    #[test]
    fn test_local_settings_inside_git_dir_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let git_dir = temp_dir.path().join(".git");
        std::fs::create_dir_all(&git_dir).unwrap();
        std::fs::write(git_dir.join(LOCAL_SETTINGS_FILE), "enabled: false\n").unwrap();

        assert!(find_local_settings(temp_dir.path()).is_none());
    }

    #[test]
    fn test_malformed_local_settings_leaves_settings_untouched() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(
            temp_dir.path().join(LOCAL_SETTINGS_FILE),
            "enabled: true\npackages: [\"x\"]\n",
        )
        .unwrap();

        let mut settings = defaults();
        let result = apply_local_settings(&mut settings, temp_dir.path());
        assert_matches!(result, Err(SettingsError::LocalSettingsMalformed { .. }));
        assert_eq!(settings, defaults());
    }

    #[test]
    fn test_unsupported_version_rejected() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(LOCAL_SETTINGS_FILE);
        std::fs::write(&path, "version: 2\nenabled: true\n").unwrap();
        assert_matches!(
            load_local_settings(&path),
            Err(SettingsError::LocalSettingsMalformed { .. })
        );
    }
}
