//! Directory selection inside a synchronized working copy.
//!
//! A single top-down walk visits every directory except the `.git` metadata tree. Each
//! directory whose relative path matches a `dirs` pattern contributes its package
//! children (or itself, with implicit namespaces) and its ignore entries.

use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::cancel::CancelFlag;
use crate::error::Cancelled;
use crate::pattern::{fnmatch_any, path_match};
use crate::settings::RepoSettings;

const VCS_DIR: &str = ".git";

/// Directories selected from one working copy, as absolute paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectorySelection {
    pub directories: Vec<PathBuf>,
    pub ignored: Vec<PathBuf>,
}

impl DirectorySelection {
    pub fn is_empty(&self) -> bool {
        self.directories.is_empty() && self.ignored.is_empty()
    }

    /// Append another selection, keeping order and duplicates.
    pub fn extend(&mut self, other: DirectorySelection) {
        self.directories.extend(other.directories);
        self.ignored.extend(other.ignored);
    }
}

/// Walk `root` and collect the directories selected by `settings`.
///
/// The root's own relative path is `.`. Duplicates are kept when a directory matches
/// several `dirs` patterns.
pub fn select_directories(
    settings: &RepoSettings,
    root: &Path,
    cancel: &CancelFlag,
) -> Result<DirectorySelection, Cancelled> {
    let mut selection = DirectorySelection::default();

    if !settings.enabled {
        debug!("Directory selection disabled for {}", root.display());
        return Ok(selection);
    }

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| entry.file_name() != VCS_DIR);

    for entry in walker {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }

        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry under {}: {}", root.display(), e);
                continue;
            }
        };
        if !entry.file_type().is_dir() {
            continue;
        }

        let dir = entry.path();
        let relative = relative_path(root, dir);

        for pattern in &settings.dirs {
            if !path_match(&relative, pattern) {
                continue;
            }

            debug!("{} matches dirs pattern {}", relative, pattern);
            selection
                .ignored
                .extend(settings.ignore.iter().map(|ignore| dir.join(ignore)));

            if settings.implicit_namespaces {
                selection.directories.push(dir.to_path_buf());
            } else {
                selection
                    .directories
                    .extend(package_children(dir, &settings.top_level_packages));
            }
        }
    }

    Ok(selection)
}

/// `/`-joined path of `dir` relative to `root`, `.` for the root itself.
fn relative_path(root: &Path, dir: &Path) -> String {
    let relative = dir.strip_prefix(root).unwrap_or(dir);
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();

    if parts.is_empty() {
        ".".to_string()
    } else {
        parts.join("/")
    }
}

/// Immediate child directories of `dir` whose names match any package pattern, sorted.
fn package_children(dir: &Path, patterns: &[String]) -> Vec<PathBuf> {
    if patterns.is_empty() {
        return Vec::new();
    }

    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Failed to list {}: {}", dir.display(), e);
            return Vec::new();
        }
    };

    let mut children: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        // Follows symlinks, so a linked package directory still counts
        .filter(|entry| entry.path().is_dir())
        .filter(|entry| {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            name != VCS_DIR && fnmatch_any(&name, patterns)
        })
        .map(|entry| entry.path())
        .collect();

    children.sort();
    children
}
