//! repoget - Repository synchronization and documentation path selection
//!
//! repoget keeps a local mirror of selected GitHub repositories in sync and reports, for
//! every mirrored working copy, which directories a documentation build should read and
//! which paths it should skip.
//!
//! ## Core Features
//!
//! - **Owner-scoped discovery**: one GitHub client per configured owner and credential
//! - **Safe reconciliation**: fast-forward when possible, re-clone on branch or remote drift
//! - **Layered settings**: defaults, ordered overrides and a repository-local settings file
//! - **Segment-exact directory selection** over each working copy
//!
//! ## Modules
//!
//! - [`config`]: Configuration loading and validation
//! - [`settings`]: Per-repository settings resolution
//! - [`discovery`] and [`github`]: Remote repository listing
//! - [`git`]: Local clone classification and reconciliation
//! - [`filter`]: Directory selection inside a working copy
//! - [`sync`]: The orchestrator tying everything together

pub mod cancel;
pub mod config;
pub mod discovery;
pub mod error;
pub mod filter;
pub mod git;
pub mod github;
pub mod pattern;
pub mod settings;
pub mod sync;

pub use cancel::CancelFlag;
pub use config::Config;
pub use discovery::{RemoteCatalog, RepositoryDescriptor, RepositoryHost};
pub use filter::{select_directories, DirectorySelection};
pub use git::{GitClient, SyncAction, SyncResult};
pub use github::GitHubClient;
pub use settings::{resolve, RepoSettings};
pub use sync::{SyncEngine, SyncReport};
