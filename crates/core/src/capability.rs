//! Capabilities consumed by the sync core.
//!
//! Storage and the version-control client are injected as trait objects so the
//! state machine can run against disk, memory, or scripted fakes alike.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Metadata of the entry itself; symbolic links are not followed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FileStat {
    pub is_dir: bool,
    pub is_file: bool,
    pub is_symlink: bool,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoveOptions {
    pub recursive: bool,
}

/// Hierarchical byte storage with directory semantics.
///
/// Every method fails with [`crate::SyncError::NotFound`] when the path is absent.
#[async_trait]
pub trait Filesystem: Send + Sync {
    /// Entry names (not paths) directly under `path`.
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>>;

    async fn stat(&self, path: &Path) -> Result<FileStat>;

    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<()>;

    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Erase the whole storage, not just one subtree.
    async fn wipe(&self) -> Result<()>;

    /// Whether `remove` can delete a single subtree. Backends that can only be
    /// erased wholesale return `false` and get wiped before a clone.
    fn supports_scoped_remove(&self) -> bool {
        true
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Pluggable credential source consulted before network operations.
pub trait CredentialHook: Send + Sync {
    fn credentials_for(&self, remote_url: &str) -> Option<Credentials>;
}

/// Hands out the same credentials for every remote.
#[derive(Debug, Clone)]
pub struct StaticCredentials(pub Credentials);

impl CredentialHook for StaticCredentials {
    fn credentials_for(&self, _remote_url: &str) -> Option<Credentials> {
        Some(self.0.clone())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorIdentity {
    pub name: String,
    pub email: String,
}

impl Default for AuthorIdentity {
    fn default() -> Self {
        Self {
            name: "notesync".to_string(),
            email: "notesync@localhost".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CloneOptions {
    pub branch: String,
    pub single_branch: bool,
    /// `None` fetches full history.
    pub depth: Option<u32>,
    pub credentials: Option<Credentials>,
}

#[derive(Debug, Clone)]
pub struct PullOptions {
    pub branch: String,
    pub author: AuthorIdentity,
    pub credentials: Option<Credentials>,
}

/// Version-control operations against a working tree rooted at `dir`.
///
/// Network failures surface as `Network`, rejected credentials as `Auth`,
/// unmergeable remote changes as `Conflict`, anything else as `Protocol`.
#[async_trait]
pub trait RepositoryClient: Send + Sync {
    async fn clone_repository(
        &self,
        dir: &Path,
        remote_url: &str,
        options: &CloneOptions,
    ) -> Result<()>;

    async fn pull(&self, dir: &Path, options: &PullOptions) -> Result<()>;

    async fn list_files(&self, dir: &Path, branch: &str) -> Result<Vec<String>>;

    /// Fails with `NotFound` when the key is unset or no repository exists at `dir`.
    async fn get_config(&self, dir: &Path, key: &str) -> Result<String>;
}
