use crate::capability::AuthorIdentity;
use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const DEFAULT_ROOT_DIR: &str = "notes";
pub const DEFAULT_REMOTE_BASE_URL: &str = "https://github.com/";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_DEPTH: u32 = 1;
pub const REMOTE_ORIGIN_URL_KEY: &str = "remote.origin.url";

/// Settings for one synchronized repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Working tree root inside the storage.
    pub root_dir: PathBuf,
    pub remote_base_url: String,
    /// The single tracked branch.
    pub branch: String,
    /// Clone depth; 0 fetches full history.
    pub depth: u32,
    pub single_branch: bool,
    pub document_extensions: Vec<String>,
    pub author: AuthorIdentity,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from(DEFAULT_ROOT_DIR),
            remote_base_url: DEFAULT_REMOTE_BASE_URL.to_string(),
            branch: DEFAULT_BRANCH.to_string(),
            depth: DEFAULT_DEPTH,
            single_branch: true,
            document_extensions: vec!["md".to_string()],
            author: AuthorIdentity::default(),
        }
    }
}

impl SyncConfig {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(raw).map_err(|err| SyncError::Config(format!("invalid TOML: {err}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|err| {
            SyncError::Config(format!("read config {}: {err}", path.display()))
        })?;
        Self::from_toml_str(&raw)
    }

    /// Defaults, then the optional file, then `NOTESYNC_*` variables.
    pub fn resolve(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::load(path)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        if let Some(root) = get("NOTESYNC_ROOT") {
            self.root_dir = PathBuf::from(root);
        }
        if let Some(base) = get("NOTESYNC_REMOTE_BASE") {
            self.remote_base_url = base;
        }
        if let Some(branch) = get("NOTESYNC_BRANCH") {
            self.branch = branch;
        }
        if let Some(raw) = get("NOTESYNC_DEPTH") {
            self.depth = parse_depth(&raw, self.depth);
        }
        if let Some(raw) = get("NOTESYNC_EXTENSIONS") {
            let exts = parse_extensions(&raw);
            if !exts.is_empty() {
                self.document_extensions = exts;
            }
        }
        if let Some(name) = get("NOTESYNC_AUTHOR_NAME") {
            self.author.name = name;
        }
        if let Some(email) = get("NOTESYNC_AUTHOR_EMAIL") {
            self.author.email = email;
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.branch.trim().is_empty() {
            return Err(SyncError::Config("branch must not be empty".into()));
        }
        if self.remote_base_url.trim().is_empty() {
            return Err(SyncError::Config("remote_base_url must not be empty".into()));
        }
        if self.document_extensions.is_empty() {
            return Err(SyncError::Config(
                "document_extensions must list at least one extension".into(),
            ));
        }
        Ok(())
    }

    /// Depth as passed to the clone capability.
    #[must_use]
    pub fn clone_depth(&self) -> Option<u32> {
        (self.depth > 0).then_some(self.depth)
    }
}

fn parse_depth(raw: &str, current: u32) -> u32 {
    match raw.parse::<u32>() {
        Ok(depth) => depth,
        Err(err) => {
            log::warn!("Ignoring NOTESYNC_DEPTH={raw:?}: {err}");
            current
        }
    }
}

fn parse_extensions(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|ext| ext.trim().trim_start_matches('.').to_lowercase())
        .filter(|ext| !ext.is_empty())
        .collect()
}
