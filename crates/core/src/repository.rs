use crate::{Result, SyncError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Canonical remote identifier of the form `owner/name`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RepositoryId(String);

impl RepositoryId {
    pub fn parse(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        let Some((owner, name)) = trimmed.split_once('/') else {
            return Err(SyncError::InvalidRepository(format!(
                "{raw:?} is not of the form owner/name"
            )));
        };
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(SyncError::InvalidRepository(format!(
                "{raw:?} is not of the form owner/name"
            )));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(SyncError::InvalidRepository(format!(
                "{raw:?} contains whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn owner(&self) -> &str {
        self.0.split_once('/').map_or("", |(owner, _)| owner)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        self.0.split_once('/').map_or("", |(_, name)| name)
    }

    /// Remote URL under the given base (`https://github.com/` + `owner/name`).
    #[must_use]
    pub fn remote_url(&self, base: &str) -> String {
        if base.ends_with('/') {
            format!("{base}{}", self.0)
        } else {
            format!("{base}/{}", self.0)
        }
    }

    /// Recover the identifier from a configured `remote.origin.url`.
    pub fn from_remote_url(url: &str, base: &str) -> Result<Self> {
        let url = url.trim();
        let base = base.trim_end_matches('/');
        let Some(rest) = url
            .strip_prefix(base)
            .and_then(|rest| rest.strip_prefix('/'))
        else {
            return Err(SyncError::InvalidRepository(format!(
                "remote {url:?} is not under {base}/"
            )));
        };
        let tail = rest.trim_end_matches('/');
        let tail = tail.strip_suffix(".git").unwrap_or(tail);
        Self::parse(tail)
    }
}

impl fmt::Display for RepositoryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RepositoryId {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RepositoryId {
    type Error = SyncError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RepositoryId> for String {
    fn from(value: RepositoryId) -> Self {
        value.0
    }
}
