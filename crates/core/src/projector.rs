use crate::capability::Filesystem;
use crate::document::{DocumentId, DocumentMap};
use crate::{Result, SyncError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

/// Directory names never descended into.
const EXCLUDED_SCOPES: &[&str] = &[".git"];

/// Walks a working tree and decodes tracked documents.
#[derive(Debug, Clone)]
pub struct ContentProjector {
    extensions: Vec<String>,
}

impl ContentProjector {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim().trim_start_matches('.').to_lowercase())
            .filter(|ext| !ext.is_empty())
            .collect();
        Self { extensions }
    }

    /// Build the id → content map for everything under `root`.
    ///
    /// Only an unreadable root is fatal; individual entries that cannot be
    /// stat'ed, read, or decoded are skipped.
    pub async fn project(
        &self,
        fs: &dyn Filesystem,
        root: &Path,
        cancel: &CancellationToken,
    ) -> Result<DocumentMap> {
        let mut documents = DocumentMap::new();
        let mut sources: BTreeMap<DocumentId, PathBuf> = BTreeMap::new();
        let mut pending: Vec<PathBuf> = Vec::new();

        for name in fs.read_dir(root).await? {
            pending.push(PathBuf::from(name));
        }

        while let Some(relative) = pending.pop() {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            if Self::is_excluded(&relative) {
                continue;
            }

            let full = root.join(&relative);
            let stat = match fs.stat(&full).await {
                Ok(stat) => stat,
                Err(err) => {
                    log::warn!("Skipping {}: {err}", full.display());
                    continue;
                }
            };

            if stat.is_symlink {
                log::debug!("Skipping symlink {}", full.display());
                continue;
            }
            if stat.is_dir {
                match fs.read_dir(&full).await {
                    Ok(names) => pending.extend(names.into_iter().map(|name| relative.join(name))),
                    Err(err) => log::warn!("Skipping directory {}: {err}", full.display()),
                }
                continue;
            }
            if !stat.is_file {
                continue;
            }

            let Some(id) = self.document_id(&relative) else {
                continue;
            };
            // Two files can strip to one id (`a.md` and `a.MD`); the smaller path wins.
            if let Some(kept) = sources.get(&id) {
                let keep_existing = *kept < relative;
                log::warn!(
                    "Document {id} is provided by both {} and {}; keeping {}",
                    kept.display(),
                    relative.display(),
                    if keep_existing { kept.display() } else { relative.display() }
                );
                if keep_existing {
                    continue;
                }
            }

            let bytes = match fs.read(&full).await {
                Ok(bytes) => bytes,
                Err(err) => {
                    log::warn!("Skipping unreadable document {}: {err}", full.display());
                    continue;
                }
            };
            match String::from_utf8(bytes) {
                Ok(text) => {
                    sources.insert(id.clone(), relative);
                    documents.insert(id, text);
                }
                Err(_) => {
                    log::warn!(
                        "Skipping document {}: {}",
                        full.display(),
                        SyncError::Decode(relative.display().to_string())
                    );
                }
            }
        }

        log::info!("Projected {} documents from {}", documents.len(), root.display());
        Ok(documents)
    }

    fn is_tracked(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| self.extensions.iter().any(|candidate| candidate == &ext))
    }

    fn document_id(&self, relative: &Path) -> Option<DocumentId> {
        if !self.is_tracked(relative) {
            return None;
        }
        let stem = relative.with_extension("");
        let parts: Vec<String> = stem
            .components()
            .filter_map(|component| match component {
                std::path::Component::Normal(name) => Some(name.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if parts.is_empty() {
            return None;
        }
        Some(DocumentId::new(parts.join("/")))
    }

    fn is_excluded(relative: &Path) -> bool {
        relative.components().any(|component| match component {
            std::path::Component::Normal(name) => {
                let name = name.to_string_lossy();
                EXCLUDED_SCOPES.iter().any(|scope| *scope == name)
            }
            _ => false,
        })
    }
}
