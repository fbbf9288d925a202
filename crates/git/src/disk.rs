use async_trait::async_trait;
use notesync_core::{FileStat, Filesystem, RemoveOptions, Result, SyncError};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

/// [`Filesystem`] over a directory on local disk.
///
/// Relative paths resolve against `storage_root`; `wipe` empties it.
#[derive(Debug, Clone)]
pub struct DiskFilesystem {
    storage_root: PathBuf,
}

impl DiskFilesystem {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
        }
    }

    #[must_use]
    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    /// Absolute location of `path` inside the storage.
    #[must_use]
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.storage_root.join(path)
        }
    }
}

fn map_io(path: &Path, err: std::io::Error) -> SyncError {
    if err.kind() == ErrorKind::NotFound {
        SyncError::NotFound(path.display().to_string())
    } else {
        SyncError::Io(err)
    }
}

#[async_trait]
impl Filesystem for DiskFilesystem {
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>> {
        let full = self.resolve(path);
        let mut entries = tokio::fs::read_dir(&full)
            .await
            .map_err(|err| map_io(&full, err))?;
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(|err| map_io(&full, err))? {
            names.push(entry.file_name().to_string_lossy().into_owned());
        }
        names.sort();
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let full = self.resolve(path);
        let meta = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|err| map_io(&full, err))?;
        Ok(FileStat {
            is_dir: meta.is_dir(),
            is_file: meta.is_file(),
            is_symlink: meta.file_type().is_symlink(),
            len: meta.len(),
        })
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<()> {
        let full = self.resolve(path);
        let meta = tokio::fs::symlink_metadata(&full)
            .await
            .map_err(|err| map_io(&full, err))?;
        let result = if meta.is_dir() {
            if options.recursive {
                tokio::fs::remove_dir_all(&full).await
            } else {
                tokio::fs::remove_dir(&full).await
            }
        } else {
            tokio::fs::remove_file(&full).await
        };
        result.map_err(|err| map_io(&full, err))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let full = self.resolve(path);
        tokio::fs::read(&full).await.map_err(|err| map_io(&full, err))
    }

    async fn wipe(&self) -> Result<()> {
        let names = match self.read_dir(&self.storage_root).await {
            Ok(names) => names,
            Err(err) if err.is_not_found() => return Ok(()),
            Err(err) => return Err(err),
        };
        for name in names {
            let child = self.storage_root.join(&name);
            self.remove(&child, RemoveOptions { recursive: true }).await?;
        }
        log::info!("Wiped storage at {}", self.storage_root.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[tokio::test]
    async fn lists_stats_and_reads_relative_paths() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("notes/sub")).unwrap();
        std::fs::write(temp.path().join("notes/a.md"), "alpha").unwrap();

        let fs = DiskFilesystem::new(temp.path());
        assert_eq!(
            fs.read_dir(Path::new("notes")).await.unwrap(),
            vec!["a.md".to_string(), "sub".to_string()]
        );
        let stat = fs.stat(Path::new("notes/a.md")).await.unwrap();
        assert!(stat.is_file);
        assert_eq!(stat.len, 5);
        assert_eq!(fs.read(Path::new("notes/a.md")).await.unwrap(), b"alpha".to_vec());
    }

    #[tokio::test]
    async fn missing_paths_map_to_not_found() {
        let temp = tempdir().unwrap();
        let fs = DiskFilesystem::new(temp.path());
        assert!(matches!(
            fs.stat(Path::new("ghost")).await.unwrap_err(),
            SyncError::NotFound(_)
        ));
        assert!(fs
            .remove(Path::new("ghost"), RemoveOptions { recursive: true })
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn non_recursive_remove_refuses_full_directories() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("tree")).unwrap();
        std::fs::write(temp.path().join("tree/x.md"), "x").unwrap();
        let fs = DiskFilesystem::new(temp.path());

        assert!(fs
            .remove(Path::new("tree"), RemoveOptions::default())
            .await
            .is_err());
        fs.remove(Path::new("tree"), RemoveOptions { recursive: true })
            .await
            .unwrap();
        assert!(!temp.path().join("tree").exists());
    }

    #[tokio::test]
    async fn wipe_empties_storage_root_but_keeps_it() {
        let temp = tempdir().unwrap();
        std::fs::create_dir_all(temp.path().join("a/b")).unwrap();
        std::fs::write(temp.path().join("top.md"), "t").unwrap();
        let fs = DiskFilesystem::new(temp.path());

        fs.wipe().await.unwrap();
        assert!(temp.path().exists());
        assert_eq!(std::fs::read_dir(temp.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn symlinks_are_reported_and_never_projected() {
        use notesync_core::ContentProjector;
        use std::os::unix::fs::symlink;
        use tokio_util::sync::CancellationToken;

        let storage = tempdir().unwrap();
        let outside = tempdir().unwrap();
        std::fs::write(outside.path().join("secret.md"), "private notes").unwrap();
        let notes = storage.path().join("notes");
        std::fs::create_dir_all(&notes).unwrap();
        std::fs::write(notes.join("README.md"), "# Notes").unwrap();
        symlink(outside.path(), notes.join("escape")).unwrap();
        symlink(outside.path().join("secret.md"), notes.join("linked.md")).unwrap();
        symlink(".", notes.join("self-a")).unwrap();
        symlink(".", notes.join("self-b")).unwrap();

        let fs = DiskFilesystem::new(storage.path());
        let stat = fs.stat(Path::new("notes/escape")).await.unwrap();
        assert!(stat.is_symlink);
        assert!(!stat.is_dir);

        let docs = ContentProjector::new(["md"])
            .project(&fs, Path::new("notes"), &CancellationToken::new())
            .await
            .unwrap();
        let ids: Vec<&str> = docs.keys().map(|id| id.as_str()).collect();
        assert_eq!(ids, vec!["README"]);
        assert!(docs.values().all(|body| body != "private notes"));
    }
}
