use crate::capability::{FileStat, Filesystem, RemoveOptions};
use crate::{Result, SyncError};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::path::{Component, Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone)]
enum Node {
    Dir,
    File(Vec<u8>),
}

#[derive(Debug, Default)]
struct Tree {
    nodes: BTreeMap<PathBuf, Node>,
    unreadable: HashSet<PathBuf>,
}

/// In-process storage backend. Paths are normalised to absolute form, so
/// `notes/a.md` and `/notes/a.md` name the same file.
#[derive(Debug)]
pub struct MemoryFilesystem {
    tree: Mutex<Tree>,
    scoped_remove: bool,
}

impl Default for MemoryFilesystem {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryFilesystem {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: Mutex::new(Tree::default()),
            scoped_remove: true,
        }
    }

    /// Emulate a backend that can only be erased as a whole.
    #[must_use]
    pub fn without_scoped_remove(mut self) -> Self {
        self.scoped_remove = false;
        self
    }

    pub fn write_file(&self, path: impl AsRef<Path>, content: &str) {
        self.write_bytes(path, content.as_bytes().to_vec());
    }

    pub fn write_bytes(&self, path: impl AsRef<Path>, bytes: Vec<u8>) {
        let path = normalize(path.as_ref());
        let mut tree = self.lock();
        if let Some(parent) = path.parent() {
            insert_dirs(&mut tree, parent);
        }
        tree.nodes.insert(path, Node::File(bytes));
    }

    pub fn create_dir_all(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        insert_dirs(&mut self.lock(), &path);
    }

    /// Reads of this path fail with an I/O error while stat still succeeds.
    pub fn mark_unreadable(&self, path: impl AsRef<Path>) {
        let path = normalize(path.as_ref());
        self.lock().unreadable.insert(path);
    }

    #[must_use]
    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.lock().nodes.contains_key(&normalize(path.as_ref()))
    }

    #[must_use]
    pub fn file_count(&self) -> usize {
        self.lock()
            .nodes
            .values()
            .filter(|node| matches!(node, Node::File(_)))
            .count()
    }

    fn lock(&self) -> MutexGuard<'_, Tree> {
        // A poisoned tree is still structurally valid; every mutation is a single insert/remove.
        self.tree.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Filesystem for MemoryFilesystem {
    async fn read_dir(&self, path: &Path) -> Result<Vec<String>> {
        let path = normalize(path);
        let tree = self.lock();
        match tree.nodes.get(&path) {
            Some(Node::Dir) => {}
            Some(Node::File(_)) => {
                return Err(SyncError::Other(format!("{} is not a directory", path.display())))
            }
            None if path == Path::new("/") => {}
            None => return Err(SyncError::NotFound(path.display().to_string())),
        }
        let names = tree
            .nodes
            .keys()
            .filter(|candidate| candidate.parent() == Some(path.as_path()))
            .filter_map(|candidate| candidate.file_name())
            .map(|name| name.to_string_lossy().into_owned())
            .collect();
        Ok(names)
    }

    async fn stat(&self, path: &Path) -> Result<FileStat> {
        let path = normalize(path);
        match self.lock().nodes.get(&path) {
            Some(Node::Dir) => Ok(FileStat {
                is_dir: true,
                is_file: false,
                is_symlink: false,
                len: 0,
            }),
            Some(Node::File(bytes)) => Ok(FileStat {
                is_dir: false,
                is_file: true,
                is_symlink: false,
                len: bytes.len() as u64,
            }),
            None => Err(SyncError::NotFound(path.display().to_string())),
        }
    }

    async fn remove(&self, path: &Path, options: RemoveOptions) -> Result<()> {
        let path = normalize(path);
        let mut tree = self.lock();
        let Some(node) = tree.nodes.get(&path) else {
            return Err(SyncError::NotFound(path.display().to_string()));
        };
        if matches!(node, Node::Dir) {
            let has_children = tree
                .nodes
                .keys()
                .any(|candidate| candidate != &path && candidate.starts_with(&path));
            if has_children && !options.recursive {
                return Err(SyncError::Other(format!(
                    "{} is not empty",
                    path.display()
                )));
            }
        }
        tree.nodes.retain(|candidate, _| !candidate.starts_with(&path));
        tree.unreadable.retain(|candidate| !candidate.starts_with(&path));
        Ok(())
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = normalize(path);
        let tree = self.lock();
        if tree.unreadable.contains(&path) {
            return Err(SyncError::Io(std::io::Error::new(
                std::io::ErrorKind::PermissionDenied,
                format!("{} is unreadable", path.display()),
            )));
        }
        match tree.nodes.get(&path) {
            Some(Node::File(bytes)) => Ok(bytes.clone()),
            Some(Node::Dir) => Err(SyncError::Other(format!("{} is a directory", path.display()))),
            None => Err(SyncError::NotFound(path.display().to_string())),
        }
    }

    async fn wipe(&self) -> Result<()> {
        let mut tree = self.lock();
        tree.nodes.clear();
        tree.unreadable.clear();
        Ok(())
    }

    fn supports_scoped_remove(&self) -> bool {
        self.scoped_remove
    }
}

fn insert_dirs(tree: &mut Tree, dir: &Path) {
    for ancestor in dir.ancestors() {
        if ancestor == Path::new("/") || ancestor.as_os_str().is_empty() {
            break;
        }
        tree.nodes
            .entry(ancestor.to_path_buf())
            .or_insert(Node::Dir);
    }
}

fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::from("/");
    for component in path.components() {
        match component {
            Component::Normal(name) => out.push(name),
            Component::ParentDir => {
                out.pop();
            }
            Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn read_dir_lists_direct_children_only() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/root/a.md", "a");
        fs.write_file("/root/sub/b.md", "b");

        let mut names = fs.read_dir(Path::new("/root")).await.unwrap();
        names.sort();
        assert_eq!(names, vec!["a.md".to_string(), "sub".to_string()]);
        assert!(fs.stat(Path::new("/root/sub")).await.unwrap().is_dir);
    }

    #[tokio::test]
    async fn relative_and_absolute_paths_agree() {
        let fs = MemoryFilesystem::new();
        fs.write_file("notes/a.md", "a");
        assert_eq!(fs.read(Path::new("/notes/a.md")).await.unwrap(), b"a".to_vec());
    }

    #[tokio::test]
    async fn remove_requires_recursive_for_non_empty_dirs() {
        let fs = MemoryFilesystem::new();
        fs.write_file("/root/a.md", "a");
        fs.write_file("/other/keep.md", "k");

        assert!(fs
            .remove(Path::new("/root"), RemoveOptions::default())
            .await
            .is_err());
        fs.remove(Path::new("/root"), RemoveOptions { recursive: true })
            .await
            .unwrap();

        assert!(!fs.exists("/root"));
        assert!(fs.exists("/other/keep.md"));
    }

    #[tokio::test]
    async fn missing_paths_are_not_found() {
        let fs = MemoryFilesystem::new();
        assert!(fs.stat(Path::new("/nope")).await.unwrap_err().is_not_found());
        assert!(fs
            .remove(Path::new("/nope"), RemoveOptions { recursive: true })
            .await
            .unwrap_err()
            .is_not_found());
    }

    #[tokio::test]
    async fn wipe_erases_everything() {
        let fs = MemoryFilesystem::new().without_scoped_remove();
        fs.write_file("/root/a.md", "a");
        fs.write_file("/other/b.md", "b");
        assert!(!fs.supports_scoped_remove());

        fs.wipe().await.unwrap();
        assert_eq!(fs.file_count(), 0);
    }
}
