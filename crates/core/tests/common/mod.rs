#![allow(dead_code)]

use async_trait::async_trait;
use notesync_core::{
    CloneOptions, Filesystem, MemoryFilesystem, PullOptions, RemoveOptions, RepositoryClient,
    Result, SyncConfig, SyncError, SyncMachine, SyncSnapshot, SyncState,
};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

pub const ROOT: &str = "/root";
const ORIGIN_FILE: &str = ".git/origin";

type FailureFactory = Box<dyn Fn() -> SyncError + Send + Sync>;

/// Remote repositories held in memory; clone and pull copy them into the
/// shared [`MemoryFilesystem`].
pub struct ScriptedClient {
    fs: Arc<MemoryFilesystem>,
    remotes: Mutex<HashMap<String, BTreeMap<String, String>>>,
    clone_failures: Mutex<Vec<FailureFactory>>,
    pull_failures: Mutex<Vec<FailureFactory>>,
    pull_removes_root: Mutex<bool>,
    clone_gate: Mutex<Option<Arc<Semaphore>>>,
    pub clone_calls: AtomicUsize,
    pub pull_calls: AtomicUsize,
    pub last_clone: Mutex<Option<(String, CloneOptions)>>,
}

impl ScriptedClient {
    pub fn new(fs: Arc<MemoryFilesystem>) -> Arc<Self> {
        Arc::new(Self {
            fs,
            remotes: Mutex::new(HashMap::new()),
            clone_failures: Mutex::new(Vec::new()),
            pull_failures: Mutex::new(Vec::new()),
            pull_removes_root: Mutex::new(false),
            clone_gate: Mutex::new(None),
            clone_calls: AtomicUsize::new(0),
            pull_calls: AtomicUsize::new(0),
            last_clone: Mutex::new(None),
        })
    }

    pub fn set_remote(&self, url: &str, files: &[(&str, &str)]) {
        let files = files
            .iter()
            .map(|(path, body)| ((*path).to_string(), (*body).to_string()))
            .collect();
        self.remotes.lock().unwrap().insert(url.to_string(), files);
    }

    pub fn fail_next_clone(&self, make: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.clone_failures.lock().unwrap().push(Box::new(make));
    }

    pub fn fail_next_pull(&self, make: impl Fn() -> SyncError + Send + Sync + 'static) {
        self.pull_failures.lock().unwrap().push(Box::new(make));
    }

    /// The next pull succeeds but leaves no working tree behind.
    pub fn pull_removes_root(&self) {
        *self.pull_removes_root.lock().unwrap() = true;
    }

    /// Clones block until a permit is added to the returned semaphore.
    pub fn gate_clones(&self) -> Arc<Semaphore> {
        let gate = Arc::new(Semaphore::new(0));
        *self.clone_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn clones(&self) -> usize {
        self.clone_calls.load(Ordering::SeqCst)
    }

    pub fn pulls(&self) -> usize {
        self.pull_calls.load(Ordering::SeqCst)
    }

    fn checkout(&self, dir: &Path, url: &str) -> Result<()> {
        let remotes = self.remotes.lock().unwrap();
        let files = remotes
            .get(url)
            .ok_or_else(|| SyncError::Protocol(format!("repository not found: {url}")))?;
        for (path, body) in files {
            self.fs.write_file(dir.join(path), body);
        }
        self.fs.write_file(dir.join(ORIGIN_FILE), url);
        self.fs.write_file(dir.join(".git/HEAD"), "ref: refs/heads/main");
        Ok(())
    }

    async fn origin(&self, dir: &Path) -> Result<String> {
        let bytes = self.fs.read(&dir.join(ORIGIN_FILE)).await?;
        String::from_utf8(bytes).map_err(|_| SyncError::Decode(ORIGIN_FILE.to_string()))
    }
}

#[async_trait]
impl RepositoryClient for ScriptedClient {
    async fn clone_repository(
        &self,
        dir: &Path,
        remote_url: &str,
        options: &CloneOptions,
    ) -> Result<()> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_clone.lock().unwrap() = Some((remote_url.to_string(), options.clone()));

        let gate = self.clone_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            let permit = gate
                .acquire()
                .await
                .map_err(|_| SyncError::Other("gate closed".into()))?;
            permit.forget();
        }

        let failure = self.clone_failures.lock().unwrap().pop();
        if let Some(make) = failure {
            return Err(make());
        }
        self.checkout(dir, remote_url)
    }

    async fn pull(&self, dir: &Path, _options: &PullOptions) -> Result<()> {
        self.pull_calls.fetch_add(1, Ordering::SeqCst);
        let failure = self.pull_failures.lock().unwrap().pop();
        if let Some(make) = failure {
            return Err(make());
        }
        let origin = self.origin(dir).await?;
        self.checkout(dir, &origin)?;
        let remove_root = std::mem::take(&mut *self.pull_removes_root.lock().unwrap());
        if remove_root {
            self.fs
                .remove(dir, RemoveOptions { recursive: true })
                .await?;
        }
        Ok(())
    }

    async fn list_files(&self, dir: &Path, _branch: &str) -> Result<Vec<String>> {
        let origin = self.origin(dir).await?;
        let remotes = self.remotes.lock().unwrap();
        Ok(remotes
            .get(&origin)
            .map(|files| files.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_config(&self, dir: &Path, key: &str) -> Result<String> {
        if key != "remote.origin.url" {
            return Err(SyncError::NotFound(key.to_string()));
        }
        self.origin(dir).await
    }
}

pub fn config() -> SyncConfig {
    SyncConfig {
        root_dir: PathBuf::from(ROOT),
        ..SyncConfig::default()
    }
}

pub fn github(repo: &str) -> String {
    format!("https://github.com/{repo}")
}

pub async fn settled(machine: &SyncMachine) -> SyncSnapshot {
    tokio::time::timeout(Duration::from_secs(5), machine.wait_until_settled())
        .await
        .expect("machine did not settle in time")
        .expect("machine stopped")
}

pub async fn wait_for_state(machine: &SyncMachine, state: SyncState) {
    let mut rx = machine.subscribe();
    tokio::time::timeout(Duration::from_secs(5), rx.wait_for(|s| s.state == state))
        .await
        .expect("state not reached in time")
        .expect("machine stopped");
}
