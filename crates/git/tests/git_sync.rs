use notesync_core::{
    DocumentId, RepositoryId, SyncConfig, SyncEvent, SyncMachine, SyncSnapshot, SyncState,
};
use notesync_git::{DiskFilesystem, GitCli};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|out| out.status.success())
        .unwrap_or(false)
}

fn warn_skip() {
    eprintln!("skipping git sync test: git executable not available");
}

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .arg("-C")
        .arg(dir)
        .args([
            "-c",
            "user.name=Fixture",
            "-c",
            "user.email=fixture@example.com",
            "-c",
            "commit.gpgsign=false",
        ])
        .args(args)
        .status()
        .expect("run git");
    assert!(status.success(), "git {args:?} failed");
}

/// A non-bare source repository at `<base>/acme/docs` on branch `main`.
fn remote_fixture(base: &Path) -> PathBuf {
    let repo = base.join("acme").join("docs");
    std::fs::create_dir_all(repo.join("guides")).expect("create fixture");
    git(&repo, &["init", "-q"]);
    git(&repo, &["symbolic-ref", "HEAD", "refs/heads/main"]);
    std::fs::write(repo.join("README.md"), "# Acme\n").expect("write readme");
    std::fs::write(repo.join("guides/setup.md"), "setup\n").expect("write guide");
    std::fs::write(repo.join("logo.svg"), "<svg/>").expect("write logo");
    git(&repo, &["add", "."]);
    git(&repo, &["commit", "-q", "-m", "initial"]);
    repo
}

fn sync_config(storage: &Path, remotes: &Path) -> SyncConfig {
    SyncConfig {
        root_dir: storage.join("notes"),
        remote_base_url: format!("file://{}/", remotes.display()),
        ..SyncConfig::default()
    }
}

fn start(storage: &Path, config: SyncConfig) -> SyncMachine {
    SyncMachine::start(
        Arc::new(DiskFilesystem::new(storage)),
        Arc::new(GitCli::new(storage)),
        config,
    )
}

async fn settled(machine: &SyncMachine) -> SyncSnapshot {
    tokio::time::timeout(Duration::from_secs(60), machine.wait_until_settled())
        .await
        .expect("machine did not settle in time")
        .expect("machine stopped")
}

fn ids(snapshot: &SyncSnapshot) -> Vec<&str> {
    snapshot
        .context
        .documents
        .keys()
        .map(DocumentId::as_str)
        .collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn clone_sync_and_redetect_against_local_remote() {
    if !git_available() {
        warn_skip();
        return;
    }

    let remotes = TempDir::new().expect("remotes dir");
    let storage = TempDir::new().expect("storage dir");
    let source = remote_fixture(remotes.path());
    let config = sync_config(storage.path(), remotes.path());

    let machine = start(storage.path(), config.clone());
    assert_eq!(settled(&machine).await.state, SyncState::Empty);

    machine
        .dispatch(SyncEvent::SelectRepository(
            RepositoryId::parse("acme/docs").expect("id"),
        ))
        .await
        .expect("dispatch");
    let cloned = settled(&machine).await;
    assert_eq!(cloned.state, SyncState::Idle, "{:?}", cloned.context.last_error);
    assert_eq!(ids(&cloned), vec!["README", "guides/setup"]);

    std::fs::write(source.join("guides/deploy.md"), "deploy\n").expect("write deploy");
    git(&source, &["add", "."]);
    git(&source, &["commit", "-q", "-m", "add deploy"]);

    machine.dispatch(SyncEvent::Sync).await.expect("dispatch sync");
    let pulled = settled(&machine).await;
    assert_eq!(pulled.state, SyncState::Idle, "{:?}", pulled.context.last_error);
    assert_eq!(ids(&pulled), vec!["README", "guides/deploy", "guides/setup"]);
    drop(machine);

    let restarted = start(storage.path(), config);
    let detected = settled(&restarted).await;
    assert_eq!(detected.state, SyncState::Idle);
    assert_eq!(
        detected.context.repository.as_ref().map(RepositoryId::as_str),
        Some("acme/docs")
    );
    assert_eq!(detected.context.documents, pulled.context.documents);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_remote_lands_in_error_with_empty_context() {
    if !git_available() {
        warn_skip();
        return;
    }

    let remotes = TempDir::new().expect("remotes dir");
    let storage = TempDir::new().expect("storage dir");
    let machine = start(storage.path(), sync_config(storage.path(), remotes.path()));
    settled(&machine).await;

    machine
        .dispatch(SyncEvent::SelectRepository(
            RepositoryId::parse("acme/ghost").expect("id"),
        ))
        .await
        .expect("dispatch");
    let failed = settled(&machine).await;

    assert_eq!(failed.state, SyncState::Error);
    assert!(failed.context.repository.is_none());
    assert!(failed.context.documents.is_empty());
    assert!(failed.context.last_error.is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relative_root_dir_lives_under_storage_root() {
    if !git_available() {
        warn_skip();
        return;
    }

    let remotes = TempDir::new().expect("remotes dir");
    let storage = TempDir::new().expect("storage dir");
    remote_fixture(remotes.path());
    let config = SyncConfig {
        root_dir: PathBuf::from("notes"),
        ..sync_config(storage.path(), remotes.path())
    };

    let machine = start(storage.path(), config);
    settled(&machine).await;
    machine
        .dispatch(SyncEvent::SelectRepository(
            RepositoryId::parse("acme/docs").expect("id"),
        ))
        .await
        .expect("dispatch");
    let cloned = settled(&machine).await;

    assert_eq!(cloned.state, SyncState::Idle, "{:?}", cloned.context.last_error);
    assert_eq!(ids(&cloned), vec!["README", "guides/setup"]);
    assert!(storage.path().join("notes/.git").is_dir());
    assert!(!Path::new("notes/.git").exists());
}
