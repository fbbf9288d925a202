use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use notesync_core::{
    CloneOptions, Credentials, PullOptions, RepositoryClient, Result, SyncError,
};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Output;
use tokio::time::{timeout, Duration};

// Local plumbing must stay cheap; transfers get a generous but finite budget.
const DEFAULT_LOCAL_TIMEOUT: Duration = Duration::from_secs(10);
const DEFAULT_NETWORK_TIMEOUT: Duration = Duration::from_secs(300);

/// [`RepositoryClient`] backed by the `git` executable.
///
/// Relative repository directories resolve against `storage_root`, the same
/// way [`DiskFilesystem`](crate::DiskFilesystem) resolves them.
#[derive(Debug, Clone)]
pub struct GitCli {
    storage_root: PathBuf,
    program: PathBuf,
    local_timeout: Duration,
    network_timeout: Duration,
}

/// One git invocation: real argv plus a loggable rendering without secrets.
struct GitCommand {
    args: Vec<OsString>,
    shown: Vec<String>,
}

impl GitCommand {
    fn new() -> Self {
        Self {
            args: Vec::new(),
            shown: Vec::new(),
        }
    }

    fn arg(mut self, arg: impl Into<OsString>) -> Self {
        let arg = arg.into();
        self.shown.push(arg.to_string_lossy().into_owned());
        self.args.push(arg);
        self
    }

    fn dir(self, dir: &Path) -> Self {
        self.arg("-C").arg(dir.as_os_str())
    }

    fn config(self, key: &str, value: &str) -> Self {
        self.arg("-c").arg(format!("{key}={value}"))
    }

    fn credentials(mut self, credentials: Option<&Credentials>) -> Self {
        let Some(credentials) = credentials else {
            return self;
        };
        let token = BASE64.encode(format!("{}:{}", credentials.username, credentials.password));
        self.args.push("-c".into());
        self.args
            .push(format!("http.extraHeader=Authorization: Basic {token}").into());
        self.shown.push("-c".to_string());
        self.shown.push("http.extraHeader=<redacted>".to_string());
        self
    }

    fn display(&self) -> String {
        self.shown.join(" ")
    }
}

impl GitCli {
    pub fn new(storage_root: impl AsRef<Path>) -> Self {
        Self {
            storage_root: storage_root.as_ref().to_path_buf(),
            program: PathBuf::from("git"),
            local_timeout: DEFAULT_LOCAL_TIMEOUT,
            network_timeout: DEFAULT_NETWORK_TIMEOUT,
        }
    }

    #[must_use]
    pub fn resolve(&self, dir: &Path) -> PathBuf {
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.storage_root.join(dir)
        }
    }

    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    #[must_use]
    pub fn with_timeouts(mut self, local: Duration, network: Duration) -> Self {
        self.local_timeout = local;
        self.network_timeout = network;
        self
    }

    async fn run(&self, command: GitCommand, budget: Duration) -> Result<Output> {
        let rendered = command.display();
        log::info!("$ git {rendered}");

        let mut child = tokio::process::Command::new(&self.program);
        child
            .args(&command.args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .kill_on_drop(true);
        let output = timeout(budget, child.output())
            .await
            .map_err(|_| {
                SyncError::Network(format!(
                    "git {rendered} timed out after {}s",
                    budget.as_secs()
                ))
            })?
            .map_err(|err| SyncError::Other(format!("failed to run {}: {err}", self.program.display())))?;

        for line in String::from_utf8_lossy(&output.stderr).lines() {
            if !line.trim().is_empty() {
                log::debug!("git: {line}");
            }
        }
        Ok(output)
    }

    async fn run_checked(&self, command: GitCommand, budget: Duration) -> Result<String> {
        let output = self.run(command, budget).await?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(classify_failure(&String::from_utf8_lossy(&output.stderr)))
    }
}

#[async_trait]
impl RepositoryClient for GitCli {
    async fn clone_repository(
        &self,
        dir: &Path,
        remote_url: &str,
        options: &CloneOptions,
    ) -> Result<()> {
        let dir = self.resolve(dir);
        let mut command = GitCommand::new()
            .credentials(options.credentials.as_ref())
            .arg("clone")
            .arg("--branch")
            .arg(options.branch.as_str());
        if options.single_branch {
            command = command.arg("--single-branch");
        }
        if let Some(depth) = options.depth {
            command = command.arg("--depth").arg(depth.to_string());
        }
        let command = command.arg(remote_url).arg(dir.as_os_str());
        self.run_checked(command, self.network_timeout).await?;
        Ok(())
    }

    async fn pull(&self, dir: &Path, options: &PullOptions) -> Result<()> {
        let dir = self.resolve(dir);
        let command = GitCommand::new()
            .dir(&dir)
            .config("user.name", &options.author.name)
            .config("user.email", &options.author.email)
            .credentials(options.credentials.as_ref())
            .arg("pull")
            .arg("--no-rebase")
            .arg("--no-edit")
            .arg("origin")
            .arg(options.branch.as_str());
        self.run_checked(command, self.network_timeout).await?;
        Ok(())
    }

    async fn list_files(&self, dir: &Path, branch: &str) -> Result<Vec<String>> {
        let dir = self.resolve(dir);
        ensure_repository(&dir).await?;
        let command = GitCommand::new()
            .dir(&dir)
            .arg("ls-tree")
            .arg("-r")
            .arg("--name-only")
            .arg(branch);
        let stdout = self.run_checked(command, self.local_timeout).await?;
        Ok(stdout
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect())
    }

    async fn get_config(&self, dir: &Path, key: &str) -> Result<String> {
        let dir = self.resolve(dir);
        ensure_repository(&dir).await?;
        let command = GitCommand::new()
            .dir(&dir)
            .arg("config")
            .arg("--local")
            .arg("--get")
            .arg(key);
        let output = self.run(command, self.local_timeout).await?;
        // `git config --get` exits with 1 when the key is unset.
        if output.status.code() == Some(1) {
            return Err(SyncError::NotFound(format!("{key} in {}", dir.display())));
        }
        if !output.status.success() {
            return Err(classify_failure(&String::from_utf8_lossy(&output.stderr)));
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

/// Only the repository's own metadata counts; a parent checkout must not be picked up.
async fn ensure_repository(dir: &Path) -> Result<()> {
    let git_dir = dir.join(".git");
    match tokio::fs::metadata(&git_dir).await {
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Err(SyncError::NotFound(
            format!("no repository at {}", dir.display()),
        )),
        Err(err) => Err(SyncError::Io(err)),
    }
}

const AUTH_MARKERS: &[&str] = &[
    "authentication failed",
    "could not read username",
    "could not read password",
    "invalid username or password",
    "terminal prompts disabled",
    "permission denied",
    "http 401",
    "http 403",
    "error: 401",
    "error: 403",
];

const NETWORK_MARKERS: &[&str] = &[
    "could not resolve host",
    "failed to connect",
    "connection timed out",
    "connection refused",
    "connection reset",
    "network is unreachable",
    "unable to access",
    "early eof",
    "the remote end hung up",
];

const CONFLICT_MARKERS: &[&str] = &[
    "conflict",
    "not possible to fast-forward",
    "would be overwritten by merge",
    "divergent branches",
    "unmerged files",
    "refusing to merge unrelated histories",
];

/// Map git's stderr onto the capability error taxonomy.
#[must_use]
pub fn classify_failure(stderr: &str) -> SyncError {
    let lowered = stderr.to_lowercase();
    let detail = summarize(stderr);
    let has = |markers: &[&str]| markers.iter().any(|marker| lowered.contains(marker));

    if has(AUTH_MARKERS) {
        SyncError::Auth(detail)
    } else if has(NETWORK_MARKERS) {
        SyncError::Network(detail)
    } else if has(CONFLICT_MARKERS) {
        SyncError::Conflict(detail)
    } else {
        SyncError::Protocol(detail)
    }
}

fn summarize(stderr: &str) -> String {
    let lines: Vec<&str> = stderr
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    if lines.is_empty() {
        return "git exited without diagnostics".to_string();
    }
    let start = lines.len().saturating_sub(3);
    lines[start..].join("; ")
}
