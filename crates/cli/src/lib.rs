use anyhow::{anyhow, bail, Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use notesync_core::{
    Credentials, Dispatch, DocumentId, ErrorDescriptor, RepositoryId, StaticCredentials,
    SyncConfig, SyncEvent, SyncMachine, SyncSnapshot, SyncState,
};
use notesync_git::{DiskFilesystem, GitCli};
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "notesync")]
#[command(about = "Keep a local copy of a notes repository in sync", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors
    #[arg(long, global = true)]
    quiet: bool,

    /// Print results as JSON on stdout
    #[arg(long, global = true)]
    json: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Working tree directory (overrides the config file and NOTESYNC_ROOT)
    #[arg(long, global = true)]
    root: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the detected repository and document count
    Status,

    /// Clone a repository (owner/name), replacing the local copy
    Select(SelectArgs),

    /// Pull the tracked branch and refresh documents
    Sync,

    /// List document ids
    Documents,

    /// Print one document
    Show(ShowArgs),
}

#[derive(Args)]
struct SelectArgs {
    /// Repository identifier, e.g. acme/docs
    repository: String,
}

#[derive(Args)]
struct ShowArgs {
    /// Document id (path without extension)
    id: String,
}

#[derive(Serialize)]
struct StatusReport {
    state: SyncState,
    #[serde(skip_serializing_if = "Option::is_none")]
    repository: Option<String>,
    documents: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<ErrorDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    rejected: Option<String>,
}

impl StatusReport {
    fn new(snapshot: &SyncSnapshot, rejected: Option<String>) -> Self {
        Self {
            state: snapshot.state,
            repository: snapshot
                .context
                .repository
                .as_ref()
                .map(ToString::to_string),
            documents: snapshot.context.documents.len(),
            last_error: snapshot.context.last_error.clone(),
            rejected,
        }
    }

    fn print(&self, json: bool) -> Result<()> {
        if json {
            println!("{}", serde_json::to_string_pretty(self)?);
            return Ok(());
        }
        println!("state: {}", self.state);
        if let Some(repository) = &self.repository {
            println!("repository: {repository}");
        }
        println!("documents: {}", self.documents);
        if let Some(error) = &self.last_error {
            println!("error ({}): {}", error.kind, error.message);
        }
        if let Some(rejected) = &self.rejected {
            println!("rejected: {rejected}");
        }
        Ok(())
    }

    fn into_result(self) -> Result<()> {
        if let Some(rejected) = self.rejected {
            bail!("{rejected}");
        }
        if let Some(error) = self.last_error {
            bail!("{} failed: {}", error.kind, error.message);
        }
        Ok(())
    }
}

pub async fn main_entry() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    let config = resolve_config(&cli)?;
    let machine = start_machine(config)?;
    let initial = machine
        .wait_until_settled()
        .await
        .context("waiting for repository detection")?;

    match cli.command {
        Commands::Status => {
            let report = StatusReport::new(&initial, None);
            report.print(cli.json)?;
            report.into_result()
        }
        Commands::Select(args) => {
            let repository = RepositoryId::parse(&args.repository)?;
            run_event(&machine, SyncEvent::SelectRepository(repository), cli.json).await
        }
        Commands::Sync => run_event(&machine, SyncEvent::Sync, cli.json).await,
        Commands::Documents => {
            let documents = machine.documents();
            if cli.json {
                let ids: Vec<&str> = documents.iter().map(|doc| doc.id.as_str()).collect();
                println!("{}", serde_json::to_string_pretty(&ids)?);
            } else {
                for doc in documents.iter() {
                    println!("{}", doc.id);
                }
            }
            Ok(())
        }
        Commands::Show(args) => {
            let context = machine.current_context();
            let id = DocumentId::new(args.id);
            let content = context
                .documents
                .get(&id)
                .ok_or_else(|| anyhow!("no document {id}"))?;
            if cli.json {
                let doc = serde_json::json!({ "id": id, "content": content });
                println!("{}", serde_json::to_string_pretty(&doc)?);
            } else {
                print!("{content}");
            }
            Ok(())
        }
    }
}

async fn run_event(machine: &SyncMachine, event: SyncEvent, json: bool) -> Result<()> {
    let rejected = match machine.dispatch(event).await? {
        Dispatch::Accepted => None,
        Dispatch::Rejected(rejected) => Some(rejected.to_string()),
    };
    let snapshot = machine.wait_until_settled().await?;
    let report = StatusReport::new(&snapshot, rejected);
    report.print(json)?;
    report.into_result()
}

fn init_logging(cli: &Cli) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet || cli.json {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();
}

fn resolve_config(cli: &Cli) -> Result<SyncConfig> {
    let mut config = SyncConfig::resolve(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(root) = &cli.root {
        config.root_dir = root.clone();
    }
    config.root_dir = absolutize(&config.root_dir)?;
    Ok(config)
}

fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = env::current_dir().context("failed to read current directory")?;
    Ok(cwd.join(path))
}

fn credentials_from_env() -> Option<StaticCredentials> {
    let token = env::var("NOTESYNC_TOKEN")
        .ok()
        .filter(|token| !token.trim().is_empty())?;
    let username = env::var("NOTESYNC_USERNAME")
        .ok()
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| "x-access-token".to_string());
    Some(StaticCredentials(Credentials {
        username,
        password: token,
    }))
}

fn start_machine(config: SyncConfig) -> Result<SyncMachine> {
    let storage_root = config
        .root_dir
        .parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("working tree {} has no parent", config.root_dir.display()))?;
    log::debug!(
        "Using working tree {} (storage {})",
        config.root_dir.display(),
        storage_root.display()
    );

    let mut builder = SyncMachine::builder(
        Arc::new(DiskFilesystem::new(&storage_root)),
        Arc::new(GitCli::new(&storage_root)),
    )
    .config(config);
    if let Some(credentials) = credentials_from_env() {
        builder = builder.credentials(Arc::new(credentials));
    }
    Ok(builder.start())
}
