use crate::capability::{
    CloneOptions, CredentialHook, Filesystem, PullOptions, RemoveOptions, RepositoryClient,
};
use crate::config::{SyncConfig, REMOTE_ORIGIN_URL_KEY};
use crate::projector::ContentProjector;
use crate::repository::RepositoryId;
use crate::state::{Operation, Outcome};
use crate::{Result, SyncError};
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Runs the I/O behind each [`Operation`] against the injected capabilities.
#[derive(Clone)]
pub(crate) struct OperationRunner {
    fs: Arc<dyn Filesystem>,
    client: Arc<dyn RepositoryClient>,
    credentials: Option<Arc<dyn CredentialHook>>,
    config: Arc<SyncConfig>,
    projector: ContentProjector,
}

impl OperationRunner {
    pub(crate) fn new(
        fs: Arc<dyn Filesystem>,
        client: Arc<dyn RepositoryClient>,
        credentials: Option<Arc<dyn CredentialHook>>,
        config: Arc<SyncConfig>,
    ) -> Self {
        let projector = ContentProjector::new(&config.document_extensions);
        Self {
            fs,
            client,
            credentials,
            config,
            projector,
        }
    }

    pub(crate) async fn run(&self, op: Operation, cancel: &CancellationToken) -> Outcome {
        match op {
            Operation::Detect => Outcome::Detected(until_cancelled(cancel, self.detect()).await),
            Operation::Clone { repository } => {
                Outcome::Cloned(until_cancelled(cancel, self.clone_into_root(&repository)).await)
            }
            Operation::List => Outcome::Listed(
                self.projector
                    .project(self.fs.as_ref(), &self.config.root_dir, cancel)
                    .await,
            ),
            Operation::Pull => Outcome::Pulled(until_cancelled(cancel, self.pull()).await),
        }
    }

    /// Local-only probe for an existing clone: origin config, then the branch listing.
    async fn detect(&self) -> Result<RepositoryId> {
        let root = &self.config.root_dir;
        let origin = self.client.get_config(root, REMOTE_ORIGIN_URL_KEY).await?;
        let repository = RepositoryId::from_remote_url(&origin, &self.config.remote_base_url)?;
        let files = self.client.list_files(root, &self.config.branch).await?;
        log::info!(
            "Found existing clone of {repository} ({} tracked files)",
            files.len()
        );
        Ok(repository)
    }

    async fn clone_into_root(&self, repository: &RepositoryId) -> Result<()> {
        self.prepare_storage().await?;

        let url = repository.remote_url(&self.config.remote_base_url);
        let options = CloneOptions {
            branch: self.config.branch.clone(),
            single_branch: self.config.single_branch,
            depth: self.config.clone_depth(),
            credentials: self.credentials_for(&url),
        };
        log::info!("Cloning {url} ({}) into {}", options.branch, self.config.root_dir.display());
        self.client
            .clone_repository(&self.config.root_dir, &url, &options)
            .await
    }

    /// Clear whatever a previous clone left behind. Completes before the clone starts.
    async fn prepare_storage(&self) -> Result<()> {
        let root = &self.config.root_dir;
        if !self.fs.supports_scoped_remove() {
            log::warn!("Storage cannot remove {} alone; wiping all local storage", root.display());
            return self.fs.wipe().await;
        }
        match self.fs.remove(root, RemoveOptions { recursive: true }).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Ok(()),
            Err(err) => Err(err),
        }
    }

    async fn pull(&self) -> Result<()> {
        let credentials = match self
            .client
            .get_config(&self.config.root_dir, REMOTE_ORIGIN_URL_KEY)
            .await
        {
            Ok(origin) => self.credentials_for(&origin),
            Err(err) => {
                log::debug!("No origin URL for credential lookup: {err}");
                None
            }
        };
        let options = PullOptions {
            branch: self.config.branch.clone(),
            author: self.config.author.clone(),
            credentials,
        };
        log::info!("Pulling {} into {}", options.branch, self.config.root_dir.display());
        self.client.pull(&self.config.root_dir, &options).await
    }

    fn credentials_for(&self, url: &str) -> Option<crate::capability::Credentials> {
        self.credentials
            .as_ref()
            .and_then(|hook| hook.credentials_for(url))
    }
}

/// Drops `work` as soon as `cancel` fires, so child processes are killed with it.
async fn until_cancelled<T>(
    cancel: &CancellationToken,
    work: impl Future<Output = Result<T>>,
) -> Result<T> {
    tokio::select! {
        biased;

        () = cancel.cancelled() => Err(SyncError::Cancelled),
        result = work => result,
    }
}

/// The outcome an operation reports when its task dies before producing one.
pub(crate) fn failed_outcome(op: &Operation, err: SyncError) -> Outcome {
    match op {
        Operation::Detect => Outcome::Detected(Err(err)),
        Operation::Clone { .. } => Outcome::Cloned(Err(err)),
        Operation::List => Outcome::Listed(Err(err)),
        Operation::Pull => Outcome::Pulled(Err(err)),
    }
}
