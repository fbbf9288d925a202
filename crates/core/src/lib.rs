//! # Notesync Core
//!
//! Keeps a local working copy of a remote repository in sync and projects its
//! markdown documents into an in-memory collection.
//!
//! ## States
//!
//! ```text
//! initializing ──found──> listing ──ok──> idle ──Sync──> pulling ──ok──> listing
//!      │                     │              │                │
//!   missing                 err     SelectRepository        err
//!      v                     v              v                v
//!    empty ──SelectRepository──> cloning ──ok──> listing    error
//!                                   │
//!                                  err ──> error (context reset)
//! ```
//!
//! `error` is left only through `SelectRepository`; nothing is retried automatically.
//!
//! ## Example
//!
//! ```no_run
//! use notesync_core::{MemoryFilesystem, RepositoryId, SyncConfig, SyncEvent, SyncMachine};
//! # use std::sync::Arc;
//! # async fn run(client: Arc<dyn notesync_core::RepositoryClient>) -> notesync_core::Result<()> {
//! let fs = Arc::new(MemoryFilesystem::new());
//! let machine = SyncMachine::start(fs, client, SyncConfig::default());
//! machine.wait_until_settled().await?;
//!
//! machine
//!     .dispatch(SyncEvent::SelectRepository(RepositoryId::parse("acme/docs")?))
//!     .await?;
//! let snapshot = machine.wait_until_settled().await?;
//! println!("{} documents", snapshot.context.documents.len());
//! # Ok(())
//! # }
//! ```

mod capability;
mod config;
mod document;
mod error;
mod machine;
mod memory;
mod operations;
mod projector;
mod repository;
mod state;
mod view;

pub use capability::{
    AuthorIdentity, CloneOptions, CredentialHook, Credentials, FileStat, Filesystem, PullOptions,
    RemoveOptions, RepositoryClient, StaticCredentials,
};
pub use config::{
    SyncConfig, DEFAULT_BRANCH, DEFAULT_DEPTH, DEFAULT_REMOTE_BASE_URL, DEFAULT_ROOT_DIR,
    REMOTE_ORIGIN_URL_KEY,
};
pub use document::{Document, DocumentId, DocumentMap, SharedDocuments};
pub use error::{ErrorDescriptor, FailureKind, Result, SyncError};
pub use machine::{Dispatch, SyncHealth, SyncMachine, SyncMachineBuilder, SyncSnapshot, SyncUpdate};
pub use memory::MemoryFilesystem;
pub use projector::ContentProjector;
pub use repository::RepositoryId;
pub use state::{Operation, Outcome, Rejected, SyncContext, SyncEvent, SyncState, Transitions};
pub use view::{documents_fingerprint, project_documents, DocumentView};
