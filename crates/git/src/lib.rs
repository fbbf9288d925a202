//! # Notesync Git
//!
//! Concrete capabilities for `notesync-core`: local disk storage and a
//! [`RepositoryClient`](notesync_core::RepositoryClient) that drives the `git`
//! executable.

mod disk;
mod git_cli;

pub use disk::DiskFilesystem;
pub use git_cli::{classify_failure, GitCli};
