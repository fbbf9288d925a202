//! Pure transition core of the sync machine.
//!
//! [`Transitions`] owns the phase and the [`SyncContext`]; it performs no I/O.
//! Events and operation outcomes go in, the next [`Operation`] to run comes out.

use crate::document::{DocumentMap, SharedDocuments};
use crate::error::{ErrorDescriptor, FailureKind};
use crate::repository::RepositoryId;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    Initializing,
    Empty,
    Cloning,
    Listing,
    Idle,
    Pulling,
    Error,
}

impl SyncState {
    pub const ALL: [SyncState; 7] = [
        SyncState::Initializing,
        SyncState::Empty,
        SyncState::Cloning,
        SyncState::Listing,
        SyncState::Idle,
        SyncState::Pulling,
        SyncState::Error,
    ];

    /// No operation is in flight.
    #[must_use]
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Empty | Self::Idle | Self::Error)
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Empty => "empty",
            Self::Cloning => "cloning",
            Self::Listing => "listing",
            Self::Idle => "idle",
            Self::Pulling => "pulling",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Data owned by the machine. Fields are only ever replaced as a whole.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncContext {
    pub repository: Option<RepositoryId>,
    pub documents: SharedDocuments,
    pub last_error: Option<ErrorDescriptor>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    SelectRepository(RepositoryId),
    Sync,
}

impl SyncEvent {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::SelectRepository(_) => "select_repository",
            Self::Sync => "sync",
        }
    }
}

/// Work the driver has to run before the machine can move on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    Detect,
    Clone { repository: RepositoryId },
    List,
    Pull,
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Clone { .. } => "clone",
            Self::List => "list",
            Self::Pull => "pull",
        }
    }
}

/// Result of an [`Operation`], fed back through [`Transitions::complete`].
#[derive(Debug)]
pub enum Outcome {
    Detected(Result<RepositoryId>),
    Cloned(Result<()>),
    Listed(Result<DocumentMap>),
    Pulled(Result<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rejected {
    pub state: SyncState,
    pub event: &'static str,
}

impl fmt::Display for Rejected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} is not accepted while {}", self.event, self.state)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum SyncPhase {
    Initializing,
    Empty,
    Cloning {
        target: RepositoryId,
    },
    /// `pending` is the identifier to commit together with the listed documents.
    Listing {
        pending: Option<RepositoryId>,
    },
    Idle,
    Pulling,
    Failed,
}

impl SyncPhase {
    fn state(&self) -> SyncState {
        match self {
            Self::Initializing => SyncState::Initializing,
            Self::Empty => SyncState::Empty,
            Self::Cloning { .. } => SyncState::Cloning,
            Self::Listing { .. } => SyncState::Listing,
            Self::Idle => SyncState::Idle,
            Self::Pulling => SyncState::Pulling,
            Self::Failed => SyncState::Error,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Transitions {
    phase: SyncPhase,
    context: SyncContext,
}

impl Transitions {
    /// A machine in `initializing` and the detection it is waiting on.
    #[must_use]
    pub fn new() -> (Self, Operation) {
        (
            Self {
                phase: SyncPhase::Initializing,
                context: SyncContext::default(),
            },
            Operation::Detect,
        )
    }

    #[must_use]
    pub fn state(&self) -> SyncState {
        self.phase.state()
    }

    #[must_use]
    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    /// Apply a caller event. Rejections leave phase and context untouched.
    pub fn dispatch(&mut self, event: SyncEvent) -> std::result::Result<Operation, Rejected> {
        let state = self.phase.state();
        match (state, event) {
            (
                SyncState::Empty | SyncState::Idle | SyncState::Error,
                SyncEvent::SelectRepository(target),
            ) => {
                self.context.last_error = None;
                self.phase = SyncPhase::Cloning {
                    target: target.clone(),
                };
                Ok(Operation::Clone { repository: target })
            }
            (SyncState::Idle, SyncEvent::Sync) => {
                self.phase = SyncPhase::Pulling;
                Ok(Operation::Pull)
            }
            (
                SyncState::Initializing
                | SyncState::Empty
                | SyncState::Cloning
                | SyncState::Listing
                | SyncState::Pulling
                | SyncState::Error,
                event @ SyncEvent::Sync,
            )
            | (
                SyncState::Initializing
                | SyncState::Cloning
                | SyncState::Listing
                | SyncState::Pulling,
                event @ SyncEvent::SelectRepository(_),
            ) => Err(Rejected {
                state,
                event: event.name(),
            }),
        }
    }

    /// Apply the outcome of the operation the current phase is waiting on.
    ///
    /// An outcome that does not belong to the current phase is ignored.
    pub fn complete(&mut self, outcome: Outcome) -> Option<Operation> {
        let phase = std::mem::replace(&mut self.phase, SyncPhase::Failed);
        let (next_phase, next_op) = match (phase, outcome) {
            (SyncPhase::Initializing, Outcome::Detected(Ok(repository))) => (
                SyncPhase::Listing {
                    pending: Some(repository),
                },
                Some(Operation::List),
            ),
            (SyncPhase::Initializing, Outcome::Detected(Err(err))) => {
                log::debug!("No local repository detected: {err}");
                (SyncPhase::Empty, None)
            }
            (SyncPhase::Cloning { target }, Outcome::Cloned(Ok(()))) => (
                SyncPhase::Listing {
                    pending: Some(target),
                },
                Some(Operation::List),
            ),
            (SyncPhase::Cloning { .. }, Outcome::Cloned(Err(err))) => {
                self.context = SyncContext {
                    repository: None,
                    documents: SharedDocuments::default(),
                    last_error: Some(ErrorDescriptor::new(FailureKind::Clone, &err)),
                };
                (SyncPhase::Failed, None)
            }
            (SyncPhase::Listing { pending }, Outcome::Listed(Ok(documents))) => {
                let repository = pending.or_else(|| self.context.repository.clone());
                self.context = SyncContext {
                    repository,
                    documents: Arc::new(documents),
                    last_error: None,
                };
                (SyncPhase::Idle, None)
            }
            (SyncPhase::Listing { .. }, Outcome::Listed(Err(err))) => {
                self.context.last_error = Some(ErrorDescriptor::new(FailureKind::Listing, &err));
                (SyncPhase::Failed, None)
            }
            (SyncPhase::Pulling, Outcome::Pulled(Ok(()))) => {
                (SyncPhase::Listing { pending: None }, Some(Operation::List))
            }
            (SyncPhase::Pulling, Outcome::Pulled(Err(err))) => {
                self.context.last_error = Some(ErrorDescriptor::new(FailureKind::Pull, &err));
                (SyncPhase::Failed, None)
            }
            (phase, outcome) => {
                log::debug!(
                    "Ignoring {} outcome while {}",
                    outcome_name(&outcome),
                    phase.state()
                );
                (phase, None)
            }
        };
        self.phase = next_phase;
        next_op
    }
}

fn outcome_name(outcome: &Outcome) -> &'static str {
    match outcome {
        Outcome::Detected(_) => "detect",
        Outcome::Cloned(_) => "clone",
        Outcome::Listed(_) => "list",
        Outcome::Pulled(_) => "pull",
    }
}
