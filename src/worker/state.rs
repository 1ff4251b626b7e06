use std::fmt;

use crate::error::MonitorError;

/// Lifecycle of a watcher process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Claimed,
    Running,
    Exiting,
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerState::Init => write!(f, "Init"),
            WorkerState::Claimed => write!(f, "Claimed"),
            WorkerState::Running => write!(f, "Running"),
            WorkerState::Exiting => write!(f, "Exiting"),
            WorkerState::Terminated => write!(f, "Terminated"),
        }
    }
}

impl WorkerState {
    /// Check if transitioning from the current state to `next` is valid.
    ///
    /// Valid transitions:
    /// - `Init` -> `Claimed` | `Terminated` (no signal handlers, cluster already claimed, or claim failed)
    /// - `Claimed` -> `Running` | `Exiting`
    /// - `Running` -> `Exiting`
    /// - `Exiting` -> `Terminated`
    pub fn can_transition_to(&self, next: WorkerState) -> bool {
        match self {
            WorkerState::Init => matches!(next, WorkerState::Claimed | WorkerState::Terminated),
            WorkerState::Claimed => matches!(next, WorkerState::Running | WorkerState::Exiting),
            WorkerState::Running => next == WorkerState::Exiting,
            WorkerState::Exiting => next == WorkerState::Terminated,
            WorkerState::Terminated => false,
        }
    }

    pub fn try_transition(&self, next: WorkerState) -> Result<WorkerState, MonitorError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(MonitorError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// States in which this process holds the cluster's marker.
    pub fn holds_claim(&self) -> bool {
        matches!(
            self,
            WorkerState::Claimed | WorkerState::Running | WorkerState::Exiting
        )
    }

    pub fn is_terminal(&self) -> bool {
        *self == WorkerState::Terminated
    }
}
