//! Supervisor: reconciles running watchers against the cluster store.
//!
//! Each tick reaps exited watchers, stops watchers of clusters that went
//! down, and spawns watchers for up, always-on clusters that lack one.

mod core;
mod handle;
mod launcher;
mod stop;


pub use self::core::{RunExit, Supervisor, SupervisorSettings, TickReport};
pub use handle::WorkerHandle;
pub use launcher::{
    ChildHandle, CommandLauncher, ExitSummary, ForeignProcess, ProcessChild, WorkerLauncher,
};
pub use stop::{begin_stop, finish_stop, graceful_stop, StopOutcome};
