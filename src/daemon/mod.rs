//! Backgrounding the supervisor and managing its pid file.

mod lifecycle;
mod sentinel;

pub use lifecycle::{Daemon, Readiness};
pub use sentinel::{read_identity, read_pid, SentinelFile, SupervisorIdentity};
