//! Integration tests that run real processes and real files.
//!
//! Watchers are the `lbmon` binary built for this test run.

mod helpers;
mod supervisor_processes;
mod worker_cli;
