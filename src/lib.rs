//! lbmon: keeps one failover watcher process per up, always-on
//! load-balancer cluster.

pub mod cli;
pub mod commands;
pub mod config;
pub mod daemon;
pub mod error;
pub mod logging;
pub mod marker;
pub mod process;
pub mod store;
pub mod supervisor;
pub mod tick;
pub mod worker;
