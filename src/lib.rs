//! vcluster e2e - verification harness for virtual clusters
//!
//! This library opens a tunnel to a virtual cluster, waits until the
//! credentials it produces yield a working API client, and then runs a
//! sequence of scenarios that mutate the cluster and wait for it to converge.

pub mod bootstrap;
pub mod cli;
pub mod cluster;
pub mod commands;
pub mod common;
pub mod poll;
pub mod report;
pub mod scenario;
pub mod tunnel;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use poll::{poll_until, PollError, PollOptions, Readiness};
