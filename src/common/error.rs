//! Error types for the e2e harness
//!
//! Messages name the condition that was being awaited and the last thing the
//! harness observed, so a failed run can be diagnosed from its output alone.

use std::io;
use std::time::Duration;
use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Bootstrap Errors ===
    #[error("Failed to create credentials file in '{path}': {source}")]
    ResourceAllocation {
        path: String,
        #[source]
        source: io::Error,
    },

    #[error("Tunnel to {target} could not be established: {reason}")]
    ConnectionSetup { target: String, reason: String },

    #[error("Tunnel to {target} could not be stopped: {reason}")]
    TunnelTeardown { target: String, reason: String },

    #[error("Timed out after {waited_secs} seconds waiting for a working connection to {target} (last observed: {last_observed})")]
    BootstrapTimeout {
        target: String,
        waited_secs: u64,
        last_observed: String,
    },

    #[error("Credentials written by the tunnel are malformed: {0}. Check that the tunnel CLI version matches the cluster")]
    BootstrapParse(String),

    #[error("Cluster rejected the tunnel credentials {attempts} times in a row: {message}")]
    CredentialsRejected { attempts: u32, message: String },

    // === Scenario Errors ===
    #[error("Timed out after {waited_secs} seconds waiting for {what} (last observed: {last_observed})")]
    ConvergenceTimeout {
        what: String,
        waited_secs: u64,
        last_observed: String,
    },

    #[error("{operation} failed: {message}")]
    RemoteCall {
        operation: String,
        status: Option<u16>,
        message: String,
    },

    #[error("Test assertion failed: {0}")]
    TestAssertion(String),

    #[error("Scenario '{scenario}' failed: {message}")]
    ScenarioFailed { scenario: String, message: String },

    #[error("Run cancelled while {0}")]
    Cancelled(String),

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },

    // === Serialization Errors ===
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // === Internal Errors ===
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a remote call error
    pub fn remote_call(operation: &str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::RemoteCall {
            operation: operation.to_string(),
            status,
            message: message.into(),
        }
    }

    /// Create a connection setup error
    pub fn connection_setup(target: impl ToString, reason: impl Into<String>) -> Self {
        Self::ConnectionSetup {
            target: target.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a bootstrap timeout error
    pub fn bootstrap_timeout(target: impl ToString, waited: Duration, last: Option<String>) -> Self {
        Self::BootstrapTimeout {
            target: target.to_string(),
            waited_secs: waited.as_secs(),
            last_observed: describe_last(last),
        }
    }

    /// Create a convergence timeout error
    pub fn convergence_timeout(what: impl Into<String>, waited: Duration, last: Option<String>) -> Self {
        Self::ConvergenceTimeout {
            what: what.into(),
            waited_secs: waited.as_secs(),
            last_observed: describe_last(last),
        }
    }

    /// Whether the remote system refused the caller's identity (401/403)
    pub fn is_auth_rejection(&self) -> bool {
        matches!(
            self,
            Error::RemoteCall {
                status: Some(401 | 403),
                ..
            }
        )
    }

    /// Whether the remote object does not exist (404)
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::RemoteCall {
                status: Some(404),
                ..
            }
        )
    }

    /// Whether the run was cancelled rather than failing on its own
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled(_))
    }
}

fn describe_last(last: Option<String>) -> String {
    last.unwrap_or_else(|| "no attempt completed".to_string())
}
