//! Tunnels to virtual cluster API servers
//!
//! A tunnel exposes the remote API server on a local port and writes a
//! kubeconfig for it once the forward is up. Opening returns as soon as the
//! tunnel process is known not to have failed outright; the kubeconfig
//! appears later, so callers poll for it.

mod vcluster;

use std::fmt;
use std::path::Path;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::Result;

pub use vcluster::{VclusterSession, VclusterTunnel};

/// The virtual cluster to connect to
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    /// Host namespace the virtual cluster runs in
    pub namespace: String,
    /// Virtual cluster instance name
    pub name: String,
    /// Local port the tunnel binds to
    pub local_port: u16,
}

impl Target {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>, local_port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            local_port,
        }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

/// Something that can open a tunnel to a target
#[async_trait]
pub trait Tunnel: Send + Sync {
    type Session: TunnelSession;

    /// Start the tunnel, directing it to write credentials to `credentials`
    ///
    /// Fails with `Error::ConnectionSetup` when the tunnel is rejected up
    /// front. Success does not mean the credentials have been written yet.
    async fn open(&self, target: &Target, credentials: &Path) -> Result<Self::Session>;
}

/// A live tunnel; dropping it must also release the tunnel
#[async_trait]
pub trait TunnelSession: Send {
    /// Terminate the tunnel and wait for it to exit
    async fn close(&mut self) -> Result<()>;
}
