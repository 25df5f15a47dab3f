//! Connection bootstrap
//!
//! Turns a [`Target`] into a client that has been proven to work:
//! 1. Allocates a private, empty credentials file
//! 2. Opens a tunnel that writes a kubeconfig into it once the forward is up
//! 3. Polls until the file parses, a client can be built from it, and a
//!    read-only probe through that client succeeds
//!
//! Everything except malformed credentials is treated as the tunnel still
//! starting up and retried until the ceiling.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::NamedTempFile;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::cluster::{ClusterApi, Connector};
use crate::common::config::Config;
use crate::common::paths::CREDENTIALS_PREFIX;
use crate::common::{Error, Result};
use crate::poll::{poll_until, PollOptions, Readiness};
use crate::report::Reporter;
use crate::tunnel::{Target, Tunnel, TunnelSession};

/// Settings for one bootstrap
#[derive(Debug, Clone)]
pub struct BootstrapOptions {
    /// Readiness poll cadence and ceiling
    pub poll: PollOptions,
    /// Consecutive auth rejections tolerated before failing; `None` retries until the ceiling
    pub auth_failure_limit: Option<u32>,
    /// Where the credentials file is created
    pub credentials_dir: PathBuf,
}

impl BootstrapOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll: config.timeouts.bootstrap_poll(),
            auth_failure_limit: config.timeouts.auth_failure_limit(),
            credentials_dir: config.credentials_dir(),
        }
    }
}

/// A validated client together with the resources that keep it working
///
/// Release with [`Connection::close`]. Dropping also kills the tunnel and
/// deletes the credentials file, without reporting errors.
pub struct Connection<C, S> {
    client: C,
    session: S,
    credentials: NamedTempFile,
}

impl<C: ClusterApi, S: TunnelSession> Connection<C, S> {
    /// The probed client, shared by all scenarios
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Path of the kubeconfig written by the tunnel
    pub fn credentials_path(&self) -> &Path {
        self.credentials.path()
    }

    /// Stop the tunnel and delete the credentials file
    ///
    /// Both steps run even if the first one fails; the first error is returned.
    pub async fn close(self) -> Result<()> {
        let Connection {
            client,
            mut session,
            credentials,
        } = self;
        drop(client);

        let closed = session.close().await;
        let path = credentials.path().display().to_string();
        let removed = credentials.close().map_err(|e| Error::FileRead {
            path,
            error: format!("failed to delete credentials file: {}", e),
        });

        tracing::debug!("Connection released");
        closed.and(removed)
    }
}

/// Opens tunnels and waits for them to yield a working client
pub struct Bootstrapper<T, C> {
    tunnel: T,
    connector: C,
    options: BootstrapOptions,
    reporter: Arc<dyn Reporter>,
}

impl<T: Tunnel, C: Connector> Bootstrapper<T, C> {
    pub fn new(tunnel: T, connector: C, options: BootstrapOptions, reporter: Arc<dyn Reporter>) -> Self {
        Self {
            tunnel,
            connector,
            options,
            reporter,
        }
    }

    /// Connect to `target` and return a probed client
    ///
    /// On any failure the tunnel is stopped and the credentials file deleted
    /// before returning.
    pub async fn connect(
        &self,
        target: &Target,
        cancel: &CancellationToken,
    ) -> Result<Connection<C::Client, T::Session>> {
        self.reporter.connecting(target);
        let started = Instant::now();

        let dir = &self.options.credentials_dir;
        let credentials = tempfile::Builder::new()
            .prefix(CREDENTIALS_PREFIX)
            .tempfile_in(dir)
            .map_err(|e| Error::ResourceAllocation {
                path: dir.display().to_string(),
                source: e,
            })?;
        tracing::debug!(path = %credentials.path().display(), "Allocated credentials file");

        let mut session = self.tunnel.open(target, credentials.path()).await?;

        let auth_failures = AtomicU32::new(0);
        let path = credentials.path();
        let result = poll_until(self.options.poll, cancel, || {
            self.check_ready(path, &auth_failures)
        })
        .await;

        match result {
            Ok(client) => {
                let elapsed = started.elapsed();
                tracing::info!(
                    target = %target,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Connected to virtual cluster"
                );
                self.reporter.connected(target, elapsed);
                Ok(Connection {
                    client,
                    session,
                    credentials,
                })
            }
            Err(e) => {
                if let Err(close_err) = session.close().await {
                    tracing::warn!(error = %close_err, "Failed to stop tunnel after unsuccessful bootstrap");
                }
                Err(e.into_error(&format!("connecting to {}", target), |waited, last| {
                    Error::bootstrap_timeout(target, waited, last)
                }))
            }
        }
    }

    /// One readiness check: read, parse, build, probe
    async fn check_ready(&self, path: &Path, auth_failures: &AtomicU32) -> Readiness<C::Client> {
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) => return Readiness::not_ready(format!("credentials file not readable: {}", e)),
        };
        if raw.iter().all(u8::is_ascii_whitespace) {
            return Readiness::not_ready("credentials file is still empty");
        }

        // Non-empty but unparseable output will not fix itself
        let config = match self.connector.parse(&raw) {
            Ok(config) => config,
            Err(e) => return Readiness::Fatal(e),
        };

        let client = match self.connector.connect(config).await {
            Ok(client) => client,
            Err(e) => return Readiness::not_ready(format!("client not ready: {}", e)),
        };

        match client.probe().await {
            Ok(()) => Readiness::Ready(client),
            Err(e) if e.is_auth_rejection() => {
                let attempts = auth_failures.fetch_add(1, Ordering::Relaxed) + 1;
                match self.options.auth_failure_limit {
                    Some(limit) if attempts >= limit => Readiness::Fatal(Error::CredentialsRejected {
                        attempts,
                        message: e.to_string(),
                    }),
                    _ => Readiness::not_ready(e.to_string()),
                }
            }
            Err(e) => {
                auth_failures.store(0, Ordering::Relaxed);
                Readiness::not_ready(e.to_string())
            }
        }
    }
}
