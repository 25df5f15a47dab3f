//! Tunnel backed by the `vcluster connect` CLI
//!
//! With a background proxy the CLI exits once the proxy is up, so the process
//! we spawned is not the tunnel. Such sessions are torn down with
//! `vcluster disconnect`, which finds the proxy through the current context of
//! the kubeconfig the CLI wrote.

use std::collections::VecDeque;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use super::{Target, Tunnel, TunnelSession};
use crate::common::config::TunnelConfig;
use crate::common::{Error, Result};

/// Lines of tunnel output kept for error messages
const OUTPUT_TAIL_LINES: usize = 20;

/// How long to wait for the output readers after the CLI exits
const OUTPUT_FLUSH_TIMEOUT: Duration = Duration::from_millis(200);

/// Upper bound for `vcluster disconnect`
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(30);

type OutputTail = Arc<Mutex<VecDeque<String>>>;

/// Opens tunnels by running `vcluster connect`
#[derive(Debug, Clone)]
pub struct VclusterTunnel {
    binary: PathBuf,
    extra_args: Vec<String>,
    background_proxy: bool,
    debug: bool,
    startup_grace: Duration,
}

impl VclusterTunnel {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            extra_args: Vec::new(),
            background_proxy: true,
            debug: false,
            startup_grace: Duration::from_millis(500),
        }
    }

    /// Build from configuration, searching PATH when no binary is configured
    pub fn from_config(config: &TunnelConfig) -> Result<Self> {
        let binary = match &config.binary {
            Some(path) => path.clone(),
            None => which::which("vcluster").map_err(|_| {
                Error::Config(
                    "vcluster CLI not found in PATH. Install it or set tunnel.binary in the config file"
                        .to_string(),
                )
            })?,
        };

        Ok(Self {
            binary,
            extra_args: config.args.clone(),
            background_proxy: config.background_proxy,
            debug: config.debug,
            startup_grace: Duration::from_millis(config.startup_grace_ms),
        })
    }

    pub fn with_startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    pub fn with_background_proxy(mut self, enabled: bool) -> Self {
        self.background_proxy = enabled;
        self
    }

    /// Arguments for `vcluster connect`
    ///
    /// The current kubeconfig is never touched; credentials go only to the
    /// given file.
    pub fn connect_args(&self, target: &Target, credentials: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "connect".into(),
            target.name.clone().into(),
            "--namespace".into(),
            target.namespace.clone().into(),
            "--local-port".into(),
            target.local_port.to_string().into(),
            "--kube-config".into(),
            credentials.as_os_str().to_os_string(),
            "--update-current=false".into(),
        ];
        if self.background_proxy {
            args.push("--background-proxy".into());
        }
        if self.debug {
            args.push("--debug".into());
        }
        args.extend(self.extra_args.iter().map(OsString::from));
        args
    }
}

#[async_trait]
impl Tunnel for VclusterTunnel {
    type Session = VclusterSession;

    async fn open(&self, target: &Target, credentials: &Path) -> Result<VclusterSession> {
        tracing::debug!(
            binary = %self.binary.display(),
            target = %target,
            local_port = target.local_port,
            background_proxy = self.background_proxy,
            "Starting tunnel"
        );

        let mut child = Command::new(&self.binary)
            .args(self.connect_args(target, credentials))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::connection_setup(
                    target,
                    format!("failed to start {}: {}", self.binary.display(), e),
                )
            })?;

        let tail: OutputTail = Arc::new(Mutex::new(VecDeque::with_capacity(OUTPUT_TAIL_LINES)));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(drain_output(stdout, tail.clone())));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(drain_output(stderr, tail.clone())));
        }

        let disconnect = self.background_proxy.then(|| Disconnect {
            binary: self.binary.clone(),
            credentials: credentials.to_path_buf(),
            target: target.to_string(),
        });

        match tokio::time::timeout(self.startup_grace, child.wait()).await {
            // Still running after the grace period: the forward is being set up
            Err(_) => {
                tracing::debug!(pid = child.id(), "Tunnel process running");
                Ok(VclusterSession {
                    child: Some(child),
                    readers,
                    disconnect,
                })
            }
            Ok(Ok(status)) if status.success() => {
                tracing::debug!("Tunnel CLI exited cleanly, proxy runs detached");
                Ok(VclusterSession {
                    child: None,
                    readers,
                    disconnect,
                })
            }
            Ok(Ok(status)) => {
                for reader in readers {
                    let _ = tokio::time::timeout(OUTPUT_FLUSH_TIMEOUT, reader).await;
                }
                let output = render_tail(&tail);
                let reason = if output.is_empty() {
                    format!("{} exited with {}", self.binary.display(), status)
                } else {
                    format!("{} exited with {}: {}", self.binary.display(), status, output)
                };
                Err(Error::connection_setup(target, reason))
            }
            Ok(Err(e)) => Err(Error::connection_setup(
                target,
                format!("failed to wait for {}: {}", self.binary.display(), e),
            )),
        }
    }
}

/// A running `vcluster connect`, or the background proxy it left behind
pub struct VclusterSession {
    child: Option<Child>,
    readers: Vec<JoinHandle<()>>,
    disconnect: Option<Disconnect>,
}

impl VclusterSession {
    /// Process id of the tunnel CLI, if it is still attached
    pub fn pid(&self) -> Option<u32> {
        self.child.as_ref().and_then(|c| c.id())
    }

    async fn stop_child(&mut self) -> Result<()> {
        if let Some(mut child) = self.child.take() {
            match child.try_wait()? {
                Some(status) => {
                    tracing::debug!(%status, "Tunnel process had already exited");
                }
                None => {
                    tracing::debug!(pid = child.id(), "Stopping tunnel process");
                    child.kill().await?;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl TunnelSession for VclusterSession {
    async fn close(&mut self) -> Result<()> {
        let stopped = self.stop_child().await;
        for reader in self.readers.drain(..) {
            reader.abort();
        }
        let disconnected = match self.disconnect.take() {
            Some(disconnect) => disconnect.run().await,
            None => Ok(()),
        };
        stopped.and(disconnected)
    }
}

impl Drop for VclusterSession {
    fn drop(&mut self) {
        // Child is killed by kill_on_drop
        for reader in &self.readers {
            reader.abort();
        }
        if let Some(disconnect) = self.disconnect.take() {
            disconnect.run_blocking();
        }
    }
}

/// Stops the background proxy of one connection
#[derive(Debug)]
struct Disconnect {
    binary: PathBuf,
    credentials: PathBuf,
    target: String,
}

impl Disconnect {
    async fn run(self) -> Result<()> {
        tracing::debug!(target = %self.target, "Stopping background proxy");
        let mut command = Command::new(&self.binary);
        command
            .arg("disconnect")
            .env("KUBECONFIG", &self.credentials)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(DISCONNECT_TIMEOUT, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(self.failed(format!("failed to run disconnect: {}", e))),
            Err(_) => {
                return Err(self.failed(format!(
                    "disconnect did not finish within {} seconds",
                    DISCONNECT_TIMEOUT.as_secs()
                )))
            }
        };

        if output.status.success() {
            return Ok(());
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(self.failed(format!(
            "disconnect exited with {}: {}",
            output.status,
            stderr.trim()
        )))
    }

    /// Drop path; waits for the CLI so the credentials file still exists while it runs
    fn run_blocking(self) {
        tracing::debug!(target = %self.target, "Stopping background proxy on drop");
        let status = std::process::Command::new(&self.binary)
            .arg("disconnect")
            .env("KUBECONFIG", &self.credentials)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match status {
            Ok(status) if status.success() => {}
            Ok(status) => tracing::warn!(target = %self.target, %status, "Failed to stop background proxy"),
            Err(e) => tracing::warn!(target = %self.target, error = %e, "Failed to stop background proxy"),
        }
    }

    fn failed(&self, reason: String) -> Error {
        Error::TunnelTeardown {
            target: self.target.clone(),
            reason,
        }
    }
}

async fn drain_output<R>(output: R, tail: OutputTail)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(output);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }
        let line = String::from_utf8_lossy(&buf)
            .trim_end_matches(&['\r', '\n'][..])
            .to_string();
        tracing::debug!(target: "vcluster_e2e::tunnel::output", "{}", line);
        if let Ok(mut tail) = tail.lock() {
            if tail.len() == OUTPUT_TAIL_LINES {
                tail.pop_front();
            }
            tail.push_back(line);
        }
    }
}

fn render_tail(tail: &OutputTail) -> String {
    tail.lock()
        .map(|lines| {
            lines
                .iter()
                .map(|l| l.trim())
                .filter(|l| !l.is_empty())
                .collect::<Vec<_>>()
                .join(" | ")
        })
        .unwrap_or_default()
}
