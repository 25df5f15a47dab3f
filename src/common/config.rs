//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::{config_path, default_credentials_dir};
use super::{Error, Result};
use crate::poll::PollOptions;
use crate::tunnel::Target;

/// Main configuration structure
#[derive(Debug, Deserialize, Default)]
pub struct Config {
    /// Directory for transient credential files (defaults to the system temp dir)
    #[serde(default)]
    pub credentials_dir: Option<PathBuf>,

    /// Virtual cluster to connect to
    #[serde(default)]
    pub target: TargetConfig,

    /// Tunnel CLI settings
    #[serde(default)]
    pub tunnel: TunnelConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Workload used by the scenarios
    #[serde(default)]
    pub workload: WorkloadConfig,
}

/// Target settings; each field can be overridden from the command line or environment
#[derive(Debug, Deserialize, Default)]
pub struct TargetConfig {
    pub namespace: Option<String>,
    pub name: Option<String>,
    pub local_port: Option<u16>,
}

/// Settings for the `vcluster` CLI that opens the tunnel
#[derive(Debug, Deserialize)]
pub struct TunnelConfig {
    /// Path to the tunnel binary; looked up in PATH when unset
    #[serde(default)]
    pub binary: Option<PathBuf>,

    /// Extra arguments appended to `vcluster connect`
    #[serde(default)]
    pub args: Vec<String>,

    /// Let the tunnel CLI detach into a background proxy, stopped with `vcluster disconnect`
    #[serde(default = "default_true")]
    pub background_proxy: bool,

    /// Pass `--debug` to the tunnel CLI
    #[serde(default = "default_true")]
    pub debug: bool,

    /// How long to watch the tunnel CLI for an immediate failure
    #[serde(default = "default_startup_grace")]
    pub startup_grace_ms: u64,
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            binary: None,
            args: Vec::new(),
            background_proxy: default_true(),
            debug: default_true(),
            startup_grace_ms: default_startup_grace(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_startup_grace() -> u64 {
    500
}

/// Timeout settings
#[derive(Debug, Deserialize)]
pub struct Timeouts {
    /// Interval between readiness checks
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Ceiling for the connection bootstrap
    #[serde(default = "default_ceiling")]
    pub bootstrap_secs: u64,

    /// Ceiling for each convergence wait
    #[serde(default = "default_ceiling")]
    pub convergence_secs: u64,

    /// Timeout applied to every API request
    #[serde(default = "default_ceiling")]
    pub request_secs: u64,

    /// Consecutive 401/403 probe responses tolerated before giving up (0 = never)
    #[serde(default = "default_auth_failure_limit")]
    pub auth_failure_limit: u32,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval(),
            bootstrap_secs: default_ceiling(),
            convergence_secs: default_ceiling(),
            request_secs: default_ceiling(),
            auth_failure_limit: default_auth_failure_limit(),
        }
    }
}

fn default_poll_interval() -> u64 {
    1000
}
fn default_ceiling() -> u64 {
    60
}
fn default_auth_failure_limit() -> u32 {
    5
}

impl Timeouts {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Poll settings for the connection bootstrap
    pub fn bootstrap_poll(&self) -> PollOptions {
        PollOptions::new(self.poll_interval(), Duration::from_secs(self.bootstrap_secs))
    }

    /// Poll settings for convergence waits
    pub fn convergence_poll(&self) -> PollOptions {
        PollOptions::new(self.poll_interval(), Duration::from_secs(self.convergence_secs))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }

    /// The auth failure limit, `None` when disabled
    pub fn auth_failure_limit(&self) -> Option<u32> {
        (self.auth_failure_limit > 0).then_some(self.auth_failure_limit)
    }
}

/// Workload created and mutated by the scenarios
#[derive(Debug, Deserialize, Clone)]
pub struct WorkloadConfig {
    #[serde(default = "default_workload_namespace")]
    pub namespace: String,

    #[serde(default = "default_workload_name")]
    pub name: String,

    /// Value of the `app` label used as the selector
    #[serde(default = "default_app_label")]
    pub app_label: String,

    #[serde(default = "default_container")]
    pub container: String,

    #[serde(default = "default_image")]
    pub image: String,

    /// Replica count at creation
    #[serde(default = "default_replicas")]
    pub replicas: i32,

    /// Replica count requested by the scale scenario
    #[serde(default = "default_scaled_replicas")]
    pub scaled_replicas: i32,

    /// Namespace created and deleted by the namespace lifecycle scenario
    #[serde(default = "default_scratch_namespace")]
    pub scratch_namespace: String,
}

impl Default for WorkloadConfig {
    fn default() -> Self {
        Self {
            namespace: default_workload_namespace(),
            name: default_workload_name(),
            app_label: default_app_label(),
            container: default_container(),
            image: default_image(),
            replicas: default_replicas(),
            scaled_replicas: default_scaled_replicas(),
            scratch_namespace: default_scratch_namespace(),
        }
    }
}

fn default_workload_namespace() -> String {
    "default".to_string()
}
fn default_workload_name() -> String {
    "example-deployment".to_string()
}
fn default_app_label() -> String {
    "example".to_string()
}
fn default_container() -> String {
    "nginx".to_string()
}
fn default_image() -> String {
    "nginx".to_string()
}
fn default_replicas() -> i32 {
    2
}
fn default_scaled_replicas() -> i32 {
    5
}
fn default_scratch_namespace() -> String {
    "vcluster-example".to_string()
}

impl Config {
    /// Load configuration from an explicit path or the default config file
    ///
    /// An explicit path must exist; a missing default file yields defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "Loading configuration");
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Check values that would make the harness misbehave rather than fail
    pub fn validate(&self) -> Result<()> {
        let t = &self.timeouts;
        if t.poll_interval_ms == 0 {
            return Err(Error::Config("timeouts.poll_interval_ms must be positive".to_string()));
        }
        for (field, secs) in [
            ("bootstrap_secs", t.bootstrap_secs),
            ("convergence_secs", t.convergence_secs),
        ] {
            if Duration::from_secs(secs) <= t.poll_interval() {
                return Err(Error::Config(format!(
                    "timeouts.{} ({}s) must be longer than the poll interval ({}ms)",
                    field, secs, t.poll_interval_ms
                )));
            }
        }
        if t.request_secs == 0 {
            return Err(Error::Config("timeouts.request_secs must be positive".to_string()));
        }

        let w = &self.workload;
        if w.replicas < 1 {
            return Err(Error::Config("workload.replicas must be at least 1".to_string()));
        }
        if w.scaled_replicas <= w.replicas {
            return Err(Error::Config(format!(
                "workload.scaled_replicas ({}) must be greater than workload.replicas ({})",
                w.scaled_replicas, w.replicas
            )));
        }
        for (field, value) in [
            ("namespace", &w.namespace),
            ("name", &w.name),
            ("app_label", &w.app_label),
            ("container", &w.container),
            ("image", &w.image),
            ("scratch_namespace", &w.scratch_namespace),
        ] {
            if value.trim().is_empty() {
                return Err(Error::Config(format!("workload.{} must not be empty", field)));
            }
        }
        Ok(())
    }

    /// Directory where the credential file is allocated
    pub fn credentials_dir(&self) -> PathBuf {
        self.credentials_dir
            .clone()
            .unwrap_or_else(default_credentials_dir)
    }

    /// Build the target from overrides, falling back to the config file
    pub fn resolve_target(
        &self,
        namespace: Option<String>,
        name: Option<String>,
        local_port: Option<u16>,
    ) -> Result<Target> {
        let namespace = namespace
            .or_else(|| self.target.namespace.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing_target_field("namespace", "--namespace", "NAMESPACE"))?;
        let name = name
            .or_else(|| self.target.name.clone())
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| missing_target_field("name", "--name", "CLUSTER_NAME"))?;
        let local_port = local_port
            .or(self.target.local_port)
            .filter(|p| *p != 0)
            .ok_or_else(|| missing_target_field("local_port", "--local-port", "LOCAL_PORT"))?;

        Ok(Target::new(namespace, name, local_port))
    }
}

fn missing_target_field(field: &str, flag: &str, env: &str) -> Error {
    Error::Config(format!(
        "No target {} given. Pass {}, set {}, or add target.{} to the config file",
        field, flag, env, field
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::from_toml("").unwrap();
        config.validate().unwrap();
        assert_eq!(config.timeouts.poll_interval(), Duration::from_secs(1));
        assert_eq!(config.timeouts.bootstrap_poll().timeout, Duration::from_secs(60));
        assert!(!config.timeouts.bootstrap_poll().immediate);
        assert_eq!(config.timeouts.request_timeout(), Duration::from_secs(60));
        assert_eq!(config.workload.name, "example-deployment");
        assert_eq!(config.workload.replicas, 2);
        assert_eq!(config.workload.scaled_replicas, 5);
        assert_eq!(config.workload.scratch_namespace, "vcluster-example");
        assert!(config.tunnel.debug);
        assert!(config.tunnel.background_proxy);
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
credentials_dir = "/var/tmp"

[target]
namespace = "team-a"
name = "vc-1"
local_port = 14550

[tunnel]
binary = "/usr/local/bin/vcluster"
args = ["--context", "kind-kind"]
background_proxy = false
debug = false

[timeouts]
poll_interval_ms = 500
bootstrap_secs = 120
auth_failure_limit = 0

[workload]
name = "web"
replicas = 3
scaled_replicas = 6
"#,
        )
        .unwrap();

        config.validate().unwrap();
        assert_eq!(config.credentials_dir(), PathBuf::from("/var/tmp"));
        assert_eq!(config.tunnel.args, vec!["--context", "kind-kind"]);
        assert!(!config.tunnel.background_proxy);
        assert_eq!(config.timeouts.auth_failure_limit(), None);
        assert_eq!(config.timeouts.convergence_secs, 60);
        assert_eq!(config.workload.name, "web");
        assert_eq!(config.workload.namespace, "default");

        let target = config.resolve_target(None, None, None).unwrap();
        assert_eq!(target.namespace, "team-a");
        assert_eq!(target.name, "vc-1");
        assert_eq!(target.local_port, 14550);
    }

    #[test]
    fn test_overrides_take_precedence() {
        let config = Config::from_toml("[target]\nnamespace = \"a\"\nname = \"b\"\nlocal_port = 1\n")
            .unwrap();
        let target = config
            .resolve_target(Some("x".into()), None, Some(2))
            .unwrap();
        assert_eq!(target.namespace, "x");
        assert_eq!(target.name, "b");
        assert_eq!(target.local_port, 2);
    }

    #[test]
    fn test_missing_target_field_is_reported() {
        let config = Config::default();
        let err = config
            .resolve_target(Some("ns".into()), None, Some(8443))
            .unwrap_err();
        assert!(err.to_string().contains("CLUSTER_NAME"));
    }

    #[test]
    fn test_rejects_scale_that_does_not_grow() {
        let config = Config::from_toml("[workload]\nreplicas = 5\nscaled_replicas = 5\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_rejects_interval_longer_than_ceiling() {
        let config =
            Config::from_toml("[timeouts]\npoll_interval_ms = 5000\nconvergence_secs = 2\n").unwrap();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::from_toml("[timeouts\n"),
            Err(Error::ConfigParse(_))
        ));
    }

    #[test]
    fn test_load_explicit_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/vcluster-e2e.toml"))).unwrap_err();
        assert!(matches!(err, Error::FileRead { .. }));
    }
}
