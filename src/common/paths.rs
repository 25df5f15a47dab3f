//! Configuration and scratch file locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/vcluster-e2e/`
//! - macOS: `~/Library/Application Support/vcluster-e2e/`
//! - Windows: `%APPDATA%\vcluster-e2e\`

use std::path::PathBuf;

/// Name used for per-user directories
const APP_NAME: &str = "vcluster-e2e";

/// Prefix of the transient kubeconfig files written by the tunnel
pub const CREDENTIALS_PREFIX: &str = "vcluster_e2e_kubeconfig_";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Directory where credential files are created unless configured otherwise
pub fn default_credentials_dir() -> PathBuf {
    std::env::temp_dir()
}
