//! CLI command definitions
//!
//! Defines the clap commands for the e2e harness.

use clap::{Args, Subcommand};

use crate::scenario::ScenarioKind;

#[derive(Subcommand)]
pub enum Commands {
    /// Connect to a virtual cluster and run the e2e scenarios
    Run {
        #[command(flatten)]
        target: TargetArgs,

        /// Run only this scenario (repeatable); defaults to all
        #[arg(long = "only", value_enum)]
        only: Vec<ScenarioKind>,

        /// Print the run report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Connect to a virtual cluster, probe it, and disconnect
    Connect {
        #[command(flatten)]
        target: TargetArgs,
    },

    /// List the available scenarios
    Scenarios,
}

/// Which virtual cluster to connect to
#[derive(Args, Debug, Default)]
pub struct TargetArgs {
    /// Host namespace the virtual cluster runs in
    #[arg(long, short = 'n', env = "NAMESPACE")]
    pub namespace: Option<String>,

    /// Name of the virtual cluster
    #[arg(long, env = "CLUSTER_NAME")]
    pub name: Option<String>,

    /// Local port for the tunnel
    #[arg(long, env = "LOCAL_PORT")]
    pub local_port: Option<u16>,
}
