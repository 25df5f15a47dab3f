//! Scenarios run against a connected virtual cluster
//!
//! Scenarios run strictly one after another. State one scenario leaves for
//! the next travels through [`Fixture`] instead of being implied by order.

mod fixture;
mod runner;

use serde::Serialize;

pub use fixture::{DeployedWorkload, Fixture};
pub use runner::ScenarioRunner;

/// The scenarios, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ScenarioKind {
    /// Create a deployment and wait until all replicas are ready
    DeployWorkload,
    /// Raise the deployment's replica count and check the update is accepted
    ScaleWorkload,
    /// Create and delete a namespace
    NamespaceLifecycle,
}

impl ScenarioKind {
    pub const ALL: [ScenarioKind; 3] = [
        ScenarioKind::DeployWorkload,
        ScenarioKind::ScaleWorkload,
        ScenarioKind::NamespaceLifecycle,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ScenarioKind::DeployWorkload => "deploy-workload",
            ScenarioKind::ScaleWorkload => "scale-workload",
            ScenarioKind::NamespaceLifecycle => "namespace-lifecycle",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            ScenarioKind::DeployWorkload => {
                "Deploys a workload and waits until the desired number of replicas are ready"
            }
            ScenarioKind::ScaleWorkload => {
                "Scales the workload up and checks the API server acknowledges the new replica count"
            }
            ScenarioKind::NamespaceLifecycle => "Creates a scratch namespace and deletes it again",
        }
    }
}

impl std::fmt::Display for ScenarioKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
