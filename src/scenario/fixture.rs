//! State shared between scenarios

use crate::cluster::Workload;

/// A workload a scenario has put on the cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeployedWorkload {
    pub namespace: String,
    pub name: String,
    /// Replica count as last acknowledged by the API server
    pub replicas: i32,
}

impl DeployedWorkload {
    pub fn from_workload(workload: &Workload) -> Self {
        Self {
            namespace: workload.spec.namespace.clone(),
            name: workload.spec.name.clone(),
            replicas: workload.spec.replicas,
        }
    }

    /// `namespace/name`
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Everything earlier scenarios left behind for later ones
#[derive(Debug, Default)]
pub struct Fixture {
    pub workload: Option<DeployedWorkload>,
}
