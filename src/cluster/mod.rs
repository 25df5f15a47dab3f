//! Access to the virtual cluster's API
//!
//! The harness only needs a handful of calls, so they are expressed as the
//! [`ClusterApi`] trait over small domain types. [`Connector`] turns the
//! credentials written by the tunnel into a client.

mod kubernetes;

use std::collections::BTreeMap;

use async_trait::async_trait;
use serde::Serialize;

use crate::common::Result;

pub use kubernetes::{KubeCluster, KubeConnector};

/// Desired state of the replicated workload
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadSpec {
    pub namespace: String,
    pub name: String,
    /// Labels used both as selector and on the pod template
    pub labels: BTreeMap<String, String>,
    pub container: String,
    pub image: String,
    pub replicas: i32,
}

/// Status reported by the cluster; never written by the harness
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkloadStatus {
    pub ready_replicas: i32,
}

/// A workload as read back from the cluster
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Workload {
    pub spec: WorkloadSpec,
    pub status: WorkloadStatus,
    /// Version used for optimistic concurrency on update
    pub resource_version: Option<String>,
}

/// The calls the scenarios make against the cluster
///
/// Every method fails with `Error::RemoteCall`, carrying the HTTP status when
/// the API server answered.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Cheap read of an object every cluster has
    async fn probe(&self) -> Result<()>;

    /// Create a workload and return it as accepted by the server
    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Workload>;

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload>;

    /// Replace a workload's spec, failing on a stale resource version
    async fn update_workload(&self, workload: &Workload) -> Result<Workload>;

    async fn create_namespace(&self, name: &str) -> Result<()>;

    async fn delete_namespace(&self, name: &str) -> Result<()>;
}

/// Builds clients from the credentials the tunnel writes
///
/// Split in two steps so that malformed credentials (fatal) can be told apart
/// from a client that cannot be built yet (retryable).
#[async_trait]
pub trait Connector: Send + Sync {
    type Config: Send;
    type Client: ClusterApi;

    /// Parse credential bytes; fails with `Error::BootstrapParse`
    fn parse(&self, raw: &[u8]) -> Result<Self::Config>;

    /// Build a client from parsed credentials
    async fn connect(&self, config: Self::Config) -> Result<Self::Client>;
}
