//! Kubernetes implementation of the cluster API
//!
//! The workload is a Deployment; the probe reads the `default` service
//! account, which the API server creates in every cluster.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{Container, Namespace, PodSpec, PodTemplateSpec, ServiceAccount};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use kube::api::{Api, DeleteParams, PostParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::Client;

use super::{ClusterApi, Connector, Workload, WorkloadSpec, WorkloadStatus};
use crate::common::{Error, Result};

const PROBE_NAMESPACE: &str = "default";
const PROBE_SERVICE_ACCOUNT: &str = "default";

/// Builds kube clients from kubeconfig bytes
#[derive(Debug, Clone)]
pub struct KubeConnector {
    request_timeout: Duration,
}

impl KubeConnector {
    pub fn new(request_timeout: Duration) -> Self {
        Self { request_timeout }
    }
}

#[async_trait]
impl Connector for KubeConnector {
    type Config = Kubeconfig;
    type Client = KubeCluster;

    fn parse(&self, raw: &[u8]) -> Result<Kubeconfig> {
        let text = std::str::from_utf8(raw)
            .map_err(|e| Error::BootstrapParse(format!("kubeconfig is not valid UTF-8: {}", e)))?;
        Kubeconfig::from_yaml(text).map_err(|e| Error::BootstrapParse(e.to_string()))
    }

    async fn connect(&self, kubeconfig: Kubeconfig) -> Result<KubeCluster> {
        let mut config = kube::Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
            .await
            .map_err(|e| Error::Internal(format!("Failed to create kube config: {}", e)))?;

        config.connect_timeout = Some(self.request_timeout);
        config.read_timeout = Some(self.request_timeout);
        config.write_timeout = Some(self.request_timeout);

        tracing::debug!(server = %config.cluster_url, "Building API client");
        let client = Client::try_from(config)
            .map_err(|e| Error::Internal(format!("Failed to create client: {}", e)))?;
        Ok(KubeCluster::new(client))
    }
}

/// Cluster API over a kube client
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn deployments(&self, namespace: &str) -> Api<Deployment> {
        Api::namespaced(self.client.clone(), namespace)
    }

    fn namespaces(&self) -> Api<Namespace> {
        Api::all(self.client.clone())
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn probe(&self) -> Result<()> {
        let accounts: Api<ServiceAccount> = Api::namespaced(self.client.clone(), PROBE_NAMESPACE);
        accounts
            .get(PROBE_SERVICE_ACCOUNT)
            .await
            .map_err(|e| remote_error("get serviceaccount default/default", e))?;
        Ok(())
    }

    async fn create_workload(&self, spec: &WorkloadSpec) -> Result<Workload> {
        let operation = format!("create deployment {}/{}", spec.namespace, spec.name);
        let created = self
            .deployments(&spec.namespace)
            .create(&PostParams::default(), &deployment_from_spec(spec, None))
            .await
            .map_err(|e| remote_error(&operation, e))?;
        Ok(workload_from_deployment(created))
    }

    async fn get_workload(&self, namespace: &str, name: &str) -> Result<Workload> {
        let operation = format!("get deployment {}/{}", namespace, name);
        let deployment = self
            .deployments(namespace)
            .get(name)
            .await
            .map_err(|e| remote_error(&operation, e))?;
        Ok(workload_from_deployment(deployment))
    }

    async fn update_workload(&self, workload: &Workload) -> Result<Workload> {
        let spec = &workload.spec;
        let operation = format!("update deployment {}/{}", spec.namespace, spec.name);
        let replaced = self
            .deployments(&spec.namespace)
            .replace(
                &spec.name,
                &PostParams::default(),
                &deployment_from_spec(spec, workload.resource_version.clone()),
            )
            .await
            .map_err(|e| remote_error(&operation, e))?;
        Ok(workload_from_deployment(replaced))
    }

    async fn create_namespace(&self, name: &str) -> Result<()> {
        let namespace = Namespace {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        self.namespaces()
            .create(&PostParams::default(), &namespace)
            .await
            .map_err(|e| remote_error(&format!("create namespace {}", name), e))?;
        Ok(())
    }

    async fn delete_namespace(&self, name: &str) -> Result<()> {
        self.namespaces()
            .delete(name, &DeleteParams::default())
            .await
            .map_err(|e| remote_error(&format!("delete namespace {}", name), e))?;
        Ok(())
    }
}

fn remote_error(operation: &str, err: kube::Error) -> Error {
    match err {
        kube::Error::Api(response) => Error::remote_call(
            operation,
            Some(response.code),
            format!("{} ({})", response.message, response.reason),
        ),
        other => Error::remote_call(operation, None, other.to_string()),
    }
}

fn deployment_from_spec(spec: &WorkloadSpec, resource_version: Option<String>) -> Deployment {
    Deployment {
        metadata: ObjectMeta {
            name: Some(spec.name.clone()),
            namespace: Some(spec.namespace.clone()),
            resource_version,
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(spec.replicas),
            selector: LabelSelector {
                match_labels: Some(spec.labels.clone()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(spec.labels.clone()),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: spec.container.clone(),
                        image: Some(spec.image.clone()),
                        ..Default::default()
                    }],
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn workload_from_deployment(deployment: Deployment) -> Workload {
    let metadata = deployment.metadata;
    let spec = deployment.spec.unwrap_or_default();
    let first_container = spec
        .template
        .spec
        .and_then(|pod| pod.containers.into_iter().next())
        .unwrap_or_default();

    Workload {
        spec: WorkloadSpec {
            namespace: metadata.namespace.unwrap_or_default(),
            name: metadata.name.unwrap_or_default(),
            labels: spec.selector.match_labels.unwrap_or_else(BTreeMap::new),
            container: first_container.name,
            image: first_container.image.unwrap_or_default(),
            // API server default when unset
            replicas: spec.replicas.unwrap_or(1),
        },
        status: WorkloadStatus {
            ready_replicas: deployment
                .status
                .and_then(|s| s.ready_replicas)
                .unwrap_or(0),
        },
        resource_version: metadata.resource_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::apps::v1::DeploymentStatus;

    fn spec() -> WorkloadSpec {
        WorkloadSpec {
            namespace: "default".to_string(),
            name: "example-deployment".to_string(),
            labels: BTreeMap::from([("app".to_string(), "example".to_string())]),
            container: "nginx".to_string(),
            image: "nginx".to_string(),
            replicas: 2,
        }
    }

    #[test]
    fn test_deployment_selector_matches_template() {
        let deployment = deployment_from_spec(&spec(), Some("42".to_string()));
        let dspec = deployment.spec.unwrap();
        assert_eq!(dspec.replicas, Some(2));
        assert_eq!(
            dspec.selector.match_labels,
            dspec.template.metadata.unwrap().labels
        );
        assert_eq!(deployment.metadata.resource_version.as_deref(), Some("42"));
        let containers = dspec.template.spec.unwrap().containers;
        assert_eq!(containers.len(), 1);
        assert_eq!(containers[0].image.as_deref(), Some("nginx"));
    }

    #[test]
    fn test_workload_reads_status_from_cluster() {
        let mut deployment = deployment_from_spec(&spec(), Some("7".to_string()));
        deployment.status = Some(DeploymentStatus {
            ready_replicas: Some(1),
            ..Default::default()
        });

        let workload = workload_from_deployment(deployment);
        assert_eq!(workload.spec, spec());
        assert_eq!(workload.status.ready_replicas, 1);
        assert_eq!(workload.resource_version.as_deref(), Some("7"));
    }

    #[test]
    fn test_missing_status_means_nothing_ready() {
        let workload = workload_from_deployment(deployment_from_spec(&spec(), None));
        assert_eq!(workload.status.ready_replicas, 0);
    }

    #[test]
    fn test_parse_rejects_malformed_kubeconfig() {
        let connector = KubeConnector::new(Duration::from_secs(60));
        assert!(matches!(
            connector.parse(b"clusters: [this is: not, valid"),
            Err(Error::BootstrapParse(_))
        ));
        assert!(matches!(
            connector.parse(&[0xff, 0xfe, 0x00]),
            Err(Error::BootstrapParse(_))
        ));
    }

    #[test]
    fn test_parse_accepts_kubeconfig() {
        let connector = KubeConnector::new(Duration::from_secs(60));
        let kubeconfig = connector
            .parse(
                br#"
apiVersion: v1
kind: Config
clusters:
- name: vcluster
  cluster:
    server: https://127.0.0.1:14550
    insecure-skip-tls-verify: true
contexts:
- name: vcluster
  context:
    cluster: vcluster
    user: vcluster
current-context: vcluster
users:
- name: vcluster
  user:
    token: abc
"#,
            )
            .unwrap();
        assert_eq!(kubeconfig.current_context.as_deref(), Some("vcluster"));
        assert_eq!(kubeconfig.clusters.len(), 1);
    }

    #[test]
    fn test_api_errors_keep_status_code() {
        let err = remote_error(
            "get serviceaccount default/default",
            kube::Error::Api(kube::error::ErrorResponse {
                status: "Failure".to_string(),
                message: "Unauthorized".to_string(),
                reason: "Unauthorized".to_string(),
                code: 401,
            }),
        );
        assert!(err.is_auth_rejection());
        assert!(err.to_string().starts_with("get serviceaccount default/default failed"));
    }
}
