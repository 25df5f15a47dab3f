//! Scenario execution

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::{DeployedWorkload, Fixture, ScenarioKind};
use crate::cluster::{ClusterApi, WorkloadSpec};
use crate::common::config::WorkloadConfig;
use crate::common::{Error, Result};
use crate::poll::{poll_until, PollOptions, Readiness};
use crate::report::{Outcome, Reporter, RunReport, ScenarioResult};
use crate::tunnel::Target;

/// Runs scenarios against one connected cluster
pub struct ScenarioRunner<'a, A> {
    api: &'a A,
    workload: WorkloadConfig,
    poll: PollOptions,
    reporter: Arc<dyn Reporter>,
}

impl<'a, A: ClusterApi> ScenarioRunner<'a, A> {
    pub fn new(
        api: &'a A,
        workload: WorkloadConfig,
        poll: PollOptions,
        reporter: Arc<dyn Reporter>,
    ) -> Self {
        Self {
            api,
            workload,
            poll,
            reporter,
        }
    }

    /// Run the selected scenarios in their fixed order
    ///
    /// An empty selection runs everything. The first failure stops the run;
    /// remaining scenarios are reported as skipped. A cancelled scenario is
    /// reported as skipped too, so a cancelled run has no failure. Nothing on
    /// the cluster is rolled back.
    pub async fn run(
        &self,
        target: &Target,
        selection: &[ScenarioKind],
        cancel: &CancellationToken,
    ) -> RunReport {
        let mut report = RunReport::new(target.clone());
        let mut fixture = Fixture::default();
        let mut stop_reason: Option<String> = None;

        let selected = ScenarioKind::ALL
            .into_iter()
            .filter(|s| selection.is_empty() || selection.contains(s));

        for scenario in selected {
            if stop_reason.is_none() && cancel.is_cancelled() {
                stop_reason = Some("run cancelled".to_string());
            }
            if let Some(reason) = &stop_reason {
                let result = ScenarioResult {
                    scenario,
                    outcome: Outcome::Skipped {
                        reason: reason.clone(),
                    },
                    elapsed_ms: 0,
                };
                self.reporter.scenario_finished(&result);
                report.results.push(result);
                continue;
            }

            self.reporter.scenario_started(scenario);
            tracing::info!(scenario = %scenario, "Running scenario");
            let started = Instant::now();

            let outcome = match self.run_scenario(scenario, &mut fixture, cancel).await {
                Ok(()) => Outcome::Passed,
                // Interrupted, not failed
                Err(e) if e.is_cancelled() => {
                    tracing::warn!(scenario = %scenario, "Scenario interrupted");
                    let reason = "run cancelled".to_string();
                    stop_reason = Some(reason.clone());
                    Outcome::Skipped { reason }
                }
                Err(e) => {
                    tracing::error!(scenario = %scenario, error = %e, "Scenario failed");
                    stop_reason = Some(format!("{} failed", scenario));
                    Outcome::Failed {
                        error: e.to_string(),
                    }
                }
            };

            let result = ScenarioResult {
                scenario,
                outcome,
                elapsed_ms: started.elapsed().as_millis() as u64,
            };
            self.reporter.scenario_finished(&result);
            report.results.push(result);
        }

        report
    }

    /// Run one scenario, reading and updating the fixture
    pub async fn run_scenario(
        &self,
        scenario: ScenarioKind,
        fixture: &mut Fixture,
        cancel: &CancellationToken,
    ) -> Result<()> {
        match scenario {
            ScenarioKind::DeployWorkload => {
                fixture.workload = Some(self.deploy_workload(cancel).await?);
            }
            ScenarioKind::ScaleWorkload => {
                let deployed = match fixture.workload.clone() {
                    Some(deployed) => deployed,
                    None => self.adopt_workload().await?,
                };
                fixture.workload = Some(self.scale_workload(&deployed).await?);
            }
            ScenarioKind::NamespaceLifecycle => self.namespace_lifecycle().await?,
        }
        Ok(())
    }

    /// The workload the scenarios create
    pub fn workload_spec(&self) -> WorkloadSpec {
        let w = &self.workload;
        WorkloadSpec {
            namespace: w.namespace.clone(),
            name: w.name.clone(),
            labels: BTreeMap::from([("app".to_string(), w.app_label.clone())]),
            container: w.container.clone(),
            image: w.image.clone(),
            replicas: w.replicas,
        }
    }

    /// Create the workload and wait until all its replicas are ready
    pub async fn deploy_workload(&self, cancel: &CancellationToken) -> Result<DeployedWorkload> {
        let spec = self.workload_spec();
        let created = self.api.create_workload(&spec).await?;
        let deployed = DeployedWorkload::from_workload(&created);
        self.reporter.step(
            ScenarioKind::DeployWorkload,
            &format!(
                "Created deployment {} with {} replicas",
                deployed.key(),
                deployed.replicas
            ),
        );

        self.wait_for_ready_replicas(&deployed, cancel).await?;
        self.reporter.step(
            ScenarioKind::DeployWorkload,
            &format!("{} replicas ready", deployed.replicas),
        );
        Ok(deployed)
    }

    /// Poll until the cluster reports as many ready replicas as were requested
    ///
    /// Read errors count as not ready; the API server may be briefly busy.
    pub async fn wait_for_ready_replicas(
        &self,
        deployed: &DeployedWorkload,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let desired = deployed.replicas;
        let result = poll_until(self.poll, cancel, || async move {
            match self.api.get_workload(&deployed.namespace, &deployed.name).await {
                Ok(current) if current.status.ready_replicas == desired => Readiness::Ready(()),
                Ok(current) => Readiness::not_ready(format!(
                    "{}/{} replicas ready",
                    current.status.ready_replicas, desired
                )),
                Err(e) => Readiness::not_ready(e.to_string()),
            }
        })
        .await;

        result.map_err(|e| {
            let what = format!(
                "deployment {} to report {} ready replicas",
                deployed.key(),
                desired
            );
            e.into_error(&format!("waiting for {}", what), |waited, last| {
                Error::convergence_timeout(what.clone(), waited, last)
            })
        })
    }

    /// Raise the replica count and check the API server accepted it
    ///
    /// Does not wait for the new replicas to become ready.
    pub async fn scale_workload(&self, deployed: &DeployedWorkload) -> Result<DeployedWorkload> {
        let mut current = self
            .api
            .get_workload(&deployed.namespace, &deployed.name)
            .await?;
        let previous = current.spec.replicas;
        let requested = self.workload.scaled_replicas;
        current.spec.replicas = requested;

        let acknowledged = self.api.update_workload(&current).await?;
        if acknowledged.spec.replicas != requested {
            return Err(Error::TestAssertion(format!(
                "Deployment {} acknowledged {} replicas, expected {}",
                deployed.key(),
                acknowledged.spec.replicas,
                requested
            )));
        }

        self.reporter.step(
            ScenarioKind::ScaleWorkload,
            &format!(
                "Scaled deployment {} from {} to {} replicas",
                deployed.key(),
                previous,
                requested
            ),
        );
        Ok(DeployedWorkload::from_workload(&acknowledged))
    }

    /// Create the scratch namespace, then delete it
    pub async fn namespace_lifecycle(&self) -> Result<()> {
        let name = &self.workload.scratch_namespace;

        self.api.create_namespace(name).await?;
        self.reporter.step(
            ScenarioKind::NamespaceLifecycle,
            &format!("Created namespace {}", name),
        );

        self.api.delete_namespace(name).await?;
        self.reporter.step(
            ScenarioKind::NamespaceLifecycle,
            &format!("Deleted namespace {}", name),
        );
        Ok(())
    }

    /// Pick up a workload created by an earlier run, for scenarios run on their own
    pub async fn adopt_workload(&self) -> Result<DeployedWorkload> {
        let w = &self.workload;
        let existing = self.api.get_workload(&w.namespace, &w.name).await.map_err(|e| {
            if e.is_not_found() {
                Error::TestAssertion(format!(
                    "Deployment {}/{} does not exist. Run the {} scenario first",
                    w.namespace,
                    w.name,
                    ScenarioKind::DeployWorkload
                ))
            } else {
                e
            }
        })?;
        tracing::debug!(namespace = %w.namespace, name = %w.name, "Adopted existing deployment");
        Ok(DeployedWorkload::from_workload(&existing))
    }
}
