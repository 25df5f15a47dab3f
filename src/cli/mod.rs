//! CLI command handling
//!
//! Wires configuration, the tunnel, the kube connector and the reporter
//! together for each command.

use std::path::Path;
use std::sync::Arc;

use colored::Colorize;
use tokio_util::sync::CancellationToken;

use crate::bootstrap::{BootstrapOptions, Bootstrapper};
use crate::cluster::KubeConnector;
use crate::commands::{Commands, TargetArgs};
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::report::{ConsoleReporter, NullReporter, Reporter, RunReport};
use crate::scenario::{ScenarioKind, ScenarioRunner};
use crate::tunnel::{Target, VclusterTunnel};

/// Dispatch a CLI command
pub async fn dispatch(command: Commands, config_path: Option<&Path>, verbose: bool) -> Result<()> {
    match command {
        Commands::Scenarios => {
            for scenario in ScenarioKind::ALL {
                println!("{:<22} {}", scenario.name().bold(), scenario.description());
            }
            Ok(())
        }

        Commands::Connect { target } => {
            let config = Config::load(config_path)?;
            let target = resolve_target(&config, target)?;
            let reporter: Arc<dyn Reporter> = Arc::new(ConsoleReporter::new(verbose));
            let cancel = cancel_on_ctrl_c();

            let bootstrapper = build_bootstrapper(&config, reporter)?;
            let connection = bootstrapper.connect(&target, &cancel).await?;
            println!(
                "  {} API server reachable on 127.0.0.1:{}",
                "✓".green(),
                target.local_port
            );

            connection.close().await
        }

        Commands::Run { target, only, json } => {
            let config = Config::load(config_path)?;
            let target = resolve_target(&config, target)?;
            let reporter: Arc<dyn Reporter> = if json {
                Arc::new(NullReporter)
            } else {
                Arc::new(ConsoleReporter::new(verbose))
            };
            let cancel = cancel_on_ctrl_c();

            let bootstrapper = build_bootstrapper(&config, reporter.clone())?;
            let connection = bootstrapper.connect(&target, &cancel).await?;

            let runner = ScenarioRunner::new(
                connection.client(),
                config.workload.clone(),
                config.timeouts.convergence_poll(),
                reporter,
            );
            let report = runner.run(&target, &only, &cancel).await;
            drop(runner);

            let released = connection.close().await;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                report.print_summary();
            }

            run_result(&report, released)
        }
    }
}

/// Exit status of `run`: a scenario failure wins over cancellation, which
/// wins over a release error
fn run_result(report: &RunReport, released: Result<()>) -> Result<()> {
    if let Some((scenario, message)) = report.first_failure() {
        if let Err(e) = released {
            tracing::warn!(error = %e, "Failed to release connection");
        }
        return Err(Error::ScenarioFailed {
            scenario: scenario.to_string(),
            message: message.to_string(),
        });
    }
    if !report.passed() {
        if let Err(e) = released {
            tracing::warn!(error = %e, "Failed to release connection");
        }
        return Err(Error::Cancelled("running scenarios".to_string()));
    }
    released
}

fn resolve_target(config: &Config, args: TargetArgs) -> Result<Target> {
    config.resolve_target(args.namespace, args.name, args.local_port)
}

fn build_bootstrapper(
    config: &Config,
    reporter: Arc<dyn Reporter>,
) -> Result<Bootstrapper<VclusterTunnel, KubeConnector>> {
    let tunnel = VclusterTunnel::from_config(&config.tunnel)?;
    let connector = KubeConnector::new(config.timeouts.request_timeout());
    Ok(Bootstrapper::new(
        tunnel,
        connector,
        BootstrapOptions::from_config(config),
        reporter,
    ))
}

/// Token cancelled on Ctrl-C, so polls unwind and resources are released
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling run");
            trigger.cancel();
        }
    });
    token
}
