//! Run reporting
//!
//! Progress is handed to a [`Reporter`] owned by whoever starts the run,
//! rather than printed from inside the harness, so the same run can drive a
//! terminal, a test recorder, or nothing at all.

use std::time::Duration;

use colored::Colorize;
use serde::Serialize;

use crate::scenario::ScenarioKind;
use crate::tunnel::Target;

/// Receives progress events from the bootstrapper and the scenario runner
pub trait Reporter: Send + Sync {
    fn connecting(&self, _target: &Target) {}

    fn connected(&self, _target: &Target, _elapsed: Duration) {}

    fn scenario_started(&self, _scenario: ScenarioKind) {}

    /// A completed step inside a scenario
    fn step(&self, _scenario: ScenarioKind, _message: &str) {}

    fn scenario_finished(&self, _result: &ScenarioResult) {}
}

/// Discards all events
#[derive(Debug, Default, Clone, Copy)]
pub struct NullReporter;

impl Reporter for NullReporter {}

/// Prints colored progress to stdout
#[derive(Debug, Default, Clone, Copy)]
pub struct ConsoleReporter {
    verbose: bool,
}

impl ConsoleReporter {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl Reporter for ConsoleReporter {
    fn connecting(&self, target: &Target) {
        println!(
            "\n{} {} {}",
            "Connecting to".blue().bold(),
            target.to_string().white().bold(),
            format!("(local port {})", target.local_port).dimmed()
        );
    }

    fn connected(&self, _target: &Target, elapsed: Duration) {
        println!(
            "  {} Connected {}",
            "✓".green(),
            format!("({:.1}s)", elapsed.as_secs_f64()).dimmed()
        );
    }

    fn scenario_started(&self, scenario: ScenarioKind) {
        println!("\n{} {}", "Scenario:".cyan(), scenario.name().white().bold());
        if self.verbose {
            println!("  {}", scenario.description().dimmed());
        }
    }

    fn step(&self, _scenario: ScenarioKind, message: &str) {
        println!("  {} {}", "✓".green(), message.dimmed());
    }

    fn scenario_finished(&self, result: &ScenarioResult) {
        match &result.outcome {
            Outcome::Passed => println!(
                "  {} {} {}",
                "✓".green().bold(),
                "Passed".green(),
                format!("({} ms)", result.elapsed_ms).dimmed()
            ),
            Outcome::Failed { error } => println!("  {} {}", "✗".red().bold(), error.red()),
            Outcome::Skipped { reason } => {
                println!("  {} Skipped: {}", "-".yellow(), reason.dimmed())
            }
        }
    }
}

/// How a scenario ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Outcome {
    Passed,
    Failed { error: String },
    Skipped { reason: String },
}

/// Result of one scenario
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioResult {
    pub scenario: ScenarioKind,
    #[serde(flatten)]
    pub outcome: Outcome,
    pub elapsed_ms: u64,
}

impl ScenarioResult {
    pub fn passed(&self) -> bool {
        self.outcome == Outcome::Passed
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub target: Target,
    pub results: Vec<ScenarioResult>,
}

impl RunReport {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            results: Vec::new(),
        }
    }

    /// True when every scenario that ran passed and none were skipped
    pub fn passed(&self) -> bool {
        self.results.iter().all(ScenarioResult::passed)
    }

    /// The first failed scenario, which is what aborted the run
    pub fn first_failure(&self) -> Option<(ScenarioKind, &str)> {
        self.results.iter().find_map(|r| match &r.outcome {
            Outcome::Failed { error } => Some((r.scenario, error.as_str())),
            _ => None,
        })
    }

    pub fn count(&self, wanted: fn(&Outcome) -> bool) -> usize {
        self.results.iter().filter(|r| wanted(&r.outcome)).count()
    }

    /// Print a one-line summary in the console style
    pub fn print_summary(&self) {
        let passed = self.count(|o| matches!(o, Outcome::Passed));
        let failed = self.count(|o| matches!(o, Outcome::Failed { .. }));
        let skipped = self.count(|o| matches!(o, Outcome::Skipped { .. }));

        if self.passed() {
            println!(
                "\n{} {}\n",
                "✓".green().bold(),
                format!("All {} scenarios passed", passed).green().bold()
            );
        } else {
            println!(
                "\n{} {}\n",
                "✗".red().bold(),
                format!(
                    "{} passed, {} failed, {} skipped",
                    passed, failed, skipped
                )
                .red()
                .bold()
            );
        }
    }
}
