//! Runs the script on every configured host and collects the exports.

use anyhow::Result;
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

use super::FleetArgs;
use vmfleet::remote::{FleetOrchestrator, SshSessionFactory};
use vmfleet::report::RunReport;

#[derive(Args)]
#[command(about = "Run the script on every host and pull back its exports")]
pub struct RunCommand {
    #[command(flatten)]
    pub fleet: FleetArgs,

    #[arg(long, help = "Output results as JSON")]
    pub json: bool,
}

impl RunCommand {
    /// Returns the process exit code.
    pub fn execute(self) -> Result<i32> {
        let settings = self.fleet.settings()?;
        let hosts = self.fleet.load_hosts(&settings)?;

        let factory = SshSessionFactory::new(
            settings.host_key_policy,
            Duration::from_secs(settings.connect_timeout),
        );
        let orchestrator =
            FleetOrchestrator::new(&settings, &factory, self.fleet.resolver(&settings));

        let progress = if self.json || !console::Term::stderr().is_term() {
            ProgressBar::hidden()
        } else {
            let pb = ProgressBar::new(hosts.len() as u64);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")?
                    .progress_chars("#>-"),
            );
            pb
        };

        let mut passed = 0;
        let mut failed = 0;
        let results = orchestrator.run(hosts, |result| {
            if result.is_success() {
                passed += 1;
            } else {
                failed += 1;
            }
            progress.inc(1);
            progress.set_message(format!("✓{} ✗{}", passed, failed));
        })?;
        progress.finish_and_clear();

        let report = RunReport::new(results);
        if self.json {
            println!("{}", serde_json::to_string_pretty(&report.summary())?);
        } else {
            println!("\n{}", report.render());
        }

        Ok(report.exit_code())
    }
}
