//! Probes each host's identity without running anything on it.

use anyhow::Result;
use clap::Args;
use console::style;
use std::time::Duration;

use super::FleetArgs;
use vmfleet::remote::{FleetOrchestrator, SshSessionFactory};

#[derive(Args)]
#[command(about = "Show the identity label each host would be collected under")]
pub struct ProbeCommand {
    #[command(flatten)]
    pub fleet: FleetArgs,
}

impl ProbeCommand {
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

        let results = orchestrator.probe(hosts, |result| match &result.identity {
            Ok(identity) => println!(
                "  {} {} → {}",
                style("✓").green(),
                result.address,
                identity.label()
            ),
            Err(e) => {
                println!("  {} {}", style("✗").red(), result.address);
                for line in e.detail().lines() {
                    println!("      {}", line);
                }
            }
        })?;

        let failed = results.iter().filter(|r| r.identity.is_err()).count();
        println!(
            "\nTotal: {} probed, {} failed",
            results.len() - failed,
            failed
        );

        Ok(if failed == 0 { 0 } else { 1 })
    }
}
