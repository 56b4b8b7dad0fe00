//! Command-line front end.

pub mod probe;
pub mod run;

use anyhow::{anyhow, Result};
use clap::Args;
use log::info;
use std::path::PathBuf;

use vmfleet::config::{
    HostDescriptor, HostInventory, HostKeyPolicy, RunSettings, DEFAULT_ROUTE_TOOL,
};
use vmfleet::remote::RouteResolver;

/// Flags shared by every subcommand that talks to the fleet.
#[derive(Args, Debug)]
pub struct FleetArgs {
    #[arg(
        long,
        default_value = ".",
        help = "Project root shipped to every host (outputs land in <root>/builds)"
    )]
    pub project_root: PathBuf,

    #[arg(long, help = "Script to run (default: <root>/build_system/script.sh)")]
    pub script: Option<PathBuf>,

    #[arg(long, help = "Host inventory (default: <root>/build_machine.json)")]
    pub hosts: Option<PathBuf>,

    #[arg(long, help = "Skip route resolution")]
    pub no_route: bool,

    #[arg(long, default_value = DEFAULT_ROUTE_TOOL, help = "Route discovery tool")]
    pub route_tool: PathBuf,

    #[arg(
        long,
        default_value_t = HostKeyPolicy::AcceptAny,
        help = "Host key policy: accept-any or known-hosts"
    )]
    pub host_key_policy: HostKeyPolicy,

    #[arg(long, default_value = "30", help = "SSH connect timeout in seconds")]
    pub connect_timeout: u64,

    #[arg(long = "exclude", help = "Extra pattern excluded from the project sync (repeatable)")]
    pub excludes: Vec<String>,
}

impl FleetArgs {
    /// Builds and validates the run settings.
    pub fn settings(&self) -> Result<RunSettings> {
        let mut settings = RunSettings::new(&self.project_root)
            .with_host_key_policy(self.host_key_policy)
            .with_connect_timeout(self.connect_timeout)
            .with_extra_excludes(self.excludes.clone())
            .with_route_tool(if self.no_route {
                None
            } else {
                Some(self.route_tool.clone())
            });

        if let Some(script) = &self.script {
            settings = settings.with_script(script);
        }
        if let Some(hosts) = &self.hosts {
            settings = settings.with_inventory(hosts);
        }

        Ok(settings.validate()?)
    }

    /// Loads the inventory and keeps only the usable entries.
    pub fn load_hosts(&self, settings: &RunSettings) -> Result<Vec<HostDescriptor>> {
        let inventory = HostInventory::load_from(&settings.inventory)?;
        let (valid, skipped) = inventory.partition_valid();

        if !skipped.is_empty() {
            info!("Skipped {} of {} host entries", skipped.len(), inventory.len());
        }

        if valid.is_empty() {
            return Err(anyhow!(
                "No valid host configurations found in {}",
                settings.inventory.display()
            ));
        }

        Ok(valid)
    }

    pub fn resolver(&self, settings: &RunSettings) -> RouteResolver {
        RouteResolver::new(settings.route_tool.clone())
    }
}
