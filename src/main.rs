use clap::{Parser, Subcommand};
use std::process;

mod cli;

use cli::probe::ProbeCommand;
use cli::run::RunCommand;

#[derive(Parser)]
#[command(name = "vmfleet")]
#[command(about = "Run one build script across a fleet of remote machines and collect their exports", long_about = None)]
struct Cli {
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    Run(RunCommand),
    Probe(ProbeCommand),
}

fn main() {
    let cli = Cli::parse();

    // INFO by default, DEBUG with --verbose; RUST_LOG still wins.
    let default_level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    let result = match cli.command {
        Commands::Run(cmd) => cmd.execute(),
        Commands::Probe(cmd) => cmd.execute(),
    };

    match result {
        Ok(code) => process::exit(code),
        Err(e) => {
            eprintln!("✗ {:#}", e);
            process::exit(1);
        }
    }
}
