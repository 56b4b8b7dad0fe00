//! Remote execution infrastructure for fleet runs.
//!
//! This module provides everything needed to run one script across many
//! machines over SSH: best-effort route resolution, identity probing, the
//! session abstraction over command execution and rsync transfers, the
//! per-host lifecycle and the concurrent fan-out across the fleet.

pub mod diagnostics;
pub mod executor;
pub mod identity;
pub mod orchestrator;
pub mod route;
pub mod runner;
pub mod session;
pub mod transfer;

pub use executor::SSHExecutor;
pub use identity::{probe_identity, HostIdentity, IDENTITY_QUERY};
pub use orchestrator::{FleetOrchestrator, ProbeResult};
pub use route::{ResolvedHost, RouteResolver};
pub use runner::{HostRunResult, HostRunner, RunOutcome, RunnerState};
pub use session::{
    CommandOutput, RemoteSession, SessionFactory, SessionTarget, SshSession, SshSessionFactory,
};
pub use transfer::RsyncTransfer;
