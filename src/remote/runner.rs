//! The per-host lifecycle.
//!
//! Each host moves through a fixed sequence of states:
//!
//! ```text
//! INIT → WORKSPACE_CREATED → TREE_SYNCED → SCRIPT_SYNCED → EXECUTED
//!      → OUTPUT_VERIFIED → OUTPUT_PULLED → CLEANED → DONE
//! ```
//!
//! Any step may fail, which is terminal for that host: the result becomes
//! [`RunOutcome::Failed`] and records the last state reached. A panic inside
//! the lifecycle is caught here and reported the same way. The remote
//! workspace is removed only when every step succeeded; on failure it is left
//! in place and its path is attached to the result for inspection.

use log::{info, warn};
use serde::Serialize;
use std::fmt;
use std::fs;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use uuid::Uuid;

use crate::config::{RunSettings, EXPORTS_DIR, RUN_LOG};
use crate::error::{Error, FailureKind, Result};
use crate::remote::diagnostics::diagnose_command_failure;
use crate::remote::identity::probe_identity;
use crate::remote::orchestrator::panic_message;
use crate::remote::route::ResolvedHost;
use crate::remote::session::{shell_escape, RemoteSession, SessionFactory, SessionTarget};

/// Parent directory of every remote workspace
pub const REMOTE_TMP: &str = "/tmp";

/// Prefix of every remote workspace name
pub const WORKSPACE_PREFIX: &str = "vm_runner_";

/// Printed by the export check when the exports directory exists.
pub const EXPORTS_PRESENT: &str = "yes";

/// Printed by the export check when the exports directory is missing.
pub const EXPORTS_ABSENT: &str = "no";

/// Lifecycle states of one host run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RunnerState {
    #[default]
    Init,
    WorkspaceCreated,
    TreeSynced,
    ScriptSynced,
    Executed,
    OutputVerified,
    OutputPulled,
    Cleaned,
    Done,
}

impl fmt::Display for RunnerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunnerState::Init => "INIT",
            RunnerState::WorkspaceCreated => "WORKSPACE_CREATED",
            RunnerState::TreeSynced => "TREE_SYNCED",
            RunnerState::ScriptSynced => "SCRIPT_SYNCED",
            RunnerState::Executed => "EXECUTED",
            RunnerState::OutputVerified => "OUTPUT_VERIFIED",
            RunnerState::OutputPulled => "OUTPUT_PULLED",
            RunnerState::Cleaned => "CLEANED",
            RunnerState::Done => "DONE",
        };
        write!(f, "{}", name)
    }
}

/// Terminal outcome of one host run.
#[derive(Debug)]
pub enum RunOutcome {
    Success {
        output_dir: PathBuf,
    },
    Failed {
        error: Error,
        /// Remote workspace left behind, if one was allocated
        workspace: Option<String>,
        /// Last state reached before the failure
        last_state: RunnerState,
    },
}

/// Result of one host run, produced once and never modified.
#[derive(Debug)]
pub struct HostRunResult {
    /// Identity label, if the probe got that far
    pub label: Option<String>,
    /// Address the host was contacted at
    pub address: String,
    /// Inventory address, when route resolution replaced it
    pub original_address: Option<String>,
    pub outcome: RunOutcome,
}

impl HostRunResult {
    pub fn success(label: String, address: String, output_dir: PathBuf) -> Self {
        Self {
            label: Some(label),
            address,
            original_address: None,
            outcome: RunOutcome::Success { output_dir },
        }
    }

    pub fn failed(
        label: Option<String>,
        address: String,
        error: Error,
        workspace: Option<String>,
        last_state: RunnerState,
    ) -> Self {
        Self {
            label,
            address,
            original_address: None,
            outcome: RunOutcome::Failed {
                error,
                workspace,
                last_state,
            },
        }
    }

    /// Records the inventory address a rewritten route replaced.
    pub fn with_original_address(mut self, original: Option<String>) -> Self {
        self.original_address = original;
        self
    }

    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Success { .. })
    }

    /// `DONE` for a success, otherwise the state reached before failing.
    pub fn last_state(&self) -> RunnerState {
        match &self.outcome {
            RunOutcome::Success { .. } => RunnerState::Done,
            RunOutcome::Failed { last_state, .. } => *last_state,
        }
    }

    /// Identity label, or the raw address when no identity was obtained.
    pub fn display_name(&self) -> &str {
        self.label.as_deref().unwrap_or(&self.address)
    }

    pub fn output_dir(&self) -> Option<&Path> {
        match &self.outcome {
            RunOutcome::Success { output_dir } => Some(output_dir),
            RunOutcome::Failed { .. } => None,
        }
    }

    pub fn workspace(&self) -> Option<&str> {
        match &self.outcome {
            RunOutcome::Failed { workspace, .. } => workspace.as_deref(),
            RunOutcome::Success { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match &self.outcome {
            RunOutcome::Failed { error, .. } => Some(error),
            RunOutcome::Success { .. } => None,
        }
    }

    pub fn failure_kind(&self) -> Option<FailureKind> {
        self.error().map(Error::kind)
    }
}

/// Returns a fresh, collision-free workspace path.
pub fn allocate_workspace() -> String {
    format!("{}/{}{}", REMOTE_TMP, WORKSPACE_PREFIX, Uuid::new_v4().simple())
}

/// Command creating the workspace.
pub fn create_workspace_command(workspace: &str) -> String {
    format!("mkdir -p {}", shell_escape(workspace))
}

/// Command making the script executable and running it with abort-on-error.
pub fn execute_script_command(workspace: &str, script_name: &str) -> String {
    let script = shell_escape(&format!("{}/{}", workspace, script_name));
    format!(
        "chmod +x {} && cd {} && bash -e {}",
        script,
        shell_escape(workspace),
        script
    )
}

/// Command printing [`EXPORTS_PRESENT`] or [`EXPORTS_ABSENT`].
pub fn check_exports_command(workspace: &str) -> String {
    format!(
        "test -d {} && echo {} || echo {}",
        shell_escape(&exports_path(workspace)),
        EXPORTS_PRESENT,
        EXPORTS_ABSENT
    )
}

/// Command removing the workspace.
pub fn cleanup_workspace_command(workspace: &str) -> String {
    format!("rm -rf {}", shell_escape(workspace))
}

pub fn exports_path(workspace: &str) -> String {
    format!("{}/{}", workspace, EXPORTS_DIR)
}

/// How far a host got, kept outside the lifecycle so a panic can still be
/// reported with its label, workspace and last state.
#[derive(Debug, Default)]
struct Progress {
    label: Option<String>,
    workspace: Option<String>,
    state: RunnerState,
}

/// Drives the lifecycle of a single host.
pub struct HostRunner<'a> {
    settings: &'a RunSettings,
    factory: &'a dyn SessionFactory,
}

impl<'a> HostRunner<'a> {
    pub fn new(settings: &'a RunSettings, factory: &'a dyn SessionFactory) -> Self {
        Self { settings, factory }
    }

    /// Validates the host entry and opens a session without network activity.
    pub fn open_session(&self, host: &ResolvedHost) -> Result<Box<dyn RemoteSession>> {
        let address = host.descriptor.validate()?;
        self.factory.open(&SessionTarget {
            address,
            secret: host.descriptor.secret.clone(),
            port: host.descriptor.port,
        })
    }

    /// Runs the full lifecycle for `host`. Every error, and any panic raised
    /// along the way, becomes a failed result.
    pub fn run(&self, host: &ResolvedHost) -> HostRunResult {
        let address = host.address().to_string();
        let mut progress = Progress::default();

        let result = catch_unwind(AssertUnwindSafe(|| self.run_tracked(host, &mut progress)))
            .unwrap_or_else(|panic| {
                let error = Error::Unclassified(format!(
                    "Unhandled error in host task: {}",
                    panic_message(panic.as_ref())
                ));
                match progress.workspace.take() {
                    Some(workspace) => Self::finish_failure(
                        progress.label.take().unwrap_or_else(|| address.clone()),
                        address.clone(),
                        workspace,
                        error,
                        progress.state,
                    ),
                    None => {
                        warn!("[{}] ✗ {}", address, error);
                        HostRunResult::failed(
                            progress.label.take(),
                            address.clone(),
                            error,
                            None,
                            progress.state,
                        )
                    }
                }
            });

        result.with_original_address(host.original_address.clone())
    }

    fn run_tracked(&self, host: &ResolvedHost, progress: &mut Progress) -> HostRunResult {
        let address = host.address().to_string();

        let session = match self.open_session(host) {
            Ok(session) => session,
            Err(e) => {
                warn!("[{}] ✗ Rejected: {}", address, e);
                return HostRunResult::failed(None, address, e, None, RunnerState::Init);
            }
        };

        let label = match probe_identity(session.as_ref()) {
            Ok(identity) => identity.label(),
            Err(e) => {
                warn!("[{}] ✗ {}", address, e);
                return HostRunResult::failed(None, address, e, None, RunnerState::Init);
            }
        };
        progress.label = Some(label.clone());

        let workspace = allocate_workspace();
        progress.workspace = Some(workspace.clone());
        let output_dir = self.settings.output_dir_for(&label);
        info!("[{}] Starting → workspace: {}", label, workspace);

        let steps = self.run_steps(
            session.as_ref(),
            &label,
            &workspace,
            &output_dir,
            &mut progress.state,
        );

        match steps {
            Ok(()) => self.finish_success(
                session.as_ref(),
                label,
                address,
                workspace,
                output_dir,
                &mut progress.state,
            ),
            Err(e) => Self::finish_failure(label, address, workspace, e, progress.state),
        }
    }

    /// Everything up to and including the local log write.
    fn run_steps(
        &self,
        session: &dyn RemoteSession,
        label: &str,
        workspace: &str,
        output_dir: &Path,
        state: &mut RunnerState,
    ) -> Result<()> {
        let created = session.exec(&create_workspace_command(workspace))?;
        if !created.is_success() {
            return Err(Error::transport_with_output(
                format!("Failed to create workspace {}", workspace),
                created.combined(),
            ));
        }
        *state = RunnerState::WorkspaceCreated;

        info!("[{}] Syncing project root...", label);
        session.push_tree(
            &self.settings.project_root,
            workspace,
            &self.settings.exclude_patterns(),
        )?;
        *state = RunnerState::TreeSynced;

        let script_name = self.settings.script_name();
        info!("[{}] Sending script: {}", label, script_name);
        session.push_file(&self.settings.script, workspace)?;
        *state = RunnerState::ScriptSynced;

        info!("[{}] Executing {}...", label, script_name);
        let command = execute_script_command(workspace, &script_name);
        let run = session.exec(&command)?;
        if !run.is_success() {
            return Err(Error::transport_with_output(
                diagnose_command_failure(run.exit_code, &command, label),
                run.combined(),
            ));
        }
        let script_output = run.combined();
        *state = RunnerState::Executed;

        let check = session.exec(&check_exports_command(workspace))?;
        if check.stdout.trim() != EXPORTS_PRESENT {
            return Err(Error::ExportMissing {
                path: exports_path(workspace),
            });
        }
        *state = RunnerState::OutputVerified;

        fs::create_dir_all(output_dir)?;
        info!("[{}] Pulling {}/...", label, EXPORTS_DIR);
        session.pull_tree(&exports_path(workspace), output_dir)?;
        fs::write(output_dir.join(RUN_LOG), script_output)?;
        *state = RunnerState::OutputPulled;

        Ok(())
    }

    /// Success branch: the pull has returned, so the workspace can go.
    fn finish_success(
        &self,
        session: &dyn RemoteSession,
        label: String,
        address: String,
        workspace: String,
        output_dir: PathBuf,
        state: &mut RunnerState,
    ) -> HostRunResult {
        let cleanup = session
            .exec(&cleanup_workspace_command(&workspace))
            .and_then(|out| {
                if out.is_success() {
                    Ok(())
                } else {
                    Err(Error::transport_with_output(
                        format!("Failed to remove workspace {}", workspace),
                        out.combined(),
                    ))
                }
            });

        match cleanup {
            Ok(()) => {
                *state = RunnerState::Cleaned;
                info!("[{}] ✓ Done → {}", label, output_dir.display());
                *state = RunnerState::Done;
                HostRunResult::success(label, address, output_dir)
            }
            Err(e) => Self::finish_failure(label, address, workspace, e, *state),
        }
    }

    /// Failure branch: cleanup is skipped and the workspace path recorded.
    fn finish_failure(
        label: String,
        address: String,
        workspace: String,
        error: Error,
        last_state: RunnerState,
    ) -> HostRunResult {
        warn!(
            "[{}] ✗ Failed after {}, workspace left at {} for debugging",
            label, last_state, workspace
        );
        HostRunResult::failed(Some(label), address, error, Some(workspace), last_state)
    }
}
