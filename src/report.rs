//! Summary of a completed batch.

use console::style;
use serde::Serialize;
use std::path::PathBuf;

use crate::error::FailureKind;
use crate::remote::diagnostics::indent_text;
use crate::remote::runner::{HostRunResult, RunOutcome, RunnerState};

/// Partitioned view of every host result in a batch.
pub struct RunReport {
    results: Vec<HostRunResult>,
}

/// Serializable form of one host result.
#[derive(Debug, Serialize)]
pub struct HostSummary {
    pub name: String,
    pub address: String,
    /// Inventory address, when a faster route was used instead
    #[serde(skip_serializing_if = "Option::is_none")]
    pub routed_from: Option<String>,
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<FailureKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_after: Option<RunnerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// JSON output for a whole batch.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub results: Vec<HostSummary>,
}

impl RunReport {
    pub fn new(results: Vec<HostRunResult>) -> Self {
        Self { results }
    }

    pub fn results(&self) -> &[HostRunResult] {
        &self.results
    }

    pub fn successes(&self) -> impl Iterator<Item = &HostRunResult> {
        self.results.iter().filter(|r| r.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &HostRunResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.successes().count()
    }

    pub fn failed(&self) -> usize {
        self.failures().count()
    }

    /// True only if at least one host ran and every host succeeded.
    pub fn is_success(&self) -> bool {
        self.attempted() > 0 && self.failed() == 0
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }

    /// Human-readable summary.
    pub fn render(&self) -> String {
        let mut out = String::from("=== Run Summary ===\n");

        if self.succeeded() > 0 {
            out.push_str("Successful:\n");
            for r in self.successes() {
                let output_dir = r
                    .output_dir()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                out.push_str(&format!(
                    "  {} {} ({}) → {}\n",
                    style("✓").green(),
                    r.display_name(),
                    contact_address(r),
                    output_dir
                ));
            }
        }

        if self.failed() > 0 {
            out.push_str("Failed:\n");
            for r in self.failures() {
                let tmp_hint = r
                    .workspace()
                    .map(|ws| format!(" (tmp: {})", ws))
                    .unwrap_or_default();
                out.push_str(&format!(
                    "  {} {}{}\n",
                    style("✗").red(),
                    r.display_name(),
                    tmp_hint
                ));
                let detail = r
                    .error()
                    .map(|e| e.detail())
                    .unwrap_or_else(|| "Unknown error".to_string());
                out.push_str(&indent_text(&detail, 6));
                out.push('\n');
            }
        }

        out.push_str(&format!(
            "\nTotal: {} succeeded, {} failed\n",
            self.succeeded(),
            self.failed()
        ));
        out
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            total: self.attempted(),
            succeeded: self.succeeded(),
            failed: self.failed(),
            results: self.results.iter().map(host_summary).collect(),
        }
    }
}

/// `address`, or `address via original` when the route was rewritten.
fn contact_address(r: &HostRunResult) -> String {
    match &r.original_address {
        Some(original) => format!("{} via {}", r.address, original),
        None => r.address.clone(),
    }
}

fn host_summary(r: &HostRunResult) -> HostSummary {
    let last_state = match &r.outcome {
        RunOutcome::Failed { last_state, .. } => Some(*last_state),
        RunOutcome::Success { .. } => None,
    };

    HostSummary {
        name: r.display_name().to_string(),
        address: r.address.clone(),
        routed_from: r.original_address.clone(),
        status: if r.is_success() { "success" } else { "failed" },
        output_dir: r.output_dir().map(PathBuf::from),
        workspace: r.workspace().map(str::to_string),
        error_kind: r.failure_kind(),
        failed_after: last_state,
        error: r.error().map(|e| e.detail()),
    }
}
