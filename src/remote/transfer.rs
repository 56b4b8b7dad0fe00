//! rsync-based transfer of project trees and exports between machines.
//!
//! Every transfer runs `sshpass -e rsync -a` with the host password passed
//! through the `SSHPASS` environment variable, never on the command line.
//! Transfers are additive: nothing on the receiving side is deleted.

use crate::config::HostKeyPolicy;
use crate::error::{Error, Result};
use crate::remote::diagnostics::{diagnose_missing_tool, diagnose_transfer_failure};
use crate::remote::session::SessionTarget;
use log::debug;
use std::path::Path;
use std::process::Command;
use std::time::Duration;

/// Handles rsync transfers to/from one remote machine.
pub struct RsyncTransfer {
    target: SessionTarget,
    policy: HostKeyPolicy,
    timeout: Duration,
}

impl RsyncTransfer {
    /// Create a new rsync transfer handler for the given remote.
    pub fn new(target: SessionTarget, policy: HostKeyPolicy, timeout: Duration) -> Self {
        Self {
            target,
            policy,
            timeout,
        }
    }

    /// Copy the contents of `local_dir` into `remote_dir`.
    pub fn push_tree(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Result<()> {
        self.run_rsync(&self.push_tree_args(local_dir, remote_dir, excludes))
    }

    /// Copy one file into `remote_dir`.
    pub fn push_file(&self, local_file: &Path, remote_dir: &str) -> Result<()> {
        self.run_rsync(&self.push_file_args(local_file, remote_dir))
    }

    /// Merge the contents of `remote_dir` into `local_dir`.
    pub fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        self.run_rsync(&self.pull_tree_args(remote_dir, local_dir))
    }

    fn push_tree_args(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Vec<String> {
        let mut args = Vec::new();
        for pattern in excludes {
            args.push("--exclude".to_string());
            args.push(pattern.clone());
        }
        // Trailing slash: copy the directory's contents, not the directory itself.
        args.push(ensure_trailing_slash(&local_dir.display().to_string()));
        args.push(self.remote_path(remote_dir));
        args
    }

    fn push_file_args(&self, local_file: &Path, remote_dir: &str) -> Vec<String> {
        vec![
            local_file.display().to_string(),
            self.remote_path(&ensure_trailing_slash(remote_dir)),
        ]
    }

    fn pull_tree_args(&self, remote_dir: &str, local_dir: &Path) -> Vec<String> {
        vec![
            self.remote_path(&ensure_trailing_slash(remote_dir)),
            ensure_trailing_slash(&local_dir.display().to_string()),
        ]
    }

    /// `user@host:path` as understood by rsync.
    fn remote_path(&self, path: &str) -> String {
        format!("{}:{}", self.target.address, path)
    }

    /// The `ssh` invocation rsync uses as its remote shell.
    fn build_ssh_command_string(&self) -> String {
        let mut parts = vec!["ssh".to_string()];

        // sshpass answers the password prompt, so batch mode must stay off.
        parts.push("-o".to_string());
        parts.push("BatchMode=no".to_string());

        parts.push("-o".to_string());
        parts.push(format!("ConnectTimeout={}", self.timeout.as_secs().max(1)));

        match self.policy {
            HostKeyPolicy::AcceptAny => {
                parts.push("-o".to_string());
                parts.push("StrictHostKeyChecking=no".to_string());
                parts.push("-o".to_string());
                parts.push("UserKnownHostsFile=/dev/null".to_string());
            }
            HostKeyPolicy::KnownHosts => {
                parts.push("-o".to_string());
                parts.push("StrictHostKeyChecking=yes".to_string());
            }
        }

        if self.target.port != 22 {
            parts.push("-p".to_string());
            parts.push(self.target.port.to_string());
        }

        parts.join(" ")
    }

    /// Full argument vector for `sshpass`, ending with the caller's arguments.
    fn build_args(&self, transfer_args: &[String]) -> Vec<String> {
        let mut args = vec![
            "-e".to_string(),
            "rsync".to_string(),
            "-a".to_string(),
            "-e".to_string(),
            self.build_ssh_command_string(),
        ];
        args.extend(transfer_args.iter().cloned());
        args
    }

    /// Runs one rsync transfer to completion.
    fn run_rsync(&self, transfer_args: &[String]) -> Result<()> {
        let args = self.build_args(transfer_args);
        debug!("Running sshpass {}", args.join(" "));

        let output = Command::new("sshpass")
            .args(&args)
            .env("SSHPASS", &self.target.secret)
            .output()
            .map_err(|e| Error::transport(diagnose_missing_tool("sshpass", &e.to_string())))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let stdout = String::from_utf8_lossy(&output.stdout);
            return Err(Error::transport_with_output(
                diagnose_transfer_failure(
                    output.status.code(),
                    &stderr,
                    &self.target.address.host,
                ),
                stdout,
            ));
        }

        Ok(())
    }
}

/// Ensure a path ends with `/` (rsync convention for syncing directory contents).
fn ensure_trailing_slash(path: &str) -> String {
    if path.ends_with('/') {
        path.to_string()
    } else {
        format!("{}/", path)
    }
}
