//! The remote session abstraction used by the per-host runner.
//!
//! A session bundles the two surfaces every host lifecycle needs: command
//! execution and bulk directory/file transfer. The production implementation
//! pairs the ssh2-based [`SSHExecutor`] with the rsync-based
//! [`RsyncTransfer`]; tests substitute an in-memory session.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use crate::config::{HostAddress, HostKeyPolicy};
use crate::error::Result;
use crate::remote::executor::SSHExecutor;
use crate::remote::transfer::RsyncTransfer;

/// Result of executing a remote command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,
    /// Standard error from the command
    pub stderr: String,
    /// Exit code (0 for success)
    pub exit_code: i32,
}

impl CommandOutput {
    /// Returns true if the command succeeded (exit code 0).
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }

    /// Stdout followed by stderr, for logs and failure details.
    pub fn combined(&self) -> String {
        let mut text = self.stdout.clone();
        if !self.stderr.is_empty() {
            if !text.is_empty() && !text.ends_with('\n') {
                text.push('\n');
            }
            text.push_str(&self.stderr);
        }
        text
    }
}

/// Where and how to authenticate a session.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionTarget {
    pub address: HostAddress,
    pub secret: String,
    pub port: u16,
}

impl fmt::Debug for SessionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionTarget")
            .field("address", &self.address.to_string())
            .field("secret", &"<redacted>")
            .field("port", &self.port)
            .finish()
    }
}

/// Command execution plus bidirectional sync against one remote host.
pub trait RemoteSession: Send {
    /// Runs `command` remotely. A non-zero exit is reported in the output, not
    /// as an error; errors mean the command could not be run at all.
    fn exec(&self, command: &str) -> Result<CommandOutput>;

    /// Copies the contents of `local_dir` into `remote_dir`, skipping paths
    /// matching `excludes`. Additive and permission-preserving.
    fn push_tree(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Result<()>;

    /// Copies a single file into `remote_dir`.
    fn push_file(&self, local_file: &Path, remote_dir: &str) -> Result<()>;

    /// Merges the contents of `remote_dir` into `local_dir`. Returns only once
    /// the transfer has fully completed.
    fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()>;
}

/// Opens sessions for hosts. Shared by every host task.
pub trait SessionFactory: Send + Sync {
    fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>>;
}

/// SSH command channel plus rsync transfer, both authenticated by password.
pub struct SshSession {
    executor: SSHExecutor,
    transfer: RsyncTransfer,
}

impl SshSession {
    pub fn new(target: SessionTarget, policy: HostKeyPolicy, timeout: Duration) -> Self {
        Self {
            executor: SSHExecutor::new(target.clone(), policy, timeout),
            transfer: RsyncTransfer::new(target, policy, timeout),
        }
    }
}

impl RemoteSession for SshSession {
    fn exec(&self, command: &str) -> Result<CommandOutput> {
        self.executor.execute(command)
    }

    fn push_tree(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Result<()> {
        self.transfer.push_tree(local_dir, remote_dir, excludes)
    }

    fn push_file(&self, local_file: &Path, remote_dir: &str) -> Result<()> {
        self.transfer.push_file(local_file, remote_dir)
    }

    fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        self.transfer.pull_tree(remote_dir, local_dir)
    }
}

/// Factory producing [`SshSession`]s with a fixed host key policy and timeout.
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    policy: HostKeyPolicy,
    timeout: Duration,
}

impl SshSessionFactory {
    pub fn new(policy: HostKeyPolicy, timeout: Duration) -> Self {
        Self { policy, timeout }
    }
}

impl SessionFactory for SshSessionFactory {
    fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>> {
        Ok(Box::new(SshSession::new(
            target.clone(),
            self.policy,
            self.timeout,
        )))
    }
}

/// Quotes a string for safe use in a remote POSIX shell command.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
