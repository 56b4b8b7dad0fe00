//! In-memory fleet used by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use tempfile::TempDir;
use vmfleet::config::RunSettings;
use vmfleet::error::{Error, Result};
use vmfleet::remote::{CommandOutput, RemoteSession, SessionFactory, SessionTarget, IDENTITY_QUERY};

/// How one fake machine behaves.
#[derive(Debug, Clone)]
pub struct FakeHost {
    pub identity: String,
    pub script_exit: i32,
    pub script_output: String,
    pub script_stderr: String,
    /// Written to stderr by every command, like a noisy login shell.
    pub shell_noise: String,
    /// Files present under `exports/` after the script ran; `None` means the
    /// directory was never created.
    pub exports: Option<Vec<(String, String)>>,
    pub reject_auth: bool,
    pub panic_on_script: bool,
    pub cleanup_exit: i32,
}

impl FakeHost {
    pub fn new(os: &str, version: &str, arch: &str) -> Self {
        Self {
            identity: format!("ID={}\nVERSION_ID=\"{}\"\n{}\nfake-{}\n", os, version, arch, os),
            script_exit: 0,
            script_output: "building...\ndone\n".to_string(),
            script_stderr: String::new(),
            shell_noise: String::new(),
            exports: Some(vec![("artifact.bin".to_string(), "payload".to_string())]),
            reject_auth: false,
            panic_on_script: false,
            cleanup_exit: 0,
        }
    }

    pub fn failing_script(mut self, exit: i32, output: &str) -> Self {
        self.script_exit = exit;
        self.script_output = output.to_string();
        self
    }

    pub fn script_stderr(mut self, stderr: &str) -> Self {
        self.script_stderr = stderr.to_string();
        self
    }

    pub fn noisy_shell(mut self, noise: &str) -> Self {
        self.shell_noise = noise.to_string();
        self
    }

    pub fn without_exports(mut self) -> Self {
        self.exports = None;
        self
    }

    pub fn rejecting_auth(mut self) -> Self {
        self.reject_auth = true;
        self
    }

    pub fn panicking(mut self) -> Self {
        self.panic_on_script = true;
        self
    }
}

/// Factory handing out sessions for a fixed set of fake machines, keyed by
/// network host.
#[derive(Default)]
pub struct FakeFactory {
    hosts: HashMap<String, FakeHost>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_host(mut self, host: &str, behavior: FakeHost) -> Self {
        self.hosts.insert(host.to_string(), behavior);
        self
    }

    /// Every call made so far, as `host: operation` lines.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, host: &str) -> Vec<String> {
        let prefix = format!("{}: ", host);
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix(&prefix).map(str::to_string))
            .collect()
    }
}

impl SessionFactory for FakeFactory {
    fn open(&self, target: &SessionTarget) -> Result<Box<dyn RemoteSession>> {
        let host = target.address.host.clone();
        self.calls.lock().unwrap().push(format!("{}: open", host));

        let behavior = self
            .hosts
            .get(&host)
            .cloned()
            .ok_or_else(|| Error::transport(format!("Connection refused by {}", host)))?;

        Ok(Box::new(FakeSession {
            host,
            behavior,
            calls: Arc::clone(&self.calls),
        }))
    }
}

pub struct FakeSession {
    host: String,
    behavior: FakeHost,
    calls: Arc<Mutex<Vec<String>>>,
}

impl FakeSession {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(format!("{}: {}", self.host, call));
    }
}

impl RemoteSession for FakeSession {
    fn exec(&self, command: &str) -> Result<CommandOutput> {
        if self.behavior.reject_auth {
            return Err(Error::transport(format!(
                "SSH authentication failed for {}",
                self.host
            )));
        }

        let noise = &self.behavior.shell_noise;

        if command == IDENTITY_QUERY {
            self.record("identity".to_string());
            return Ok(output(&self.behavior.identity, noise, 0));
        }

        self.record(format!("exec {}", command));

        if command.starts_with("mkdir -p ") {
            Ok(output("", noise, 0))
        } else if command.contains("bash -e ") {
            if self.behavior.panic_on_script {
                panic!("fake session crashed on {}", self.host);
            }
            Ok(output(
                &self.behavior.script_output,
                &format!("{}{}", noise, self.behavior.script_stderr),
                self.behavior.script_exit,
            ))
        } else if command.starts_with("test -d ") {
            let answer = if self.behavior.exports.is_some() {
                "yes\n"
            } else {
                "no\n"
            };
            Ok(output(answer, noise, 0))
        } else if command.starts_with("rm -rf ") {
            Ok(output("", noise, self.behavior.cleanup_exit))
        } else {
            Ok(output(
                "",
                &format!("unexpected command: {}", command),
                127,
            ))
        }
    }

    fn push_tree(&self, local_dir: &Path, remote_dir: &str, excludes: &[String]) -> Result<()> {
        assert!(local_dir.is_dir());
        self.record(format!("push_tree {} ({} excludes)", remote_dir, excludes.len()));
        Ok(())
    }

    fn push_file(&self, local_file: &Path, remote_dir: &str) -> Result<()> {
        let name = local_file
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.record(format!("push_file {} {}", name, remote_dir));
        Ok(())
    }

    fn pull_tree(&self, remote_dir: &str, local_dir: &Path) -> Result<()> {
        self.record(format!("pull_tree {}", remote_dir));
        for (name, contents) in self.behavior.exports.iter().flatten() {
            fs::write(local_dir.join(name), contents)?;
        }
        Ok(())
    }
}

fn output(stdout: &str, stderr: &str, exit_code: i32) -> CommandOutput {
    CommandOutput {
        stdout: stdout.to_string(),
        stderr: stderr.to_string(),
        exit_code,
    }
}

/// A project root with a build script and an empty inventory.
pub fn project() -> (TempDir, RunSettings) {
    let dir = TempDir::new().unwrap();
    fs::create_dir_all(dir.path().join("build_system")).unwrap();
    fs::write(
        dir.path().join("build_system/script.sh"),
        "#!/bin/bash\nmkdir -p exports\n",
    )
    .unwrap();
    fs::write(dir.path().join("build_machine.json"), "[]").unwrap();

    let settings = RunSettings::new(dir.path())
        .with_route_tool(None)
        .validate()
        .unwrap();
    (dir, settings)
}
