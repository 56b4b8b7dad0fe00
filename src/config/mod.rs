//! Configuration for a fleet run.
//!
//! Two pieces of configuration drive a run:
//!
//! - the **host inventory**, a static list of machines and their secrets,
//!   read once and never modified;
//! - the **run settings**, which pin the project root, the script to ship and
//!   the transport options. They are validated once at startup so that a
//!   missing script or inventory is reported before any remote work begins.
//!
//! # Inventory format
//!
//! The inventory defaults to `<project-root>/build_machine.json`:
//!
//! ```json
//! [
//!   { "host": "builder@ubuntu-vm.example.com", "password": "hunter2" },
//!   { "host": "builder@10.0.0.12", "password": "s3cret", "port": 2222 }
//! ]
//! ```
//!
//! `address` and `secret` are accepted as aliases for `host` and `password`.
//! Files ending in `.yml` or `.yaml` are parsed as YAML.

use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::{Error, Result};

/// Default SSH port
const DEFAULT_SSH_PORT: u16 = 22;

/// Default connect timeout in seconds
const DEFAULT_CONNECT_TIMEOUT: u64 = 30;

/// Default location of the route discovery tool
pub const DEFAULT_ROUTE_TOOL: &str = "/usr/local/bin/oroute";

/// Inventory file name, relative to the project root
pub const INVENTORY_FILE: &str = "build_machine.json";

/// Script location, relative to the project root
pub const SCRIPT_PATH: &str = "build_system/script.sh";

/// Local directory (under the project root) collecting per-host outputs
pub const OUTPUT_ROOT: &str = "builds";

/// Subdirectory the remote script must create inside its workspace
pub const EXPORTS_DIR: &str = "exports";

/// Name of the captured script output inside each host's output directory
pub const RUN_LOG: &str = "run.log";

/// Patterns never shipped to a remote host.
pub const DEFAULT_EXCLUDES: &[&str] = &[
    ".git",
    ".build",
    ".env",
    "*.zip",
    "*.enc",
    "build",
    "cmake-build-*",
    "builds",
];

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

/// One remote target as written in the inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostDescriptor {
    /// Compound `user@host` address
    #[serde(rename = "host", alias = "address", default)]
    pub address: String,

    /// Password used for every channel to this host
    #[serde(rename = "password", alias = "secret", default)]
    pub secret: String,

    /// SSH port (default: 22)
    #[serde(default = "default_ssh_port")]
    pub port: u16,
}

impl HostDescriptor {
    pub fn new(address: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            secret: secret.into(),
            port: DEFAULT_SSH_PORT,
        }
    }

    /// Builder method to set the SSH port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Checks the entry without touching the network and returns its parsed
    /// address.
    pub fn validate(&self) -> Result<HostAddress> {
        if self.address.trim().is_empty() {
            return Err(Error::Validation("host address is not configured".to_string()));
        }
        if self.secret.is_empty() {
            return Err(Error::Validation(format!(
                "{}: password is not set",
                self.address
            )));
        }
        self.address.parse()
    }
}

/// The `user@host` pair a descriptor addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostAddress {
    pub user: String,
    pub host: String,
}

impl HostAddress {
    /// Returns a copy pointing at a different network address for the same user.
    pub fn with_host(&self, host: impl Into<String>) -> Self {
        Self {
            user: self.user.clone(),
            host: host.into(),
        }
    }
}

impl FromStr for HostAddress {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().split_once('@') {
            Some((user, host)) if !user.is_empty() && !host.is_empty() => Ok(Self {
                user: user.to_string(),
                host: host.to_string(),
            }),
            _ => Err(Error::Validation(format!(
                "{}: address must have the form user@host",
                s
            ))),
        }
    }
}

impl fmt::Display for HostAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.user, self.host)
    }
}

/// An inventory entry that was dropped before the run started.
#[derive(Debug, Clone)]
pub struct SkippedHost {
    pub descriptor: HostDescriptor,
    pub reason: String,
}

/// The static list of hosts for a run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HostInventory {
    pub hosts: Vec<HostDescriptor>,
}

impl HostInventory {
    pub fn new(hosts: Vec<HostDescriptor>) -> Self {
        Self { hosts }
    }

    /// Loads the inventory from a JSON (or YAML) file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!(
                "Failed to read host inventory {}: {}",
                path.display(),
                e
            ))
        })?;

        let is_yaml = path
            .extension()
            .is_some_and(|ext| ext == "yml" || ext == "yaml");

        let inventory: std::result::Result<HostInventory, String> = if is_yaml {
            serde_yaml::from_str(&contents).map_err(|e| e.to_string())
        } else {
            serde_json::from_str(&contents).map_err(|e| e.to_string())
        };

        inventory.map_err(|e| {
            Error::Configuration(format!(
                "Failed to parse host inventory {}: {}\n\n\
                 Expected a list of entries such as:\n\
                 [{{\"host\": \"user@server.example.com\", \"password\": \"...\"}}]",
                path.display(),
                e
            ))
        })
    }

    /// Splits the inventory into usable entries and skipped ones, logging the
    /// reason for every skip.
    pub fn partition_valid(&self) -> (Vec<HostDescriptor>, Vec<SkippedHost>) {
        let mut valid = Vec::new();
        let mut skipped = Vec::new();

        for descriptor in &self.hosts {
            match descriptor.validate() {
                Ok(_) => valid.push(descriptor.clone()),
                Err(e) => {
                    warn!("Skipping host entry: {}", e);
                    skipped.push(SkippedHost {
                        descriptor: descriptor.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        (valid, skipped)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

/// How remote host keys are treated when opening a channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HostKeyPolicy {
    /// Trust any host key. Suitable for short-lived fleets.
    #[default]
    AcceptAny,
    /// Require the key to be present in `~/.ssh/known_hosts`.
    KnownHosts,
}

impl FromStr for HostKeyPolicy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "accept-any" => Ok(HostKeyPolicy::AcceptAny),
            "known-hosts" => Ok(HostKeyPolicy::KnownHosts),
            other => Err(format!(
                "unknown host key policy '{}' (expected accept-any or known-hosts)",
                other
            )),
        }
    }
}

impl fmt::Display for HostKeyPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostKeyPolicy::AcceptAny => write!(f, "accept-any"),
            HostKeyPolicy::KnownHosts => write!(f, "known-hosts"),
        }
    }
}

/// Settings shared read-only by every host task.
#[derive(Debug, Clone, PartialEq)]
pub struct RunSettings {
    /// Root of the project tree shipped to every host
    pub project_root: PathBuf,

    /// Script executed in each remote workspace
    pub script: PathBuf,

    /// Host inventory file
    pub inventory: PathBuf,

    /// Route discovery tool; `None` disables route resolution
    pub route_tool: Option<PathBuf>,

    pub host_key_policy: HostKeyPolicy,

    /// Connect timeout in seconds
    pub connect_timeout: u64,

    /// Patterns excluded from the tree push in addition to the built-in list
    pub extra_excludes: Vec<String>,
}

impl RunSettings {
    /// Creates settings rooted at `project_root` with every other value at its
    /// default.
    pub fn new(project_root: impl Into<PathBuf>) -> Self {
        let project_root = project_root.into();
        Self {
            script: project_root.join(SCRIPT_PATH),
            inventory: project_root.join(INVENTORY_FILE),
            project_root,
            route_tool: Some(PathBuf::from(DEFAULT_ROUTE_TOOL)),
            host_key_policy: HostKeyPolicy::default(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            extra_excludes: Vec::new(),
        }
    }

    pub fn with_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.script = script.into();
        self
    }

    pub fn with_inventory(mut self, inventory: impl Into<PathBuf>) -> Self {
        self.inventory = inventory.into();
        self
    }

    pub fn with_route_tool(mut self, tool: Option<PathBuf>) -> Self {
        self.route_tool = tool;
        self
    }

    pub fn with_host_key_policy(mut self, policy: HostKeyPolicy) -> Self {
        self.host_key_policy = policy;
        self
    }

    pub fn with_connect_timeout(mut self, seconds: u64) -> Self {
        self.connect_timeout = seconds;
        self
    }

    pub fn with_extra_excludes(mut self, patterns: Vec<String>) -> Self {
        self.extra_excludes = patterns;
        self
    }

    /// Checks the local assets a run depends on and canonicalises the project
    /// root. Call once before any remote work.
    pub fn validate(mut self) -> Result<Self> {
        if !self.project_root.is_dir() {
            return Err(Error::Configuration(format!(
                "Project root {} is not a directory",
                self.project_root.display()
            )));
        }
        self.project_root = self.project_root.canonicalize().map_err(|e| {
            Error::Configuration(format!(
                "Failed to resolve project root {}: {}",
                self.project_root.display(),
                e
            ))
        })?;

        if !self.script.is_file() {
            return Err(Error::Configuration(format!(
                "Script not found at {}",
                self.script.display()
            )));
        }
        fs::File::open(&self.script).map_err(|e| {
            Error::Configuration(format!(
                "Script {} is not readable: {}",
                self.script.display(),
                e
            ))
        })?;

        if self.script.file_name().is_none() {
            return Err(Error::Configuration(format!(
                "Script path {} has no file name",
                self.script.display()
            )));
        }

        if !self.inventory.is_file() {
            return Err(Error::Configuration(format!(
                "Host inventory not found at {}",
                self.inventory.display()
            )));
        }

        if self.connect_timeout == 0 {
            return Err(Error::Configuration(
                "Connect timeout must be at least one second".to_string(),
            ));
        }

        Ok(self)
    }

    /// File name of the script, as it will appear in the remote workspace.
    pub fn script_name(&self) -> String {
        self.script
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "script.sh".to_string())
    }

    /// Directory collecting every host's output.
    pub fn output_root(&self) -> PathBuf {
        self.project_root.join(OUTPUT_ROOT)
    }

    /// Output directory for one host identity label.
    pub fn output_dir_for(&self, label: &str) -> PathBuf {
        self.output_root().join(label)
    }

    /// Built-in excludes followed by any configured extras.
    pub fn exclude_patterns(&self) -> Vec<String> {
        DEFAULT_EXCLUDES
            .iter()
            .map(|p| p.to_string())
            .chain(self.extra_excludes.iter().cloned())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn project_with_assets() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir(dir.path().join("build_system")).unwrap();
        fs::write(dir.path().join(SCRIPT_PATH), "#!/bin/bash\nmkdir -p exports\n").unwrap();
        fs::write(dir.path().join(INVENTORY_FILE), "[]").unwrap();
        dir
    }

    #[test]
    fn test_host_address_parse() {
        let addr: HostAddress = "builder@10.0.0.5".parse().unwrap();
        assert_eq!(addr.user, "builder");
        assert_eq!(addr.host, "10.0.0.5");
        assert_eq!(addr.to_string(), "builder@10.0.0.5");

        assert!("10.0.0.5".parse::<HostAddress>().is_err());
        assert!("@10.0.0.5".parse::<HostAddress>().is_err());
        assert!("builder@".parse::<HostAddress>().is_err());
    }

    #[test]
    fn test_with_host_keeps_user() {
        let addr: HostAddress = "builder@vm.example.com".parse().unwrap();
        let rewritten = addr.with_host("192.168.1.20");
        assert_eq!(rewritten.to_string(), "builder@192.168.1.20");
    }

    #[test]
    fn test_descriptor_validation() {
        assert!(HostDescriptor::new("builder@vm", "pw").validate().is_ok());

        let missing_host = HostDescriptor::new("", "pw").validate().unwrap_err();
        assert!(matches!(missing_host, Error::Validation(_)));

        let missing_secret = HostDescriptor::new("builder@vm", "").validate().unwrap_err();
        assert!(missing_secret.to_string().contains("password is not set"));
    }

    #[test]
    fn test_inventory_parses_original_format() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build_machine.json");
        fs::write(
            &path,
            r#"[
                {"host": "builder@vm1", "password": "a"},
                {"address": "builder@vm2", "secret": "b", "port": 2222},
                {"host": "builder@vm3"}
            ]"#,
        )
        .unwrap();

        let inventory = HostInventory::load_from(&path).unwrap();
        assert_eq!(inventory.len(), 3);
        assert_eq!(inventory.hosts[1].port, 2222);
        assert_eq!(inventory.hosts[0].port, 22);
        assert_eq!(inventory.hosts[2].secret, "");
    }

    #[test]
    fn test_inventory_yaml() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("hosts.yaml");
        fs::write(&path, "- host: builder@vm1\n  password: a\n").unwrap();

        let inventory = HostInventory::load_from(&path).unwrap();
        assert_eq!(inventory.hosts[0].address, "builder@vm1");
    }

    #[test]
    fn test_inventory_parse_error_is_configuration() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("build_machine.json");
        fs::write(&path, "{ not json").unwrap();

        let err = HostInventory::load_from(&path).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_partition_valid_skips_incomplete_entries() {
        let inventory = HostInventory::new(vec![
            HostDescriptor::new("builder@vm1", "a"),
            HostDescriptor::new("", "b"),
            HostDescriptor::new("builder@vm3", ""),
            HostDescriptor::new("vm4", "d"),
        ]);

        let (valid, skipped) = inventory.partition_valid();
        assert_eq!(valid.len(), 1);
        assert_eq!(valid[0].address, "builder@vm1");
        assert_eq!(skipped.len(), 3);
    }

    #[test]
    fn test_host_key_policy_from_str() {
        assert_eq!(
            "accept-any".parse::<HostKeyPolicy>().unwrap(),
            HostKeyPolicy::AcceptAny
        );
        assert_eq!(
            "known-hosts".parse::<HostKeyPolicy>().unwrap(),
            HostKeyPolicy::KnownHosts
        );
        assert!("strict".parse::<HostKeyPolicy>().is_err());
    }

    #[test]
    fn test_settings_defaults() {
        let settings = RunSettings::new("/srv/project");
        assert_eq!(settings.script, PathBuf::from("/srv/project/build_system/script.sh"));
        assert_eq!(settings.inventory, PathBuf::from("/srv/project/build_machine.json"));
        assert_eq!(settings.script_name(), "script.sh");
        assert_eq!(
            settings.output_dir_for("ubuntu-22.04-x86_64"),
            PathBuf::from("/srv/project/builds/ubuntu-22.04-x86_64")
        );
    }

    #[test]
    fn test_settings_validate_accepts_complete_project() {
        let dir = project_with_assets();
        let settings = RunSettings::new(dir.path()).validate().unwrap();
        assert!(settings.project_root.is_absolute());
    }

    #[test]
    fn test_settings_validate_rejects_missing_script() {
        let dir = project_with_assets();
        fs::remove_file(dir.path().join(SCRIPT_PATH)).unwrap();

        let err = RunSettings::new(dir.path()).validate().unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
        assert!(err.to_string().contains("Script not found"));
    }

    #[test]
    fn test_settings_validate_rejects_missing_inventory() {
        let dir = project_with_assets();
        fs::remove_file(dir.path().join(INVENTORY_FILE)).unwrap();

        let err = RunSettings::new(dir.path()).validate().unwrap_err();
        assert!(err.to_string().contains("Host inventory not found"));
    }

    #[test]
    fn test_exclude_patterns_append_extras() {
        let settings =
            RunSettings::new("/srv/project").with_extra_excludes(vec!["node_modules".to_string()]);
        let patterns = settings.exclude_patterns();
        assert_eq!(patterns.first().map(String::as_str), Some(".git"));
        assert!(patterns.contains(&"*.enc".to_string()));
        assert_eq!(patterns.last().map(String::as_str), Some("node_modules"));
    }
}
