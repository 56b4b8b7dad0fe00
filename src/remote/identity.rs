//! Derivation of a stable, human-readable label for each host.
//!
//! The label names the host's local output directory, so it depends only on
//! what the machine *is* (OS, version, architecture, hostname) and never on
//! how it was reached.

use log::debug;
use serde::Serialize;

use crate::error::{Error, Result};
use crate::remote::session::RemoteSession;

/// One round trip: OS id/version lines, then architecture, then hostname.
pub const IDENTITY_QUERY: &str = "grep -E '^(ID=|VERSION_ID=)' /etc/os-release 2>/dev/null || echo 'ID=unknown'; uname -m; hostname";

const UNKNOWN: &str = "unknown";

/// What a host reported about itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HostIdentity {
    pub os_id: Option<String>,
    pub os_version: Option<String>,
    pub arch: String,
    pub hostname: String,
}

impl HostIdentity {
    /// Parses the stdout of [`IDENTITY_QUERY`].
    pub fn parse(output: &str) -> Self {
        let lines: Vec<&str> = output.trim().lines().collect();

        let mut os_id = None;
        let mut os_version = None;

        for line in &lines {
            if let Some(value) = line.strip_prefix("ID=") {
                os_id = Some(unquote(value));
            } else if let Some(value) = line.strip_prefix("VERSION_ID=") {
                os_version = Some(unquote(value));
            }
        }

        let os_id = os_id.filter(|id| !id.is_empty() && id != UNKNOWN);
        let os_version = os_version.filter(|v| !v.is_empty());

        let arch = if lines.len() >= 2 {
            lines[lines.len() - 2].trim()
        } else {
            UNKNOWN
        };
        let hostname = lines.last().map(|l| l.trim()).unwrap_or(UNKNOWN);

        Self {
            os_id,
            os_version,
            arch: non_empty_or_unknown(arch),
            hostname: non_empty_or_unknown(hostname),
        }
    }

    /// Normalized label: `{os}-{version}-{arch}`, `{os}-{arch}` or
    /// `{hostname}-{arch}`, lowercase, with whitespace replaced by hyphens.
    pub fn label(&self) -> String {
        let raw = match (&self.os_id, &self.os_version) {
            (Some(os), Some(version)) => format!("{}-{}-{}", os, version, self.arch),
            (Some(os), None) => format!("{}-{}", os, self.arch),
            _ => format!("{}-{}", self.hostname, self.arch),
        };

        raw.chars()
            .map(|c| if c.is_whitespace() || c == '/' { '-' } else { c })
            .collect::<String>()
            .to_lowercase()
    }
}

/// Runs the identity query over `session` and parses the answer.
///
/// Any failure is reported as [`Error::IdentityProbe`].
pub fn probe_identity(session: &dyn RemoteSession) -> Result<HostIdentity> {
    let result = session.exec(IDENTITY_QUERY).map_err(|e| Error::IdentityProbe {
        source: Box::new(e),
    })?;

    if !result.is_success() {
        return Err(Error::IdentityProbe {
            source: Box::new(Error::transport_with_output(
                format!("identity query exited with {}", result.exit_code),
                result.combined(),
            )),
        });
    }

    let identity = HostIdentity::parse(&result.stdout);
    debug!("Probed identity: {:?}", identity);
    Ok(identity)
}

fn unquote(value: &str) -> String {
    value.trim().trim_matches('"').trim_matches('\'').to_string()
}

fn non_empty_or_unknown(value: &str) -> String {
    if value.is_empty() {
        UNKNOWN.to_string()
    } else {
        value.to_string()
    }
}
