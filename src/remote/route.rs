//! Best-effort lookup of a faster network path to each host.
//!
//! An external route discovery tool is asked whether a host can be reached
//! through a lower-latency local address. Any problem with the tool, its
//! output or its answer leaves the host untouched: route resolution is an
//! optimisation and never fails a run.

use log::{debug, info, warn};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Command;

use crate::config::{HostAddress, HostDescriptor};

/// A host descriptor after route resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedHost {
    /// Descriptor with the (possibly rewritten) address
    pub descriptor: HostDescriptor,
    /// Address as written in the inventory, when it was rewritten
    pub original_address: Option<String>,
}

impl ResolvedHost {
    /// Wraps a descriptor that was not rewritten.
    pub fn unchanged(descriptor: HostDescriptor) -> Self {
        Self {
            descriptor,
            original_address: None,
        }
    }

    pub fn address(&self) -> &str {
        &self.descriptor.address
    }
}

/// Answer from the route discovery tool.
#[derive(Debug, Deserialize)]
struct RouteInfo {
    #[serde(default)]
    reachable: bool,
    #[serde(default)]
    local_address: Option<String>,
}

/// Resolves faster routes through an external tool.
#[derive(Debug, Clone)]
pub struct RouteResolver {
    tool: Option<PathBuf>,
}

impl RouteResolver {
    /// Creates a resolver using `tool`; `None` disables resolution.
    pub fn new(tool: Option<PathBuf>) -> Self {
        Self { tool }
    }

    pub fn disabled() -> Self {
        Self { tool: None }
    }

    /// Returns the descriptor, with its network address replaced when the
    /// tool reports a faster route.
    pub fn resolve(&self, descriptor: HostDescriptor) -> ResolvedHost {
        let Ok(address) = descriptor.address.parse::<HostAddress>() else {
            return ResolvedHost::unchanged(descriptor);
        };

        let Some(tool) = &self.tool else {
            debug!("Route resolution disabled for {}", address.host);
            return ResolvedHost::unchanged(descriptor);
        };

        info!("Finding a faster way to {}...", address.host);

        if !tool.exists() {
            info!("  {} not found, skipping route resolution", tool.display());
            return ResolvedHost::unchanged(descriptor);
        }

        let output = match Command::new(tool)
            .arg("-sresolve")
            .arg(address.to_string())
            .output()
        {
            Ok(output) => output,
            Err(e) => {
                warn!("  Route tool failed to start: {}", e);
                return ResolvedHost::unchanged(descriptor);
            }
        };

        if !output.status.success() {
            warn!(
                "  Route tool exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            );
            return ResolvedHost::unchanged(descriptor);
        }

        match routed_address(&address, &output.stdout) {
            Some(routed) => {
                info!("  Found a faster route → {}", routed.host);
                ResolvedHost {
                    original_address: Some(descriptor.address.clone()),
                    descriptor: HostDescriptor {
                        address: routed.to_string(),
                        ..descriptor
                    },
                }
            }
            None => ResolvedHost::unchanged(descriptor),
        }
    }

    /// Resolves every descriptor in order.
    pub fn resolve_all(&self, descriptors: Vec<HostDescriptor>) -> Vec<ResolvedHost> {
        descriptors.into_iter().map(|d| self.resolve(d)).collect()
    }
}

/// Interprets the tool's output. Only a reachable host with a non-empty
/// local address yields a new address.
fn routed_address(address: &HostAddress, output: &[u8]) -> Option<HostAddress> {
    let info: RouteInfo = match serde_json::from_slice(output) {
        Ok(info) => info,
        Err(e) => {
            debug!("  Ignoring undecodable route tool output: {}", e);
            return None;
        }
    };

    if !info.reachable {
        info!("  Route tool reports host unreachable, using original address");
        return None;
    }

    match info.local_address.as_deref().map(str::trim) {
        Some(local) if !local.is_empty() => Some(address.with_host(local)),
        _ => {
            debug!("  Route tool returned no local address");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn address() -> HostAddress {
        "builder@vm.example.com".parse().unwrap()
    }

    #[test]
    fn test_reachable_route_rewrites_host_only() {
        let routed = routed_address(
            &address(),
            br#"{"reachable": true, "local_address": "192.168.1.20"}"#,
        )
        .unwrap();
        assert_eq!(routed.user, "builder");
        assert_eq!(routed.host, "192.168.1.20");
    }

    #[test]
    fn test_unreachable_route_is_ignored() {
        assert!(routed_address(
            &address(),
            br#"{"reachable": false, "local_address": "192.168.1.20"}"#
        )
        .is_none());
    }

    #[test]
    fn test_malformed_output_is_ignored() {
        assert!(routed_address(&address(), b"not json at all").is_none());
        assert!(routed_address(&address(), br#"{"reachable": true}"#).is_none());
        assert!(routed_address(&address(), br#"{"reachable": true, "local_address": " "}"#)
            .is_none());
    }

    #[test]
    fn test_disabled_resolver_is_noop() {
        let descriptor = HostDescriptor::new("builder@vm.example.com", "pw");
        let resolved = RouteResolver::disabled().resolve(descriptor.clone());
        assert_eq!(resolved, ResolvedHost::unchanged(descriptor));
    }

    #[test]
    fn test_missing_tool_is_noop() {
        let descriptor = HostDescriptor::new("builder@vm.example.com", "pw");
        let resolver = RouteResolver::new(Some(PathBuf::from("/nonexistent/oroute")));
        let resolved = resolver.resolve(descriptor.clone());
        assert_eq!(resolved.descriptor, descriptor);
        assert!(resolved.original_address.is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_tool_output_rewrites_descriptor() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("oroute");
        std::fs::write(
            &tool,
            "#!/bin/sh\necho '{\"reachable\": true, \"local_address\": \"10.1.2.3\"}'\n",
        )
        .unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let descriptor = HostDescriptor::new("builder@vm.example.com", "pw").with_port(2222);
        let resolved = RouteResolver::new(Some(tool)).resolve(descriptor);

        assert_eq!(resolved.address(), "builder@10.1.2.3");
        assert_eq!(resolved.descriptor.secret, "pw");
        assert_eq!(resolved.descriptor.port, 2222);
        assert_eq!(
            resolved.original_address.as_deref(),
            Some("builder@vm.example.com")
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_tool_is_noop() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::TempDir::new().unwrap();
        let tool = dir.path().join("oroute");
        std::fs::write(&tool, "#!/bin/sh\nexit 3\n").unwrap();
        std::fs::set_permissions(&tool, std::fs::Permissions::from_mode(0o755)).unwrap();

        let descriptor = HostDescriptor::new("builder@vm.example.com", "pw");
        let resolved = RouteResolver::new(Some(tool)).resolve(descriptor.clone());
        assert_eq!(resolved.descriptor, descriptor);
    }
}
