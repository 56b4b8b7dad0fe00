//! Fan-out of host lifecycles across the fleet.
//!
//! Routes are resolved sequentially first. Every host then gets its own task
//! in a thread pool sized to the host count, so no host waits for a free
//! worker. Each task is wrapped in a panic boundary that turns any fault the
//! runner itself did not catch into a failed result for that host alone, and results are handed back in the
//! order they complete. The call returns only after every task has finished.

use log::{debug, info};
use rayon::ThreadPoolBuilder;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc;

use crate::config::{HostDescriptor, RunSettings};
use crate::error::{Error, Result};
use crate::remote::identity::{probe_identity, HostIdentity};
use crate::remote::route::{ResolvedHost, RouteResolver};
use crate::remote::runner::{HostRunResult, HostRunner, RunnerState};
use crate::remote::session::SessionFactory;

/// Outcome of probing one host's identity without running anything.
#[derive(Debug)]
pub struct ProbeResult {
    pub address: String,
    pub identity: Result<HostIdentity>,
}

/// Runs the whole batch.
pub struct FleetOrchestrator<'a> {
    settings: &'a RunSettings,
    factory: &'a dyn SessionFactory,
    resolver: RouteResolver,
}

impl<'a> FleetOrchestrator<'a> {
    pub fn new(
        settings: &'a RunSettings,
        factory: &'a dyn SessionFactory,
        resolver: RouteResolver,
    ) -> Self {
        Self {
            settings,
            factory,
            resolver,
        }
    }

    /// Resolves routes for every descriptor, in order.
    pub fn resolve_routes(&self, hosts: Vec<HostDescriptor>) -> Vec<ResolvedHost> {
        self.resolver.resolve_all(hosts)
    }

    /// Resolves routes, then runs every host concurrently.
    ///
    /// `on_result` is called on the calling thread as each host finishes.
    pub fn run<C>(&self, hosts: Vec<HostDescriptor>, on_result: C) -> Result<Vec<HostRunResult>>
    where
        C: FnMut(&HostRunResult),
    {
        let resolved = self.resolve_routes(hosts);
        self.run_resolved(resolved, on_result)
    }

    /// Runs every already-resolved host concurrently.
    pub fn run_resolved<C>(
        &self,
        hosts: Vec<ResolvedHost>,
        on_result: C,
    ) -> Result<Vec<HostRunResult>>
    where
        C: FnMut(&HostRunResult),
    {
        info!(
            "Running '{}' on {} host(s) in parallel",
            self.settings.script_name(),
            hosts.len()
        );

        let runner = HostRunner::new(self.settings, self.factory);

        fan_out(
            hosts,
            |host| runner.run(host),
            |host, detail| {
                HostRunResult::failed(
                    None,
                    host.address().to_string(),
                    Error::Unclassified(format!("Unhandled error in host task: {}", detail)),
                    None,
                    RunnerState::Init,
                )
                .with_original_address(host.original_address.clone())
            },
            on_result,
        )
    }

    /// Resolves routes and probes each host's identity concurrently, without
    /// touching its filesystem.
    pub fn probe<C>(&self, hosts: Vec<HostDescriptor>, on_result: C) -> Result<Vec<ProbeResult>>
    where
        C: FnMut(&ProbeResult),
    {
        let resolved = self.resolve_routes(hosts);
        let runner = HostRunner::new(self.settings, self.factory);

        fan_out(
            resolved,
            |host| ProbeResult {
                address: host.address().to_string(),
                identity: runner
                    .open_session(host)
                    .and_then(|session| probe_identity(session.as_ref())),
            },
            |host, detail| ProbeResult {
                address: host.address().to_string(),
                identity: Err(Error::Unclassified(format!(
                    "Unhandled error in probe task: {}",
                    detail
                ))),
            },
            on_result,
        )
    }
}

/// Runs `task` once per host on a dedicated pool and collects the results in
/// completion order. A panicking task is converted with `on_panic`.
fn fan_out<T, F, P, C>(
    hosts: Vec<ResolvedHost>,
    task: F,
    on_panic: P,
    mut on_result: C,
) -> Result<Vec<T>>
where
    T: Send,
    F: Fn(&ResolvedHost) -> T + Sync,
    P: Fn(&ResolvedHost, String) -> T + Sync,
    C: FnMut(&T),
{
    if hosts.is_empty() {
        return Ok(Vec::new());
    }

    let pool = ThreadPoolBuilder::new()
        .num_threads(hosts.len())
        .thread_name(|i| format!("host-{}", i))
        .build()
        .map_err(|e| Error::Unclassified(format!("Failed to start worker pool: {}", e)))?;

    let mut results = Vec::with_capacity(hosts.len());
    let task = &task;
    let on_panic = &on_panic;

    pool.in_place_scope(|scope| {
        let (tx, rx) = mpsc::channel();

        for host in &hosts {
            let tx = tx.clone();
            scope.spawn(move |_| {
                let result = catch_unwind(AssertUnwindSafe(|| task(host)))
                    .unwrap_or_else(|panic| on_panic(host, panic_message(panic.as_ref())));
                // The receiver outlives every task in this scope.
                let _ = tx.send(result);
            });
        }
        drop(tx);

        for result in rx {
            on_result(&result);
            results.push(result);
        }
    });

    debug!("All {} host task(s) finished", results.len());
    Ok(results)
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
