mod common;

use common::{project, FakeFactory, FakeHost};
use vmfleet::config::HostDescriptor;
use vmfleet::error::FailureKind;
use vmfleet::remote::{FleetOrchestrator, RouteResolver};
use vmfleet::report::RunReport;

#[test]
fn test_mixed_fleet_partitions_results() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new()
        .with_host("ok-host", FakeHost::new("ubuntu", "22.04", "x86_64"))
        .with_host(
            "bad-host",
            FakeHost::new("debian", "12", "x86_64").failing_script(1, "compile error\n"),
        );
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let mut seen = 0;
    let results = orchestrator
        .run(
            vec![
                HostDescriptor::new("builder@ok-host", "pw"),
                HostDescriptor::new("builder@bad-host", "pw"),
            ],
            |_| seen += 1,
        )
        .unwrap();

    assert_eq!(seen, 2);
    let report = RunReport::new(results);
    assert_eq!(report.attempted(), 2);
    assert_eq!(report.succeeded(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.exit_code(), 1);

    let ok = report.successes().next().unwrap();
    assert_eq!(ok.address, "builder@ok-host");
    assert!(settings
        .output_dir_for("ubuntu-22.04-x86_64")
        .join("artifact.bin")
        .exists());

    let bad = report.failures().next().unwrap();
    assert_eq!(bad.address, "builder@bad-host");
    assert!(bad.workspace().is_some());
    assert!(bad.error().unwrap().detail().contains("compile error"));
}

#[test]
fn test_all_hosts_succeed() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new()
        .with_host("a", FakeHost::new("ubuntu", "22.04", "x86_64"))
        .with_host("b", FakeHost::new("ubuntu", "22.04", "aarch64"))
        .with_host("c", FakeHost::new("fedora", "40", "x86_64"));
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let hosts = ["a", "b", "c"]
        .iter()
        .map(|h| HostDescriptor::new(format!("builder@{}", h), "pw"))
        .collect();
    let report = RunReport::new(orchestrator.run(hosts, |_| {}).unwrap());

    assert!(report.is_success());
    assert_eq!(report.exit_code(), 0);
    for label in ["ubuntu-22.04-x86_64", "ubuntu-22.04-aarch64", "fedora-40-x86_64"] {
        assert!(settings.output_dir_for(label).join("run.log").exists());
    }
}

#[test]
fn test_panicking_host_does_not_affect_others() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new()
        .with_host("good", FakeHost::new("ubuntu", "22.04", "x86_64"))
        .with_host("crashy", FakeHost::new("arch", "", "x86_64").panicking());
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let results = orchestrator
        .run(
            vec![
                HostDescriptor::new("builder@good", "pw"),
                HostDescriptor::new("builder@crashy", "pw"),
            ],
            |_| {},
        )
        .unwrap();
    let report = RunReport::new(results);

    assert_eq!(report.succeeded(), 1);
    let crashed = report.failures().next().unwrap();
    assert_eq!(crashed.address, "builder@crashy");
    assert_eq!(crashed.failure_kind(), Some(FailureKind::Unclassified));
    assert_eq!(crashed.display_name(), "arch-x86_64");
    assert!(crashed.workspace().is_some());
    assert!(crashed
        .error()
        .unwrap()
        .to_string()
        .contains("fake session crashed on crashy"));
}

#[test]
fn test_unreachable_host_is_reported() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new().with_host("up", FakeHost::new("ubuntu", "22.04", "x86_64"));
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let results = orchestrator
        .run(
            vec![
                HostDescriptor::new("builder@up", "pw"),
                HostDescriptor::new("builder@down", "pw"),
            ],
            |_| {},
        )
        .unwrap();
    let report = RunReport::new(results);

    assert_eq!(report.succeeded(), 1);
    let down = report.failures().next().unwrap();
    assert_eq!(down.failure_kind(), Some(FailureKind::Transport));
    assert!(down.workspace().is_none());
}

#[test]
fn test_empty_fleet_is_not_a_success() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new();
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let report = RunReport::new(orchestrator.run(Vec::new(), |_| {}).unwrap());
    assert_eq!(report.attempted(), 0);
    assert_eq!(report.exit_code(), 1);
}

#[test]
fn test_probe_reports_labels() {
    let (_dir, settings) = project();
    let factory = FakeFactory::new()
        .with_host("vm1", FakeHost::new("rocky", "9.4", "x86_64"))
        .with_host("vm2", FakeHost::new("rocky", "9.4", "x86_64").rejecting_auth());
    let orchestrator = FleetOrchestrator::new(&settings, &factory, RouteResolver::disabled());

    let results = orchestrator
        .probe(
            vec![
                HostDescriptor::new("builder@vm1", "pw"),
                HostDescriptor::new("builder@vm2", "pw"),
            ],
            |_| {},
        )
        .unwrap();

    assert_eq!(results.len(), 2);
    let vm1 = results.iter().find(|r| r.address == "builder@vm1").unwrap();
    assert_eq!(vm1.identity.as_ref().unwrap().label(), "rocky-9.4-x86_64");
    let vm2 = results.iter().find(|r| r.address == "builder@vm2").unwrap();
    assert!(vm2.identity.is_err());

    assert!(!factory.calls().iter().any(|c| c.contains("mkdir")));
}
