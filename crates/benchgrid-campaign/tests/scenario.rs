//! End-to-end campaigns over a scripted five-host cluster.
//!
//! `a` runs the controller, `b` two disk servers, `c` one disk server, and
//! `d` and `e` one client each.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::time::Duration;

use bench_core::{CampaignFile, RemoteLayout, Topology};
use benchgrid_campaign::{
    Campaign, CampaignError, CampaignOptions, CampaignPhase, Loadgen, ServersOnly,
};
use benchgrid_ops::OpError;
use benchgrid_remote::{RemoteError, ScriptedTransport};

const CLUSTER: &str = r#"
[machines.m1]
host = "a"
net_iface = "eth0"
roles = ["controller"]

[machines.m1.controller]
ip = "10.0.0.1"
control_plane_scheduler_type = "profile"
data_plane_scheduler_type = "weighted_read"
disk_server_rejections = true

[machines.m2]
host = "b"
net_iface = "eth0"
roles = ["disk_server_0", "disk_server_1"]

[machines.m2.disk_server_0]
ip = "10.0.0.2"
disk_pci = "0000:65:00.0"

[machines.m2.disk_server_1]
ip = "10.0.0.3"
disk_pci = "0000:66:00.0"

[machines.m3]
host = "c"
net_iface = "eth0"
roles = ["disk_server_2"]

[machines.m3.disk_server_2]
ip = "10.0.0.4"
disk_pci = "0000:65:00.0"
pre_launch = "storage_perf"

[machines.m4]
host = "d"
net_iface = "eth1"
roles = ["client_0"]

[machines.m4.client_0]
ip = "10.0.0.5"
cores = 2
args = "--threads 2"

[machines.m5]
host = "e"
net_iface = "eth1"
roles = ["client_1"]

[machines.m5.client_1]
ip = "10.0.0.6"
cores = 2
args = "--threads 2"
"#;

const HOSTS: [&str; 5] = ["a", "b", "c", "d", "e"];
const REMOTE_ARCHIVE: &str = "/home/alice/mit-sandook/sandook-output.tar.gz";
const TEARDOWN: &str = "run.sh teardown";

/// A gzip'd tar of the remote output directory holding `files`, built with
/// the system tar the same way hosts build theirs.
fn output_archive(files: &[(&str, &str)]) -> Vec<u8> {
    let dir = tempfile::tempdir().unwrap();
    let root = dir.path().join("root");
    let out = root.join("home/alice/mit-sandook/sandook-output");
    std::fs::create_dir_all(&out).unwrap();
    for (name, body) in files {
        std::fs::write(out.join(name), body).unwrap();
    }
    let tarball = dir.path().join("out.tar.gz");
    let status = Command::new("tar")
        .arg("-czf")
        .arg(&tarball)
        .arg("-C")
        .arg(&root)
        .arg("home")
        .status()
        .unwrap();
    assert!(status.success());
    std::fs::read(&tarball).unwrap()
}

fn peaks(values: &[u64]) -> String {
    values
        .iter()
        .enumerate()
        .map(|(i, v)| format!("I1019 controller.cc:88] disk {i} Peak IOPS (read): {v}\n"))
        .collect()
}

/// Every host serves an output archive; `a`'s controller log reports the
/// given read peaks.
fn serving_cluster(read_peaks: &[u64]) -> ScriptedTransport {
    let log = peaks(read_peaks);
    let mut transport = ScriptedTransport::new().serve_file(
        "a",
        REMOTE_ARCHIVE,
        output_archive(&[("controller.log", &log)]),
    );
    for host in &HOSTS[1..] {
        transport = transport.serve_file(
            host,
            REMOTE_ARCHIVE,
            output_archive(&[("disk_server_0.log", "Serial reads: 10\n")]),
        );
    }
    transport
}

fn campaign(transport: &ScriptedTransport, dir: &Path) -> Campaign {
    let topology = Topology::parse(&CampaignFile::parse(CLUSTER).unwrap()).unwrap();
    Campaign::new(
        topology,
        RemoteLayout::for_user("alice"),
        CampaignOptions::new("alice", dir),
        Arc::new(transport.clone()),
    )
}

fn loadgen() -> Loadgen {
    Loadgen {
        stagger: Duration::ZERO,
    }
}

/// Global index of the last command on `host` containing `needle`.
fn last_position(transport: &ScriptedTransport, host: &str, needle: &str) -> Option<usize> {
    transport
        .commands()
        .iter()
        .rposition(|c| c.host == host && c.command.contains(needle))
}

fn sorted(mut hosts: Vec<String>) -> Vec<String> {
    hosts.sort();
    hosts
}

#[tokio::test]
async fn full_campaign_validates_peak_iops() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[100, 200, 300]);
    let mut campaign = campaign(&transport, dir.path());

    let report = campaign.run(&loadgen()).await.unwrap();

    assert_eq!(report.phases.len(), 12);
    assert_eq!(campaign.phase(), CampaignPhase::Validated);
    let read = report.validation.category("read").unwrap();
    assert_eq!(read.total, 600);
    assert!((read.stdev - 100.0).abs() < 1e-9);
    assert_eq!(read.disks, 3);
    assert!(report.teardown_failures.is_empty());
    assert!(report.collection_failures.is_empty());

    // Controller before disk servers, disk servers before clients.
    let controller = transport.position("a", "run.sh controller").unwrap();
    for host in ["b", "c"] {
        let disk = transport.position(host, "run.sh disk_server").unwrap();
        assert!(controller < disk);
        for client in ["d", "e"] {
            assert!(disk < transport.position(client, "run.sh iokerneld").unwrap());
        }
    }
    assert_eq!(
        transport
            .commands_on("b")
            .iter()
            .filter(|c| c.contains("run.sh disk_server"))
            .count(),
        2
    );
    assert!(transport.position("c", "run.sh storage_perf").is_some());
    assert!(transport.position("b", "run.sh storage_perf").is_none());
    for client in ["d", "e"] {
        assert!(transport.position(client, "target/release/synthetic").is_some());
    }

    assert_eq!(sorted(transport.closed_hosts()), HOSTS);
    assert!(dir.path().join("a/home/alice/mit-sandook/sandook-output/controller.log").exists());
    assert!(dir.path().join("loadgen_buckets/loadgen_merged.csv").exists());
}

#[tokio::test]
async fn disks_are_formatted_per_host_before_the_controller_starts() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[1, 2, 3]);
    let topology = Topology::parse(&CampaignFile::parse(CLUSTER).unwrap()).unwrap();
    let mut options = CampaignOptions::new("alice", dir.path());
    options.format_disks = true;
    let mut campaign = Campaign::new(
        topology,
        RemoteLayout::for_user("alice"),
        options,
        Arc::new(transport.clone()),
    );
    campaign.run(&loadgen()).await.unwrap();

    let formats: Vec<String> = transport
        .commands_on("b")
        .into_iter()
        .filter(|c| c.contains("format_disk.sh"))
        .collect();
    assert_eq!(formats.len(), 2);
    assert!(formats[0].contains("0000:65:00.0"));
    assert!(formats[1].contains("0000:66:00.0"));
    let controller = transport.position("a", "run.sh controller").unwrap();
    assert!(transport.position("c", "format_disk.sh 0000:65:00.0").unwrap() < controller);
}

#[tokio::test]
async fn teardown_runs_clients_then_disk_servers_then_controller() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[1, 2, 3]);
    let mut campaign = campaign(&transport, dir.path());
    campaign.run(&loadgen()).await.unwrap();

    let at = |host: &str| last_position(&transport, host, TEARDOWN).unwrap();
    for client in ["d", "e"] {
        for server in ["b", "c"] {
            assert!(at(client) < at(server), "{client} before {server}");
        }
    }
    for server in ["b", "c"] {
        assert!(at(server) < at("a"), "{server} before controller");
    }
}

#[tokio::test]
async fn failing_teardown_does_not_stop_the_rest() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[1, 2, 3]).fail_on_host("c", TEARDOWN);
    let mut campaign = campaign(&transport, dir.path());

    // `c` already fails its pre-emptive teardown while being provisioned.
    let err = campaign.run(&loadgen()).await.unwrap_err();
    assert!(matches!(err, CampaignError::Op(OpError::Provision { ref host, .. }) if host == "c"));
    assert_eq!(campaign.teardown_failures(), ["c"]);

    let c = last_position(&transport, "c", TEARDOWN).unwrap();
    let a = last_position(&transport, "a", TEARDOWN).unwrap();
    assert!(c < a);
    assert_eq!(sorted(transport.closed_hosts()), HOSTS);
}

#[tokio::test]
async fn provisioning_failure_never_starts_the_controller() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[1, 2, 3]).fail_on_host("b", "scripts/setup.sh");
    let mut campaign = campaign(&transport, dir.path());

    let err = campaign.run(&loadgen()).await.unwrap_err();
    assert!(matches!(err, CampaignError::Op(OpError::Provision { ref host, .. }) if host == "b"));
    assert!(transport.position("a", "run.sh controller").is_none());

    // The other hosts finished provisioning regardless.
    for host in ["a", "c", "d", "e"] {
        assert!(transport.position(host, "scaling_governor").is_some(), "{host}");
    }
    assert_eq!(
        campaign.history().last(),
        Some(&CampaignPhase::Collected)
    );
    assert_eq!(sorted(transport.closed_hosts()), HOSTS);
}

#[tokio::test]
async fn unreachable_host_limits_teardown_to_connected_ones() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[1, 2, 3]).refuse_connection("c");
    let mut campaign = campaign(&transport, dir.path());

    let err = campaign.run(&loadgen()).await.unwrap_err();
    assert!(matches!(err, CampaignError::Remote(RemoteError::Connect { .. })));

    assert_eq!(transport.opened_hosts(), ["a", "b"]);
    for host in ["a", "b"] {
        assert_eq!(transport.commands_on(host).iter().filter(|c| c.contains(TEARDOWN)).count(), 1);
    }
    for host in ["c", "d", "e"] {
        assert!(transport.commands_on(host).is_empty(), "{host}");
    }
    assert_eq!(transport.closed_hosts(), ["a", "b"]);
}

#[tokio::test]
async fn missing_disk_report_fails_validation() {
    let dir = tempfile::tempdir().unwrap();
    let transport = serving_cluster(&[100, 200]);
    let mut campaign = campaign(&transport, dir.path());

    let err = campaign.run(&loadgen()).await.unwrap_err();
    assert!(matches!(
        err,
        CampaignError::Validation { ref category, expected: 3, found: 2 } if category == "read"
    ));
    assert_eq!(campaign.phase(), CampaignPhase::Collected);
    assert_eq!(sorted(transport.closed_hosts()), HOSTS);
}

const STORAGE_ONLY: &str = r#"
[machines.m1]
host = "a"
net_iface = "eth0"
roles = ["controller"]

[machines.m1.controller]
ip = "10.0.0.1"
control_plane_scheduler_type = "profile"
data_plane_scheduler_type = "weighted_read"

[machines.m3]
host = "c"
net_iface = "eth0"
roles = ["disk_server_0"]

[machines.m3.disk_server_0]
ip = "10.0.0.4"
disk_pci = "0000:65:00.0"
pre_launch = "storage_perf"
"#;

#[tokio::test]
async fn campaign_without_clients_drives_storage_only() {
    let dir = tempfile::tempdir().unwrap();
    let transport = ScriptedTransport::new()
        .serve_file(
            "a",
            REMOTE_ARCHIVE,
            output_archive(&[("controller.log", &peaks(&[700]))]),
        )
        .serve_file(
            "c",
            REMOTE_ARCHIVE,
            output_archive(&[("disk_server_0.log", "Serial reads: 10\n")]),
        );
    let topology = Topology::parse(&CampaignFile::parse(STORAGE_ONLY).unwrap()).unwrap();
    let mut campaign = Campaign::new(
        topology,
        RemoteLayout::for_user("alice"),
        CampaignOptions::new("alice", dir.path()),
        Arc::new(transport.clone()),
    );

    let report = campaign.run(&ServersOnly).await.unwrap();

    assert_eq!(campaign.phase(), CampaignPhase::Validated);
    assert!(campaign.clients().is_empty());
    let read = report.validation.category("read").unwrap();
    assert_eq!((read.total, read.disks), (700, 1));
    let perf = transport.position("c", "run.sh storage_perf").unwrap();
    let controller = transport.position("a", "run.sh controller").unwrap();
    assert!(perf < controller);
    assert!(transport.position("c", "run.sh disk_server").is_some());
    assert!(transport.commands().iter().all(|c| !c.command.contains("run.sh iokerneld")));
    assert_eq!(sorted(transport.closed_hosts()), ["a", "c"]);
}
