//! Campaign topology — which host plays which role.
//!
//! Built once from a [`CampaignFile`] and never mutated afterwards. Every
//! other component reads host lists and role parameters from here.

use std::collections::HashMap;
use std::path::Path;

use thiserror::Error;
use tracing::debug;

use crate::config::CampaignFile;
use crate::types::*;

pub type TopologyResult<T> = Result<T, TopologyError>;

/// Errors raised while turning a campaign file into a topology.
#[derive(Debug, Error)]
pub enum TopologyError {
    #[error("cannot read campaign file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed campaign file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid machine entry {machine}: {source}")]
    InvalidMachine {
        machine: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("host {0} is declared by more than one machine entry")]
    DuplicateHost(String),

    #[error("host {host}: unknown role {role}")]
    UnknownRole { host: String, role: String },

    #[error("host {host}: role {role} has no parameter table")]
    MissingRoleParams { host: String, role: String },

    #[error("host {host}: invalid parameters for role {role}: {reason}")]
    InvalidRoleParams {
        host: String,
        role: String,
        reason: String,
    },

    #[error("no host declares the controller role")]
    NoController,

    #[error("controller role declared on both {first} and {second}")]
    MultipleControllers { first: String, second: String },

    #[error("ip {ip} is used by both {first} and {second}")]
    DuplicateIp {
        ip: String,
        first: String,
        second: String,
    },
}

/// Typed, validated role assignment for one campaign.
#[derive(Debug, Clone)]
pub struct Topology {
    hosts: Vec<HostSpec>,
    controller: ControllerSpec,
    disk_servers: Vec<DiskServerHost>,
    clients: Vec<ClientSpec>,
}

impl Topology {
    /// Read and validate a campaign file.
    pub fn from_file(path: &Path) -> TopologyResult<Self> {
        Self::parse(&CampaignFile::from_file(path)?)
    }

    /// Validate a parsed campaign file.
    pub fn parse(file: &CampaignFile) -> TopologyResult<Self> {
        let mut hosts: Vec<HostSpec> = Vec::new();
        let mut controller: Option<ControllerSpec> = None;
        let mut disk_servers: Vec<DiskServerHost> = Vec::new();
        let mut clients: Vec<ClientSpec> = Vec::new();
        // ip → "host/role" of the first claimant.
        let mut ip_owners: HashMap<String, String> = HashMap::new();

        for (_key, machine) in file.machine_entries()? {
            let hostname = machine.host.clone();
            if hosts.iter().any(|h| h.hostname == hostname) {
                return Err(TopologyError::DuplicateHost(hostname));
            }

            let mut roles = Vec::with_capacity(machine.roles.len());
            for role_key in &machine.roles {
                let role = parse_role(&hostname, role_key, &machine.params)?;

                for ip in role.ips() {
                    let owner = format!("{hostname}/{role_key}");
                    if let Some(first) = ip_owners.get(ip) {
                        return Err(TopologyError::DuplicateIp {
                            ip: ip.to_string(),
                            first: first.clone(),
                            second: owner,
                        });
                    }
                    ip_owners.insert(ip.to_string(), owner);
                }

                match &role {
                    Role::Controller(params) => {
                        if let Some(existing) = &controller {
                            return Err(TopologyError::MultipleControllers {
                                first: existing.host.clone(),
                                second: hostname.clone(),
                            });
                        }
                        controller = Some(ControllerSpec {
                            host: hostname.clone(),
                            net_iface: machine.net_iface.clone(),
                            params: params.clone(),
                        });
                    }
                    Role::DiskServer(params) => {
                        let disk = DiskServerSpec {
                            host: hostname.clone(),
                            net_iface: machine.net_iface.clone(),
                            params: params.clone(),
                        };
                        match disk_servers.iter_mut().find(|d| d.host == hostname) {
                            Some(entry) => entry.disks.push(disk),
                            None => disk_servers.push(DiskServerHost {
                                host: hostname.clone(),
                                net_iface: machine.net_iface.clone(),
                                disks: vec![disk],
                            }),
                        }
                    }
                    Role::Client(params) => clients.push(ClientSpec {
                        host: hostname.clone(),
                        net_iface: machine.net_iface.clone(),
                        params: params.clone(),
                    }),
                }
                roles.push(role);
            }

            debug!(host = %hostname, roles = roles.len(), "parsed machine");
            hosts.push(HostSpec {
                hostname,
                net_iface: machine.net_iface,
                roles,
            });
        }

        let controller = controller.ok_or(TopologyError::NoController)?;

        Ok(Self {
            hosts,
            controller,
            disk_servers,
            clients,
        })
    }

    pub fn hosts(&self) -> &[HostSpec] {
        &self.hosts
    }

    /// Every declared hostname, in declaration order.
    pub fn hostnames(&self) -> Vec<&str> {
        self.hosts.iter().map(|h| h.hostname.as_str()).collect()
    }

    pub fn host(&self, hostname: &str) -> Option<&HostSpec> {
        self.hosts.iter().find(|h| h.hostname == hostname)
    }

    pub fn controller(&self) -> &ControllerSpec {
        &self.controller
    }

    pub fn controller_host(&self) -> &str {
        &self.controller.host
    }

    pub fn controller_ip(&self) -> &str {
        &self.controller.params.ip
    }

    pub fn disk_server_hosts(&self) -> &[DiskServerHost] {
        &self.disk_servers
    }

    pub fn disk_servers_on(&self, hostname: &str) -> Option<&DiskServerHost> {
        self.disk_servers.iter().find(|d| d.host == hostname)
    }

    /// Number of disk-server instances across all hosts.
    pub fn disk_count(&self) -> usize {
        self.disk_servers.iter().map(|d| d.disks.len()).sum()
    }

    pub fn clients(&self) -> &[ClientSpec] {
        &self.clients
    }

    /// Hostname of every client instance; repeats when a host runs several.
    pub fn client_hostnames(&self) -> Vec<&str> {
        self.clients.iter().map(|c| c.host.as_str()).collect()
    }

    pub fn is_client(&self, hostname: &str) -> bool {
        self.clients.iter().any(|c| c.host == hostname)
    }

    pub fn is_disk_server(&self, hostname: &str) -> bool {
        self.disk_servers_on(hostname).is_some()
    }

    /// Hosts in teardown order: clients, then disk-server hosts, then the
    /// controller host.
    ///
    /// A host playing several roles appears once, at the position of the
    /// last group it belongs to, so it outlives everything that depends on
    /// any of its roles.
    pub fn teardown_order(&self) -> Vec<&str> {
        let mut ordered: Vec<&str> = Vec::new();
        ordered.extend(self.clients.iter().map(|c| c.host.as_str()));
        ordered.extend(self.disk_servers.iter().map(|d| d.host.as_str()));
        ordered.push(self.controller.host.as_str());

        let mut result: Vec<&str> = Vec::new();
        for (i, host) in ordered.iter().enumerate() {
            if !ordered[i + 1..].contains(host) {
                result.push(*host);
            }
        }
        result
    }
}

fn parse_role(host: &str, role_key: &str, params: &toml::Table) -> TopologyResult<Role> {
    let kind = RoleKind::from_key(role_key).ok_or_else(|| TopologyError::UnknownRole {
        host: host.to_string(),
        role: role_key.to_string(),
    })?;
    let table = params
        .get(role_key)
        .cloned()
        .ok_or_else(|| TopologyError::MissingRoleParams {
            host: host.to_string(),
            role: role_key.to_string(),
        })?;

    let invalid = |reason: String| TopologyError::InvalidRoleParams {
        host: host.to_string(),
        role: role_key.to_string(),
        reason,
    };

    let role = match kind {
        RoleKind::Controller => Role::Controller(
            table
                .try_into::<ControllerParams>()
                .map_err(|e| invalid(e.to_string()))?,
        ),
        RoleKind::DiskServer => Role::DiskServer(
            table
                .try_into::<DiskServerParams>()
                .map_err(|e| invalid(e.to_string()))?,
        ),
        RoleKind::Client => {
            let client = table
                .try_into::<ClientParams>()
                .map_err(|e| invalid(e.to_string()))?;
            if client.cores == 0 {
                return Err(invalid("cores must be at least 1".to_string()));
            }
            if client.with_ublk_dev && (client.num_ublk_devs as usize) > client.ublk_dev_args.len()
            {
                return Err(invalid(format!(
                    "num_ublk_devs = {} but only {} ublk_dev_args given",
                    client.num_ublk_devs,
                    client.ublk_dev_args.len()
                )));
            }
            Role::Client(client)
        }
    };
    Ok(role)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> TopologyResult<Topology> {
        Topology::parse(&CampaignFile::parse(toml_str)?)
    }

    const CONTROLLER: &str = r#"
[machines.a]
host = "A"
net_iface = "eth0"
roles = ["controller"]

[machines.a.controller]
ip = "10.0.0.1"
control_plane_scheduler_type = "cp"
data_plane_scheduler_type = "dp"
"#;

    fn disk_host(key: &str, host: &str, first_ip: u32, disks: u32) -> String {
        let roles: Vec<String> = (0..disks).map(|i| format!("\"disk_server_{i}\"")).collect();
        let mut out = format!(
            "\n[machines.{key}]\nhost = \"{host}\"\nnet_iface = \"eth0\"\nroles = [{}]\n",
            roles.join(", ")
        );
        for i in 0..disks {
            out.push_str(&format!(
                "\n[machines.{key}.disk_server_{i}]\nip = \"10.0.1.{}\"\ndisk_pci = \"0000:{:02x}:00.0\"\n",
                first_ip + i,
                i + 1
            ));
        }
        out
    }

    fn client_host(key: &str, host: &str, ip: &str) -> String {
        format!(
            "\n[machines.{key}]\nhost = \"{host}\"\nnet_iface = \"eth0\"\nroles = [\"client_0\"]\n\n[machines.{key}.client_0]\nip = \"{ip}\"\ncores = 4\nargs = \"--threads 4\"\n"
        )
    }

    #[test]
    fn disk_instances_are_counted_across_any_distribution() {
        for split in [(0, 0), (1, 0), (3, 0), (2, 2), (1, 4), (0, 5)] {
            let mut doc = CONTROLLER.to_string();
            if split.0 > 0 {
                doc.push_str(&disk_host("b", "B", 10, split.0));
            }
            if split.1 > 0 {
                doc.push_str(&disk_host("c", "C", 100, split.1));
            }
            let topo = parse(&doc).unwrap();
            assert_eq!(topo.disk_count(), (split.0 + split.1) as usize);
        }
    }

    #[test]
    fn missing_controller_is_rejected() {
        let doc = disk_host("b", "B", 10, 2);
        assert!(matches!(parse(&doc), Err(TopologyError::NoController)));

        let doc = client_host("d", "D", "10.0.2.1");
        assert!(matches!(parse(&doc), Err(TopologyError::NoController)));
    }

    #[test]
    fn second_controller_is_rejected() {
        let doc = format!(
            "{CONTROLLER}\n[machines.b]\nhost = \"B\"\nnet_iface = \"eth0\"\nroles = [\"controller\"]\n\n[machines.b.controller]\nip = \"10.0.0.9\"\ncontrol_plane_scheduler_type = \"cp\"\ndata_plane_scheduler_type = \"dp\"\n"
        );
        assert!(matches!(
            parse(&doc),
            Err(TopologyError::MultipleControllers { .. })
        ));
    }

    #[test]
    fn missing_role_table_is_rejected() {
        let doc = "[machines.a]\nhost = \"A\"\nnet_iface = \"eth0\"\nroles = [\"controller\"]\n";
        assert!(matches!(
            parse(doc),
            Err(TopologyError::MissingRoleParams { .. })
        ));
    }

    #[test]
    fn missing_required_parameter_is_rejected() {
        let doc = format!(
            "{CONTROLLER}\n[machines.b]\nhost = \"B\"\nnet_iface = \"eth0\"\nroles = [\"disk_server_0\"]\n\n[machines.b.disk_server_0]\nip = \"10.0.1.1\"\n"
        );
        match parse(&doc) {
            Err(TopologyError::InvalidRoleParams { host, role, reason }) => {
                assert_eq!(host, "B");
                assert_eq!(role, "disk_server_0");
                assert!(reason.contains("disk_pci"), "{reason}");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_role_is_rejected() {
        let doc = format!(
            "{CONTROLLER}\n[machines.b]\nhost = \"B\"\nnet_iface = \"eth0\"\nroles = [\"switch\"]\n\n[machines.b.switch]\nip = \"10.0.9.9\"\n"
        );
        assert!(matches!(parse(&doc), Err(TopologyError::UnknownRole { .. })));
    }

    #[test]
    fn reused_ip_is_rejected() {
        let mut doc = CONTROLLER.to_string();
        doc.push_str(&client_host("d", "D", "10.0.0.1"));
        match parse(&doc) {
            Err(TopologyError::DuplicateIp { ip, first, second }) => {
                assert_eq!(ip, "10.0.0.1");
                assert_eq!(first, "A/controller");
                assert_eq!(second, "D/client_0");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn duplicate_host_is_rejected() {
        let mut doc = CONTROLLER.to_string();
        doc.push_str(&client_host("d", "D", "10.0.2.1"));
        doc.push_str(&client_host("e", "D", "10.0.2.2"));
        assert!(matches!(parse(&doc), Err(TopologyError::DuplicateHost(h)) if h == "D"));
    }

    #[test]
    fn flat_lists_follow_declaration_order() {
        let mut doc = CONTROLLER.to_string();
        doc.push_str(&disk_host("b", "B", 10, 2));
        doc.push_str(&disk_host("c", "C", 100, 1));
        doc.push_str(&client_host("d", "D", "10.0.2.1"));
        doc.push_str(&client_host("e", "E", "10.0.2.2"));
        let topo = parse(&doc).unwrap();

        assert_eq!(topo.hostnames(), vec!["A", "B", "C", "D", "E"]);
        assert_eq!(topo.controller_host(), "A");
        assert_eq!(topo.controller_ip(), "10.0.0.1");
        assert_eq!(topo.client_hostnames(), vec!["D", "E"]);
        assert_eq!(
            topo.disk_servers_on("B").unwrap().disk_pcis(),
            vec!["0000:01:00.0", "0000:02:00.0"]
        );
        assert!(topo.is_disk_server("C"));
        assert!(!topo.is_client("A"));
        assert_eq!(topo.teardown_order(), vec!["D", "E", "B", "C", "A"]);
    }

    #[test]
    fn shared_host_is_torn_down_with_its_last_role() {
        let doc = r#"
[machines.a]
host = "A"
net_iface = "eth0"
roles = ["controller", "client_0", "disk_server_0"]

[machines.a.controller]
ip = "10.0.0.1"
control_plane_scheduler_type = "cp"
data_plane_scheduler_type = "dp"

[machines.a.client_0]
ip = "10.0.0.2"
cores = 2

[machines.a.disk_server_0]
ip = "10.0.0.3"
disk_pci = "0000:01:00.0"

[machines.b]
host = "B"
net_iface = "eth1"
roles = ["client_0"]

[machines.b.client_0]
ip = "10.0.0.4"
cores = 2
"#;
        let topo = parse(doc).unwrap();
        assert_eq!(topo.teardown_order(), vec!["B", "A"]);
        assert_eq!(topo.host("A").unwrap().roles.len(), 3);
    }

    #[test]
    fn client_with_too_few_device_args_is_rejected() {
        let mut doc = CONTROLLER.to_string();
        doc.push_str(
            "\n[machines.d]\nhost = \"D\"\nnet_iface = \"eth0\"\nroles = [\"client_0\"]\n\n[machines.d.client_0]\nip = \"10.0.2.1\"\ncores = 4\nwith_ublk_dev = true\nnum_ublk_devs = 2\nublk_dev_args = [\"0-3\"]\n",
        );
        assert!(matches!(
            parse(&doc),
            Err(TopologyError::InvalidRoleParams { .. })
        ));
    }

    #[test]
    fn from_file_reads_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("campaign.toml");
        std::fs::write(&path, CONTROLLER).unwrap();
        let topo = Topology::from_file(&path).unwrap();
        assert_eq!(topo.disk_count(), 0);

        let missing = Topology::from_file(&dir.path().join("nope.toml"));
        assert!(matches!(missing, Err(TopologyError::Read { .. })));
    }
}
