//! Role types shared across benchgrid crates.

use serde::{Deserialize, Serialize};

/// The closed set of roles a host can play in a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoleKind {
    Controller,
    DiskServer,
    Client,
}

impl RoleKind {
    /// Classify a role key from the campaign file.
    ///
    /// Keys are a role name optionally followed by a suffix that makes them
    /// unique within a machine (`disk_server_0`, `client_1`).
    pub fn from_key(key: &str) -> Option<Self> {
        if key.starts_with("controller") {
            Some(RoleKind::Controller)
        } else if key.starts_with("disk_server") {
            Some(RoleKind::DiskServer)
        } else if key.starts_with("client") {
            Some(RoleKind::Client)
        } else {
            None
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoleKind::Controller => "controller",
            RoleKind::DiskServer => "disk_server",
            RoleKind::Client => "client",
        }
    }
}

/// A role instance with its typed parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Controller(ControllerParams),
    DiskServer(DiskServerParams),
    Client(ClientParams),
}

impl Role {
    pub fn kind(&self) -> RoleKind {
        match self {
            Role::Controller(_) => RoleKind::Controller,
            Role::DiskServer(_) => RoleKind::DiskServer,
            Role::Client(_) => RoleKind::Client,
        }
    }

    /// Every IP address this role instance claims.
    pub fn ips(&self) -> Vec<&str> {
        match self {
            Role::Controller(p) => vec![p.ip.as_str()],
            Role::DiskServer(p) => vec![p.ip.as_str()],
            Role::Client(p) => p.ip.all(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerParams {
    pub ip: String,
    pub control_plane_scheduler_type: String,
    pub data_plane_scheduler_type: String,
    #[serde(default)]
    pub disk_server_rejections: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskServerParams {
    pub ip: String,
    pub disk_pci: String,
    #[serde(default)]
    pub pre_launch: Option<PreLaunch>,
}

/// Preconditioning applied to a disk before its server starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreLaunch {
    /// Raw-performance baseline pass over the disk.
    StoragePerf,
    /// Format the disk, then prefill it.
    FormatPreFill,
}

impl PreLaunch {
    pub fn as_str(&self) -> &'static str {
        match self {
            PreLaunch::StoragePerf => "storage_perf",
            PreLaunch::FormatPreFill => "format_pre_fill",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientParams {
    pub ip: ClientIp,
    pub cores: u32,
    #[serde(default = "default_app")]
    pub app: String,
    #[serde(default)]
    pub args: String,
    #[serde(default)]
    pub with_ublk_dev: bool,
    #[serde(default = "default_wait_ublk_dev_sec")]
    pub wait_ublk_dev_sec: u64,
    #[serde(default)]
    pub mount_ublk: bool,
    #[serde(default)]
    pub num_ublk_devs: u32,
    #[serde(default = "default_ublk_dev_args")]
    pub ublk_dev_args: Vec<String>,
}

fn default_app() -> String {
    "loadgen".to_string()
}

fn default_wait_ublk_dev_sec() -> u64 {
    30
}

fn default_ublk_dev_args() -> Vec<String> {
    vec![String::new()]
}

/// A client's address: one IP, or one per path for multi-path clients.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ClientIp {
    Single(String),
    Multi(Vec<String>),
}

impl ClientIp {
    /// The address written into generated configuration files.
    pub fn primary(&self) -> &str {
        match self {
            ClientIp::Single(ip) => ip,
            ClientIp::Multi(ips) => ips.first().map(String::as_str).unwrap_or(""),
        }
    }

    /// Address used by the `index`-th attached block device.
    pub fn for_device(&self, index: usize) -> Option<&str> {
        match self {
            ClientIp::Single(ip) => Some(ip),
            ClientIp::Multi(ips) => ips.get(index).map(String::as_str),
        }
    }

    pub fn all(&self) -> Vec<&str> {
        match self {
            ClientIp::Single(ip) => vec![ip.as_str()],
            ClientIp::Multi(ips) => ips.iter().map(String::as_str).collect(),
        }
    }
}

/// A host as declared in the campaign file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostSpec {
    pub hostname: String,
    pub net_iface: String,
    pub roles: Vec<Role>,
}

/// The controller role bound to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerSpec {
    pub host: String,
    pub net_iface: String,
    pub params: ControllerParams,
}

/// One disk-server instance (one physical disk) bound to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskServerSpec {
    pub host: String,
    pub net_iface: String,
    pub params: DiskServerParams,
}

/// All disk-server instances of a single host, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiskServerHost {
    pub host: String,
    pub net_iface: String,
    pub disks: Vec<DiskServerSpec>,
}

impl DiskServerHost {
    pub fn disk_pcis(&self) -> Vec<&str> {
        self.disks.iter().map(|d| d.params.disk_pci.as_str()).collect()
    }
}

/// One client instance bound to its host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientSpec {
    pub host: String,
    pub net_iface: String,
    pub params: ClientParams,
}
