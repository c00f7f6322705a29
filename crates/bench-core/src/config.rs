//! Campaign file parser.
//!
//! The file is TOML. Every entry under `[machines]` names a host, its
//! network interface and an ordered list of role keys; each role key has
//! its own parameter table inside the machine entry:
//!
//! ```toml
//! [machines.m1]
//! host = "node1"
//! net_iface = "ens1f0np0"
//! roles = ["controller", "disk_server_0"]
//!
//! [machines.m1.controller]
//! ip = "10.0.0.1"
//! control_plane_scheduler_type = "profile"
//! data_plane_scheduler_type = "weighted_read"
//!
//! [machines.m1.disk_server_0]
//! ip = "10.0.0.2"
//! disk_pci = "0000:65:00.0"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::topology::{TopologyError, TopologyResult};

/// Raw campaign file, before role validation.
#[derive(Debug, Clone, Deserialize)]
pub struct CampaignFile {
    /// Overrides for the remote directory layout.
    #[serde(default)]
    pub layout: Option<LayoutConfig>,
    /// Machine key → machine entry. Declaration order is preserved.
    pub machines: toml::Table,
}

/// One `[machines.<key>]` entry.
///
/// Role parameter tables are kept as raw TOML until the topology decides
/// which typed parameter struct each role key maps to.
#[derive(Debug, Clone, Deserialize)]
pub struct MachineConfig {
    pub host: String,
    pub net_iface: String,
    pub roles: Vec<String>,
    #[serde(flatten)]
    pub params: toml::Table,
}

/// Optional `[layout]` section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LayoutConfig {
    pub code_parent_dir: Option<String>,
    pub repository_url: Option<String>,
    pub traces_dir: Option<String>,
    pub mount_point: Option<String>,
}

impl CampaignFile {
    pub fn from_file(path: &Path) -> TopologyResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| TopologyError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> TopologyResult<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Decode every machine entry, in declaration order.
    pub fn machine_entries(&self) -> TopologyResult<Vec<(String, MachineConfig)>> {
        self.machines
            .iter()
            .map(|(key, value)| {
                let machine = value
                    .clone()
                    .try_into::<MachineConfig>()
                    .map_err(|source| TopologyError::InvalidMachine {
                        machine: key.clone(),
                        source,
                    })?;
                Ok((key.clone(), machine))
            })
            .collect()
    }
}
