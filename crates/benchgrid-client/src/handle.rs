//! Client runtime handle.

use std::path::{Path, PathBuf};
use std::time::Duration;

use bench_core::{ClientIp, ClientParams, ClientSpec};
use benchgrid_ops::HostOps;
use benchgrid_ops::host::failure_detail;
use benchgrid_remote::CommandLine;
use tracing::{debug, error, info, warn};

use crate::cpu::CpuTopology;
use crate::error::{ClientError, ClientResult};
use crate::generated;

const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);
const LIST_UBLK_DEVICES: &str = "sudo lsblk -d -o name | grep ublk";

/// Everything the workload needs to drive one client instance: its
/// addresses, generated configs, CPU layout and attached block devices.
pub struct ClientHandle {
    hostname: String,
    net_iface: String,
    params: ClientParams,
    local_output_dir: PathBuf,
    topology: CpuTopology,
    sandook_config_path: String,
    virtual_disk_config_path: String,
    block_devices: Vec<String>,
    ops: HostOps,
}

impl ClientHandle {
    /// Generate the per-run configs and discover the CPU layout of the
    /// client's host. Block devices are attached separately, once the
    /// host's network runtime is up; see [`ClientHandle::attach_block_devices`].
    pub async fn setup(
        ops: &HostOps,
        spec: &ClientSpec,
        controller_ip: &str,
        local_output_dir: &Path,
    ) -> ClientResult<Self> {
        let host = spec.host.as_str();
        let ip = spec.params.ip.primary();
        let stamp = generated::file_stamp();

        let (virtual_disk_config_path, cmd) =
            generated::virtual_disk_config(ops.layout(), &stamp, ip, spec.params.cores);
        generate(ops, host, "runtime config", cmd).await?;

        let (sandook_config_path, cmd) =
            generated::sandook_config(ops.layout(), &stamp, ip, controller_ip);
        generate(ops, host, "storage config", cmd).await?;

        let topology = discover_topology(ops, host).await?;

        let handle = Self {
            hostname: host.to_string(),
            net_iface: spec.net_iface.clone(),
            params: spec.params.clone(),
            local_output_dir: local_output_dir.join(host),
            topology,
            sandook_config_path,
            virtual_disk_config_path,
            block_devices: Vec::new(),
            ops: ops.clone(),
        };
        info!(%host, %ip, cores = handle.params.cores, "client ready");
        Ok(handle)
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn net_iface(&self) -> &str {
        &self.net_iface
    }

    pub fn ip(&self) -> &ClientIp {
        &self.params.ip
    }

    pub fn cores(&self) -> u32 {
        self.params.cores
    }

    pub fn app(&self) -> &str {
        &self.params.app
    }

    /// Arguments passed through to the workload binary.
    pub fn args(&self) -> &str {
        &self.params.args
    }

    /// `<campaign output dir>/<hostname>`, where this host's output lands.
    pub fn local_output_dir(&self) -> &Path {
        &self.local_output_dir
    }

    pub fn topology(&self) -> &CpuTopology {
        &self.topology
    }

    pub fn sandook_config_path(&self) -> &str {
        &self.sandook_config_path
    }

    pub fn virtual_disk_config_path(&self) -> &str {
        &self.virtual_disk_config_path
    }

    /// Names of the attached block devices, in start order.
    pub fn block_devices(&self) -> &[String] {
        &self.block_devices
    }

    pub fn ops(&self) -> &HostOps {
        &self.ops
    }

    /// First `n` hardware threads of the host; see [`CpuTopology::get_ht`].
    pub fn get_ht(&self, n: usize) -> ClientResult<Vec<u32>> {
        self.topology.get_ht(n)
    }

    /// Reserve the application's cores with a `cset` shield. A shield that
    /// cannot be set is logged, not raised.
    pub async fn set_shield_on_app_cores(&self) -> ClientResult<()> {
        let cpus = self.get_ht(self.params.cores as usize)?;
        let list = cpus
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        let cmd = CommandLine::new()
            .arg("sudo cset shield --reset;")
            .arg(format!("sudo cset shield --cpu={list} -k on;"));
        if !self.ops.pool().run(&self.hostname, cmd).await? {
            error!(host = %self.hostname, cpus = %list, "failed to set shield");
        }
        Ok(())
    }

    /// Load the driver, start every configured device and wait for each to
    /// show up, then mount the first one if asked. Does nothing for clients
    /// without attached devices.
    pub async fn attach_block_devices(&mut self) -> ClientResult<()> {
        if !self.params.with_ublk_dev {
            return Ok(());
        }
        self.ops.load_ublk_driver(&self.hostname).await?;
        for index in 0..self.params.num_ublk_devs as usize {
            let ip = self
                .params
                .ip
                .for_device(index)
                .ok_or_else(|| ClientError::NoDeviceAddress {
                    host: self.hostname.clone(),
                    index,
                })?
                .to_string();
            let dev_args = self
                .params
                .ublk_dev_args
                .get(index)
                .map(String::as_str)
                .unwrap_or("");
            // Devices already on the host may belong to another instance.
            let before = self.list_devices().await?;
            self.ops.start_blk_dev(&self.hostname, &ip, dev_args).await?;
            let device = self.wait_for_new_device(&before).await?;
            debug!(host = %self.hostname, %device, %ip, "block device attached");
            self.block_devices.push(device);
        }
        if self.params.mount_ublk {
            if let Some(device) = self.block_devices.first() {
                self.ops.mount_ublk_dev(&self.hostname, device).await?;
            } else {
                warn!(host = %self.hostname, "mount requested but no block device was started");
            }
        }
        Ok(())
    }

    /// `ublk` block devices currently present on the host. `grep` exits
    /// non-zero when there are none.
    async fn list_devices(&self) -> ClientResult<Vec<String>> {
        let output = self
            .ops
            .pool()
            .run_with_output(&self.hostname, LIST_UBLK_DEVICES)
            .await?;
        if !output.ok {
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .lines()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Poll the host's block devices once a second until one missing from
    /// `before` appears.
    async fn wait_for_new_device(&self, before: &[String]) -> ClientResult<String> {
        let limit = self.params.wait_ublk_dev_sec;
        for _ in 0..limit {
            let fresh = self
                .list_devices()
                .await?
                .into_iter()
                .find(|name| !before.contains(name));
            if let Some(name) = fresh {
                return Ok(name);
            }
            tokio::time::sleep(DEVICE_POLL_INTERVAL).await;
        }
        Err(ClientError::DeviceTimeout {
            host: self.hostname.clone(),
            waited: Duration::from_secs(limit),
        })
    }

    /// Release what the handle set up on its host.
    pub async fn teardown(&self) -> ClientResult<()> {
        if self.params.with_ublk_dev && self.params.mount_ublk {
            self.ops.umount_ublk_dev(&self.hostname).await?;
        }
        Ok(())
    }
}

async fn generate(
    ops: &HostOps,
    host: &str,
    file: &'static str,
    cmd: CommandLine,
) -> ClientResult<()> {
    let output = ops.pool().run_with_output(host, cmd).await?;
    if !output.ok {
        return Err(ClientError::ConfigGeneration {
            host: host.to_string(),
            file,
            detail: failure_detail(&output),
        });
    }
    Ok(())
}

/// An unreadable topology leaves the handle without CPUs; any later
/// selection then fails with a capacity error.
async fn discover_topology(ops: &HostOps, host: &str) -> ClientResult<CpuTopology> {
    let output = ops
        .pool()
        .run_with_output(host, "lscpu --parse=CPU,Core,Node")
        .await?;
    if !output.ok {
        warn!(%host, stderr = %output.stderr.trim(), "cannot read machine topology");
        return Ok(CpuTopology::default());
    }
    Ok(CpuTopology::parse(&output.stdout))
}
