//! Starting the storage system's services and preparing disks and block
//! devices.

use bench_core::layout::{XTERM, scripts};
use bench_core::{ControllerParams, DiskServerParams, PreLaunch};
use benchgrid_remote::CommandLine;
use tracing::{debug, info, warn};

use crate::error::OpResult;
use crate::host::{Failure, HostOps};

impl HostOps {
    /// Launch the controller with its scheduling policies.
    pub async fn start_controller(
        &self,
        host: &str,
        net_iface: &str,
        params: &ControllerParams,
    ) -> OpResult<()> {
        let rejections = u8::from(params.disk_server_rejections);
        let args = format!(
            "controller {net_iface} {} {} {} {} {rejections}",
            self.layout().output_dir(),
            params.ip,
            params.control_plane_scheduler_type,
            params.data_plane_scheduler_type,
        );
        self.checked(host, "controller", Failure::Startup, self.run_script(args))
            .await?;
        info!(%host, ip = %params.ip, "controller started");
        Ok(())
    }

    pub async fn format_disk(&self, host: &str, disk_pci: &str) -> OpResult<()> {
        debug!(%host, %disk_pci, "formatting disk");
        self.checked(
            host,
            "format disk",
            Failure::Provision,
            self.in_code_dir(format!("./{} {disk_pci};", scripts::FORMAT_DISK)),
        )
        .await?;
        Ok(())
    }

    pub async fn start_disk_server(
        &self,
        host: &str,
        net_iface: &str,
        params: &DiskServerParams,
        controller_ip: &str,
    ) -> OpResult<()> {
        let args = format!(
            "disk_server {net_iface} {} {} {} {controller_ip}",
            self.layout().output_dir(),
            params.disk_pci,
            params.ip,
        );
        self.checked(host, "disk_server", Failure::Startup, self.run_script(args))
            .await?;
        info!(%host, disk = %params.disk_pci, ip = %params.ip, "disk server started");
        Ok(())
    }

    /// Profile the disk's performance ahead of the run.
    pub async fn start_storage_perf(
        &self,
        host: &str,
        net_iface: &str,
        disk_pci: &str,
    ) -> OpResult<()> {
        let args = format!(
            "storage_perf {net_iface} {} {disk_pci}",
            self.layout().output_dir()
        );
        self.checked(host, "storage_perf", Failure::Startup, self.run_script(args))
            .await?;
        Ok(())
    }

    /// Fill the disk so reads hit written blocks.
    pub async fn start_disk_pre_fill(
        &self,
        host: &str,
        net_iface: &str,
        disk_pci: &str,
    ) -> OpResult<()> {
        let args = format!(
            "disk_pre_fill {net_iface} {} {disk_pci}",
            self.layout().output_dir()
        );
        self.checked(host, "disk_pre_fill", Failure::Startup, self.run_script(args))
            .await?;
        Ok(())
    }

    /// Apply the disk's pre-launch strategy, if it has one.
    pub async fn pre_launch(
        &self,
        host: &str,
        net_iface: &str,
        params: &DiskServerParams,
    ) -> OpResult<()> {
        let Some(strategy) = params.pre_launch else {
            return Ok(());
        };
        debug!(%host, disk = %params.disk_pci, strategy = strategy.as_str(), "pre-launch");
        match strategy {
            PreLaunch::StoragePerf => {
                self.start_storage_perf(host, net_iface, &params.disk_pci)
                    .await
            }
            PreLaunch::FormatPreFill => {
                self.format_disk(host, &params.disk_pci).await?;
                self.start_disk_pre_fill(host, net_iface, &params.disk_pci)
                    .await
            }
        }
    }

    pub async fn load_ublk_driver(&self, host: &str) -> OpResult<()> {
        self.checked(
            host,
            "load ublk_drv",
            Failure::Provision,
            "sudo modprobe ublk_drv",
        )
        .await?;
        Ok(())
    }

    /// Start one attached block device served over `ip`.
    pub async fn start_blk_dev(&self, host: &str, ip: &str, dev_args: &str) -> OpResult<()> {
        let args = format!("blk_dev {} {ip} {dev_args}", self.layout().output_dir());
        self.checked(host, "blk_dev", Failure::Startup, self.run_script(args))
            .await?;
        debug!(%host, %ip, "block device started");
        Ok(())
    }

    /// Make a filesystem on `/dev/<dev_id>` and mount it.
    pub async fn mount_ublk_dev(&self, host: &str, dev_id: &str) -> OpResult<()> {
        let mount_point = &self.layout().mount_point;
        let cmd = CommandLine::new()
            .arg(XTERM)
            .arg(format!("sudo mkfs.ext4 /dev/{dev_id} -D;"))
            .arg(format!("sudo fsck.ext4 /dev/{dev_id};"))
            .arg(format!("sudo mkdir -p {mount_point};"))
            .arg(format!("sudo mount /dev/{dev_id} {mount_point}/;"));
        self.checked(host, "mount blk_dev", Failure::Provision, cmd)
            .await?;
        info!(%host, %dev_id, %mount_point, "block device mounted");
        Ok(())
    }

    /// Unmount the attached device. Failures are logged, never raised.
    pub async fn umount_ublk_dev(&self, host: &str) -> OpResult<bool> {
        let cmd = [
            XTERM.to_string(),
            format!("sudo umount {}/", self.layout().mount_point),
        ];
        let ok = self.pool().run(host, cmd).await?;
        if !ok {
            warn!(%host, "cannot unmount block device");
        }
        Ok(ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::test_support::ops_with;
    use benchgrid_remote::ScriptedTransport;

    fn disk(pre_launch: Option<PreLaunch>) -> DiskServerParams {
        DiskServerParams {
            ip: "10.0.0.2".to_string(),
            disk_pci: "0000:65:00.0".to_string(),
            pre_launch,
        }
    }

    #[tokio::test]
    async fn controller_flags_are_positional() {
        let transport = ScriptedTransport::new();
        let ops = ops_with(transport.clone(), &["n1"]).await;
        let params = ControllerParams {
            ip: "10.0.0.1".to_string(),
            control_plane_scheduler_type: "profile".to_string(),
            data_plane_scheduler_type: "weighted".to_string(),
            disk_server_rejections: true,
        };
        ops.start_controller("n1", "eth0", &params).await.unwrap();
        assert_eq!(
            transport.commands_on("n1"),
            vec![
                "TERM=xterm cd /home/alice/mit-sandook/sandook; ./scripts/run.sh controller eth0 \
                 /home/alice/mit-sandook/sandook-output 10.0.0.1 profile weighted 1"
                    .to_string()
            ]
        );
    }

    #[tokio::test]
    async fn disk_server_points_at_controller() {
        let transport = ScriptedTransport::new();
        let ops = ops_with(transport.clone(), &["n2"]).await;
        ops.start_disk_server("n2", "eth0", &disk(None), "10.0.0.1")
            .await
            .unwrap();
        let cmd = &transport.commands_on("n2")[0];
        assert!(cmd.ends_with(
            "disk_server eth0 /home/alice/mit-sandook/sandook-output 0000:65:00.0 10.0.0.2 10.0.0.1"
        ));
    }

    #[tokio::test]
    async fn pre_launch_strategies() {
        let transport = ScriptedTransport::new();
        let ops = ops_with(transport.clone(), &["n2"]).await;

        ops.pre_launch("n2", "eth0", &disk(None)).await.unwrap();
        assert!(transport.commands_on("n2").is_empty());

        ops.pre_launch("n2", "eth0", &disk(Some(PreLaunch::StoragePerf)))
            .await
            .unwrap();
        ops.pre_launch("n2", "eth0", &disk(Some(PreLaunch::FormatPreFill)))
            .await
            .unwrap();
        let cmds = transport.commands_on("n2");
        assert_eq!(cmds.len(), 3);
        assert!(cmds[0].contains("run.sh storage_perf eth0"));
        assert!(cmds[1].contains("format_disk.sh 0000:65:00.0;"));
        assert!(cmds[2].contains("run.sh disk_pre_fill eth0"));
    }

    #[tokio::test]
    async fn disk_server_failure_is_a_startup_error() {
        let transport = ScriptedTransport::new().fail_on("disk_server");
        let ops = ops_with(transport, &["n2"]).await;
        let err = ops
            .start_disk_server("n2", "eth0", &disk(None), "10.0.0.1")
            .await
            .unwrap_err();
        assert!(matches!(err, OpError::Startup { action: "disk_server", .. }));
    }

    #[tokio::test]
    async fn mount_and_unmount() {
        let transport = ScriptedTransport::new().fail_on("umount");
        let ops = ops_with(transport.clone(), &["c1"]).await;
        ops.mount_ublk_dev("c1", "ublkb0").await.unwrap();
        assert!(!ops.umount_ublk_dev("c1").await.unwrap());
        let cmds = transport.commands_on("c1");
        assert!(cmds[0].contains("sudo mkfs.ext4 /dev/ublkb0 -D;"));
        assert!(cmds[0].ends_with("sudo mount /dev/ublkb0 /mnt/sandook/;"));
        assert!(cmds[1].ends_with("sudo umount /mnt/sandook/"));
    }
}
