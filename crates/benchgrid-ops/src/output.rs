//! Moving run artifacts from the hosts to the orchestrating machine.

use std::path::{Path, PathBuf};

use benchgrid_remote::CommandOutput;
use tokio::process::Command;
use tracing::debug;

use crate::error::{OpError, OpResult};
use crate::host::{Failure, HostOps, failure_detail};

/// Name of the archive fetched from every host.
pub const OUTPUT_ARCHIVE: &str = "output.tar.gz";

impl HostOps {
    /// Copy the in-memory traces into the remote output directory so they
    /// are picked up by [`HostOps::fetch_output`].
    pub async fn gather_traces(&self, host: &str) -> OpResult<()> {
        let layout = self.layout();
        self.checked(
            host,
            "gather traces",
            Failure::Provision,
            format!("cp {}/* {}", layout.traces_dir, layout.output_dir()),
        )
        .await?;
        debug!(%host, "gathered traces");
        Ok(())
    }

    /// Archive the remote output directory, fetch it and unpack it into
    /// `<local_output_dir>/<host>`. Returns that directory.
    pub async fn fetch_output(&self, host: &str, local_output_dir: &Path) -> OpResult<PathBuf> {
        let layout = self.layout();
        let archive = layout.compressed_output();
        self.checked(
            host,
            "compress output",
            Failure::Provision,
            [
                format!("rm -rf {archive};"),
                format!("tar -czf {archive} {}", layout.output_dir()),
            ],
        )
        .await?;

        let host_dir = local_output_dir.join(host);
        self.setup_local_output_dir(&host_dir).await?;

        let local_archive = host_dir.join(OUTPUT_ARCHIVE);
        self.pool().fetch(host, &archive, &local_archive).await?;

        debug!(host = "local", dir = %host_dir.display(), archive = OUTPUT_ARCHIVE, "unpacking output");
        let unpacked = Command::new("tar")
            .arg("-xzf")
            .arg(OUTPUT_ARCHIVE)
            .current_dir(&host_dir)
            .output()
            .await
            .map_err(|source| OpError::Local {
                path: host_dir.clone(),
                source,
            })?;
        let output = CommandOutput {
            ok: unpacked.status.success(),
            code: unpacked.status.code(),
            stdout: String::from_utf8_lossy(&unpacked.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&unpacked.stderr).into_owned(),
        };
        if !output.ok {
            return Err(OpError::Provision {
                host: host.to_string(),
                action: "decompress output",
                detail: failure_detail(&output),
            });
        }
        debug!(%host, dir = %host_dir.display(), "got output");
        Ok(host_dir)
    }
}
