//! Host preparation: directories, runtime daemons, machine tuning and the
//! per-host setup sequence.

use std::path::Path;
use std::sync::Arc;

use bench_core::RemoteLayout;
use bench_core::layout::{XTERM, scripts};
use benchgrid_remote::{CommandLine, CommandOutput, ConnectionPool};
use tracing::{debug, info, warn};

use crate::error::{OpError, OpResult};
use crate::repo::RepoOptions;

/// How a failed command is reported.
#[derive(Debug, Clone, Copy)]
pub(crate) enum Failure {
    Provision,
    Startup,
}

/// Lifecycle operations against the hosts of one campaign.
///
/// Cheap to clone; fan-out tasks each take their own copy.
#[derive(Clone)]
pub struct HostOps {
    pool: Arc<ConnectionPool>,
    layout: Arc<RemoteLayout>,
}

impl HostOps {
    pub fn new(pool: Arc<ConnectionPool>, layout: Arc<RemoteLayout>) -> Self {
        Self { pool, layout }
    }

    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    pub fn layout(&self) -> &RemoteLayout {
        &self.layout
    }

    /// Run `cmd` on `host`, turning a non-zero exit into an [`OpError`].
    pub(crate) async fn checked(
        &self,
        host: &str,
        action: &'static str,
        failure: Failure,
        cmd: impl Into<CommandLine>,
    ) -> OpResult<CommandOutput> {
        let output = self.pool.run_with_output(host, cmd).await?;
        if output.ok {
            return Ok(output);
        }
        let detail = failure_detail(&output);
        Err(match failure {
            Failure::Provision => OpError::Provision {
                host: host.to_string(),
                action,
                detail,
            },
            Failure::Startup => OpError::Startup {
                host: host.to_string(),
                action,
                detail,
            },
        })
    }

    /// `TERM=xterm cd <code dir>;` followed by `tail`.
    pub(crate) fn in_code_dir(&self, tail: impl Into<String>) -> CommandLine {
        CommandLine::new()
            .arg(XTERM)
            .arg(format!("cd {};", self.layout.code_dir()))
            .arg(tail.into())
    }

    /// `./scripts/run.sh <args>` inside the code directory.
    pub(crate) fn run_script(&self, args: impl AsRef<str>) -> CommandLine {
        self.in_code_dir(format!("./{} {}", scripts::RUN, args.as_ref()))
    }

    pub async fn clean_stale_traces(&self, host: &str) -> OpResult<()> {
        debug!(%host, "cleaning stale traces");
        self.checked(
            host,
            "clean stale traces",
            Failure::Provision,
            format!("sudo rm -rf {}/*", self.layout.traces_dir),
        )
        .await?;
        Ok(())
    }

    pub async fn setup_parent_dir(&self, host: &str) -> OpResult<()> {
        self.checked(
            host,
            "create parent directory",
            Failure::Provision,
            format!("mkdir -p {}", self.layout.code_parent_dir),
        )
        .await?;
        Ok(())
    }

    /// Recreate the remote output directory empty.
    pub async fn setup_output_dir(&self, host: &str) -> OpResult<()> {
        let out = self.layout.output_dir();
        self.checked(
            host,
            "create output directory",
            Failure::Provision,
            [format!("sudo rm -rf {out};"), format!("mkdir {out}")],
        )
        .await?;
        debug!(%host, dir = %out, "created output directory");
        Ok(())
    }

    /// Recreate the local output directory empty.
    ///
    /// Several hosts run this concurrently against the same directory, so a
    /// directory that vanished or appeared in between is not an error.
    pub async fn setup_local_output_dir(&self, dir: &Path) -> OpResult<()> {
        match tokio::fs::remove_dir_all(dir).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(OpError::Local {
                    path: dir.to_path_buf(),
                    source,
                });
            }
        }
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| OpError::Local {
                path: dir.to_path_buf(),
                source,
            })
    }

    /// Stop every service the repo's run script manages on `host`.
    pub async fn teardown(&self, host: &str) -> OpResult<()> {
        debug!(%host, "tearing down");
        self.checked(
            host,
            "teardown",
            Failure::Provision,
            self.run_script("teardown"),
        )
        .await?;
        debug!(%host, "teardown successful");
        Ok(())
    }

    pub async fn start_iokerneld(&self, host: &str, net_iface: &str) -> OpResult<()> {
        self.checked(
            host,
            "iokerneld",
            Failure::Startup,
            self.run_script(format!("iokerneld {net_iface}")),
        )
        .await?;
        debug!(%host, "iokerneld launched");
        Ok(())
    }

    /// Kill iokerneld. Its absence is fine.
    pub async fn stop_iokerneld(&self, host: &str) -> OpResult<()> {
        let ok = self
            .pool
            .run(host, [XTERM, "sudo pkill -9 iokerneld;"])
            .await?;
        debug!(%host, was_running = ok, "stopped iokerneld");
        Ok(())
    }

    /// Run the repo's machine setup script for `net_iface`.
    pub async fn setup_machine(&self, host: &str, net_iface: &str) -> OpResult<()> {
        self.checked(
            host,
            "machine setup",
            Failure::Provision,
            self.in_code_dir(format!("./{} {net_iface}", scripts::SETUP)),
        )
        .await?;
        debug!(%host, "machine setup successful");
        Ok(())
    }

    /// Pin every CPU's frequency governor to `performance`.
    pub async fn disable_dvfs(&self, host: &str) -> OpResult<()> {
        self.checked(
            host,
            "disable dvfs",
            Failure::Provision,
            [
                XTERM,
                "echo performance | sudo tee /sys/devices/system/cpu/cpu*/cpufreq/scaling_governor;",
            ],
        )
        .await?;
        debug!(%host, "disabled dvfs");
        Ok(())
    }

    /// Full provisioning of one host, in order: stale traces, directories,
    /// repository, a pre-emptive teardown of leftovers, iokerneld stop,
    /// machine setup and DVFS.
    pub async fn setup_host(
        &self,
        host: &str,
        net_iface: &str,
        local_output_dir: &Path,
        repo: &RepoOptions,
        is_client: bool,
    ) -> OpResult<()> {
        self.clean_stale_traces(host).await?;
        self.setup_parent_dir(host).await?;
        self.setup_output_dir(host).await?;
        self.setup_local_output_dir(local_output_dir).await?;
        self.setup_repository(host, repo, is_client).await?;
        self.teardown(host).await?;
        self.stop_iokerneld(host).await?;
        self.setup_machine(host, net_iface).await?;
        self.disable_dvfs(host).await?;
        info!(%host, "host setup complete");
        Ok(())
    }
}

/// What to report for a failed command. Remote commands run under a pty,
/// which folds stderr into stdout, so fall back to stdout.
pub fn failure_detail(output: &CommandOutput) -> String {
    let stderr = output.stderr.trim();
    if !stderr.is_empty() {
        return stderr.to_string();
    }
    let stdout = output.stdout.trim();
    if stdout.is_empty() {
        match output.code {
            Some(code) => format!("exit code {code}"),
            None => "terminated by signal".to_string(),
        }
    } else {
        keep_tail(stdout)
    }
}

/// Keep the tail of very long output; that is where the error usually is.
fn keep_tail(text: &str) -> String {
    const KEEP: usize = 4000;
    if text.len() <= KEEP {
        return text.to_string();
    }
    let mut start = text.len() - KEEP;
    while !text.is_char_boundary(start) {
        start += 1;
    }
    warn!(len = text.len(), "command output truncated in error");
    format!("...{}", &text[start..])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ops_with;
    use benchgrid_remote::ScriptedTransport;

    #[tokio::test]
    async fn setup_host_runs_in_order() {
        let transport = ScriptedTransport::new().respond("git branch --show-current", "main\n");
        let ops = ops_with(transport.clone(), &["n1"]).await;
        let dir = tempfile::tempdir().unwrap();
        let local = dir.path().join("out");

        ops.setup_host("n1", "eth0", &local, &RepoOptions::default(), false)
            .await
            .unwrap();
        assert!(local.is_dir());

        let steps = [
            "sudo rm -rf /dev/shm/sandook/*",
            "mkdir -p /home/alice/mit-sandook",
            "mkdir /home/alice/mit-sandook/sandook-output",
            "[ -d /home/alice/mit-sandook/sandook ]",
            "run.sh teardown",
            "pkill -9 iokerneld",
            "scripts/setup.sh eth0",
            "scaling_governor",
        ];
        let positions: Vec<usize> = steps
            .iter()
            .map(|s| transport.position("n1", s).unwrap_or_else(|| panic!("missing {s}")))
            .collect();
        assert!(positions.windows(2).all(|w| w[0] < w[1]), "{positions:?}");
    }

    #[tokio::test]
    async fn failed_command_names_host_and_action() {
        let transport = ScriptedTransport::new().fail_on("scaling_governor");
        let ops = ops_with(transport, &["n1"]).await;
        let err = ops.disable_dvfs("n1").await.unwrap_err();
        match err {
            OpError::Provision { host, action, detail } => {
                assert_eq!(host, "n1");
                assert_eq!(action, "disable dvfs");
                assert!(detail.contains("scripted failure"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn iokerneld_startup_failure_is_a_startup_error() {
        let transport = ScriptedTransport::new().fail_on("iokerneld eth1");
        let ops = ops_with(transport, &["n1"]).await;
        let err = ops.start_iokerneld("n1", "eth1").await.unwrap_err();
        assert!(matches!(err, OpError::Startup { action: "iokerneld", .. }));
        assert_eq!(err.host(), Some("n1"));
    }

    #[tokio::test]
    async fn stopping_an_absent_iokerneld_is_fine() {
        let transport = ScriptedTransport::new().fail_on("pkill");
        let ops = ops_with(transport, &["n1"]).await;
        ops.stop_iokerneld("n1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_host_surfaces_the_channel_error() {
        let ops = ops_with(ScriptedTransport::new(), &[]).await;
        let err = ops.teardown("ghost").await.unwrap_err();
        assert!(matches!(err, OpError::Remote(_)));
    }

    #[test]
    fn detail_falls_back_to_stdout_then_code() {
        let mut out = CommandOutput::failure(2, "");
        assert_eq!(failure_detail(&out), "exit code 2");
        out.stdout = "make: *** [all] Error 1\n".to_string();
        assert_eq!(failure_detail(&out), "make: *** [all] Error 1");
        let long = "x".repeat(5000);
        assert!(keep_tail(&long).len() < 4100);
    }
}
