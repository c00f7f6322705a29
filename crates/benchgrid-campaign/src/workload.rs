//! What the campaign runs once every client is ready.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use async_trait::async_trait;
use benchgrid_client::ClientHandle;
use benchgrid_remote::{CommandLine, PendingCommand};
use regex::Regex;
use tracing::{debug, error, info, warn};

use crate::buckets::{self, INPUT_PREFIX, MERGED_FILE};
use crate::error::{CampaignError, CampaignResult};

/// An application driven on the clients of a campaign.
#[async_trait]
pub trait Workload: Send + Sync {
    fn name(&self) -> &str;

    /// Drive every client and return once all of them are done.
    async fn run(&self, clients: &[ClientHandle]) -> CampaignResult<()>;

    /// Post-process the collected output under `local_output_dir`.
    async fn after_collection(
        &self,
        _local_output_dir: &Path,
        _clients: &[ClientHandle],
    ) -> CampaignResult<()> {
        Ok(())
    }
}

/// Look up a workload by the `app` name clients are configured with.
pub fn workload_for(app: &str) -> CampaignResult<Box<dyn Workload>> {
    match app {
        Loadgen::NAME => Ok(Box::new(Loadgen::default())),
        other => Err(CampaignError::UnknownWorkload(other.to_string())),
    }
}

/// Runs nothing. Used when a campaign declares no clients and only the
/// storage side is exercised, e.g. disk servers preconditioned with
/// `storage_perf`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ServersOnly;

impl ServersOnly {
    pub const NAME: &'static str = "servers-only";
}

#[async_trait]
impl Workload for ServersOnly {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, clients: &[ClientHandle]) -> CampaignResult<()> {
        debug!(clients = clients.len(), "no client workload to run");
        Ok(())
    }
}

const LOADGEN_BIN: &str = "target/release/synthetic";
/// The load generator insists on a server address; the real one comes from
/// its config file.
const NO_OP_ADDR: &str = "192.168.128.99:5050";
const LOADGEN_LOG: &str = "loadgen.log";
const LOADGEN_TMP_FILES: &str = "/tmp/loadgen*";
pub const BUCKETS_DIR: &str = "loadgen_buckets";

static THREADS_ARG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--threads (\d+)").expect("static pattern"));

/// The synthetic load generator, one instance per client.
#[derive(Debug, Clone)]
pub struct Loadgen {
    /// Pause between two client launches.
    pub stagger: Duration,
}

impl Default for Loadgen {
    fn default() -> Self {
        Self {
            stagger: Duration::from_secs(2),
        }
    }
}

impl Loadgen {
    pub const NAME: &'static str = "loadgen";

    /// Thread count requested in the client's arguments.
    pub fn threads(args: &str) -> Option<u32> {
        THREADS_ARG
            .captures(args)
            .and_then(|c| c[1].parse().ok())
    }

    fn check_threads(client: &ClientHandle) -> CampaignResult<()> {
        let invalid = |reason: String| CampaignError::Workload {
            workload: Self::NAME.to_string(),
            host: client.hostname().to_string(),
            reason,
        };
        match Self::threads(client.args()) {
            Some(n) if n == client.cores() => Ok(()),
            Some(n) => Err(invalid(format!(
                "expected {} threads, got {n}",
                client.cores()
            ))),
            None => Err(invalid(format!(
                "cannot find number of threads in args: {}",
                client.args()
            ))),
        }
    }

    pub fn command(client: &ClientHandle) -> CommandLine {
        let layout = client.ops().layout();
        let output_dir = layout.output_dir();
        CommandLine::new()
            .arg(format!("cd {};", layout.loadgen_dir()))
            .arg(format!("sudo rm -rf {LOADGEN_TMP_FILES};"))
            .arg(format!(
                "SANDOOK_CONFIG={} sudo -E {LOADGEN_BIN} {NO_OP_ADDR} \
                 --mode runtime-client --config {} -p sandook --transport fake {} \
                 2>&1 | tee {output_dir}/{LOADGEN_LOG};",
                client.sandook_config_path(),
                client.virtual_disk_config_path(),
                client.args(),
            ))
            .arg(format!("sudo cp {LOADGEN_TMP_FILES} {output_dir};"))
    }

    /// Where a client's remote output directory lands once fetched and
    /// unpacked locally.
    fn fetched_output_dir(client: &ClientHandle) -> PathBuf {
        let remote = client.ops().layout().output_dir();
        client
            .local_output_dir()
            .join(remote.trim_start_matches('/'))
    }

    /// Copy every client's latency files into `<local_output_dir>/loadgen_buckets`.
    async fn gather_buckets(
        local_output_dir: &Path,
        clients: &[ClientHandle],
    ) -> CampaignResult<PathBuf> {
        let buckets_dir = local_output_dir.join(BUCKETS_DIR);
        tokio::fs::create_dir_all(&buckets_dir)
            .await
            .map_err(|e| CampaignError::io(&buckets_dir, e))?;

        let mut seen = HashSet::new();
        for client in clients {
            let source = Self::fetched_output_dir(client);
            if !seen.insert(source.clone()) {
                continue;
            }
            let mut entries = match tokio::fs::read_dir(&source).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(host = client.hostname(), dir = %source.display(), error = %e, "no client output");
                    continue;
                }
            };
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| CampaignError::io(&source, e))?
            {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                if !(name.starts_with(INPUT_PREFIX) && name.ends_with(".txt")) {
                    continue;
                }
                let dest = buckets_dir.join(name.as_ref());
                debug!(from = %entry.path().display(), to = %dest.display(), "copying latency file");
                tokio::fs::copy(entry.path(), &dest)
                    .await
                    .map_err(|e| CampaignError::io(&dest, e))?;
            }
        }
        Ok(buckets_dir)
    }
}

#[async_trait]
impl Workload for Loadgen {
    fn name(&self) -> &str {
        Self::NAME
    }

    async fn run(&self, clients: &[ClientHandle]) -> CampaignResult<()> {
        for client in clients {
            Self::check_threads(client)?;
        }

        let mut pending: Vec<PendingCommand> = Vec::with_capacity(clients.len());
        for (i, client) in clients.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.stagger).await;
            }
            info!(host = client.hostname(), ip = client.ip().primary(), threads = client.cores(), "launching loadgen");
            let cmd = Self::command(client);
            pending.push(client.ops().pool().run_async(client.hostname(), cmd).await?);
        }

        let mut first_error = None;
        for command in pending {
            let host = command.host().to_string();
            match command.wait().await {
                Ok(output) if output.ok => debug!(%host, "loadgen finished"),
                Ok(_) => error!(%host, "loadgen ended with an error"),
                Err(e) => {
                    error!(%host, error = %e, "loadgen did not complete");
                    first_error.get_or_insert(CampaignError::from(e));
                }
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => {
                info!(clients = clients.len(), "loadgen completed");
                Ok(())
            }
        }
    }

    async fn after_collection(
        &self,
        local_output_dir: &Path,
        clients: &[ClientHandle],
    ) -> CampaignResult<()> {
        let buckets_dir = Self::gather_buckets(local_output_dir, clients).await?;
        let merged = buckets_dir.join(MERGED_FILE);
        tokio::task::spawn_blocking(move || buckets::merge_buckets(&buckets_dir, &merged))
            .await
            .map_err(|e| CampaignError::Join {
                host: "local".to_string(),
                reason: e.to_string(),
            })??;
        Ok(())
    }
}
