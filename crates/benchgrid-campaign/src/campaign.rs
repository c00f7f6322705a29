//! Campaign controller — drives one benchmark run across the cluster.
//!
//! Setup walks the phases in order and stops at the first error. Whatever
//! happened during setup, every host that was reached is torn down, its
//! output collected and the result validated.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use bench_core::{RemoteLayout, Topology};
use benchgrid_client::ClientHandle;
use benchgrid_ops::{HostOps, OpError};
use benchgrid_remote::{ConnectionPool, Transport};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{CampaignError, CampaignResult};
use crate::fanout::fan_out;
use crate::options::CampaignOptions;
use crate::phase::CampaignPhase;
use crate::validate::{self, ValidationReport};
use crate::workload::Workload;

/// Outcome of a campaign whose setup, run and validation all succeeded.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignReport {
    pub local_output_dir: PathBuf,
    pub phases: Vec<CampaignPhase>,
    /// Hosts whose teardown failed.
    pub teardown_failures: Vec<String>,
    /// Hosts whose output could not be collected.
    pub collection_failures: Vec<String>,
    pub validation: ValidationReport,
}

pub struct Campaign {
    topology: Arc<Topology>,
    options: CampaignOptions,
    ops: HostOps,
    phase: CampaignPhase,
    history: Vec<CampaignPhase>,
    clients: Vec<ClientHandle>,
    teardown_failures: Vec<String>,
    collection_failures: Vec<String>,
}

impl Campaign {
    /// A campaign over `topology`, talking to hosts through `transport`.
    pub fn new(
        topology: Topology,
        layout: RemoteLayout,
        options: CampaignOptions,
        transport: Arc<dyn Transport>,
    ) -> Self {
        let pool = ConnectionPool::new(transport).with_command_timeout(options.command_timeout);
        Self {
            topology: Arc::new(topology),
            ops: HostOps::new(Arc::new(pool), Arc::new(layout)),
            options,
            phase: CampaignPhase::Idle,
            history: vec![CampaignPhase::Idle],
            clients: Vec::new(),
            teardown_failures: Vec::new(),
            collection_failures: Vec::new(),
        }
    }

    pub fn phase(&self) -> CampaignPhase {
        self.phase
    }

    /// Every phase entered so far, starting with `Idle`.
    pub fn history(&self) -> &[CampaignPhase] {
        &self.history
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn ops(&self) -> &HostOps {
        &self.ops
    }

    pub fn clients(&self) -> &[ClientHandle] {
        &self.clients
    }

    pub fn teardown_failures(&self) -> &[String] {
        &self.teardown_failures
    }

    pub fn collection_failures(&self) -> &[String] {
        &self.collection_failures
    }

    fn advance(&mut self, to: CampaignPhase) -> CampaignResult<()> {
        if !self.phase.can_move_to(to) {
            return Err(CampaignError::Phase {
                from: self.phase,
                to,
            });
        }
        info!(from = %self.phase, to = %to, "campaign phase");
        self.phase = to;
        self.history.push(to);
        Ok(())
    }

    /// Run the whole campaign with `workload` on the clients.
    ///
    /// Teardown, collection and validation happen on every path once
    /// connecting has started. A setup or workload error takes precedence
    /// over a validation error, which is then only logged.
    pub async fn run(&mut self, workload: &dyn Workload) -> CampaignResult<CampaignReport> {
        if self.phase != CampaignPhase::Idle {
            return Err(CampaignError::Phase {
                from: self.phase,
                to: CampaignPhase::Connected,
            });
        }
        info!(
            hosts = self.topology.hosts().len(),
            disks = self.topology.disk_count(),
            clients = self.topology.clients().len(),
            workload = workload.name(),
            "starting campaign"
        );

        let setup = self.setup_and_run(workload).await;
        if let Err(e) = &setup {
            error!(phase = %self.phase, error = %e, "campaign aborted");
        }

        self.teardown().await;
        self.advance(CampaignPhase::TornDown)?;

        self.collect(workload).await;
        self.advance(CampaignPhase::Collected)?;

        let validation = validate::validate_output(
            &self.options.local_output_dir,
            self.topology.disk_count(),
        );
        let validation = match (setup, validation) {
            (Err(e), Ok(_)) => return Err(e),
            (Err(e), Err(v)) => {
                warn!(error = %v, "validation failed after an aborted run");
                return Err(e);
            }
            (Ok(()), Err(v)) => return Err(v),
            (Ok(()), Ok(report)) => report,
        };
        self.advance(CampaignPhase::Validated)?;

        Ok(CampaignReport {
            local_output_dir: self.options.local_output_dir.clone(),
            phases: self.history.clone(),
            teardown_failures: self.teardown_failures.clone(),
            collection_failures: self.collection_failures.clone(),
            validation,
        })
    }

    async fn setup_and_run(&mut self, workload: &dyn Workload) -> CampaignResult<()> {
        self.connect().await?;
        self.advance(CampaignPhase::Connected)?;

        self.provision().await?;
        self.advance(CampaignPhase::Provisioned)?;

        self.pre_launch().await?;
        self.advance(CampaignPhase::PreLaunched)?;

        if self.options.format_disks {
            self.format_disks().await?;
        }
        self.advance(CampaignPhase::DisksReady)?;

        self.start_controller().await?;
        self.advance(CampaignPhase::ControllerUp)?;

        self.start_disk_servers().await?;
        self.advance(CampaignPhase::DiskServersUp)?;

        self.setup_clients().await?;
        self.advance(CampaignPhase::ClientsReady)?;

        self.advance(CampaignPhase::Running)?;
        workload.run(&self.clients).await?;
        info!(workload = workload.name(), "workload completed");
        Ok(())
    }

    /// Connect to every host in declaration order. The first failure stops
    /// the campaign; hosts connected so far stay open for teardown.
    async fn connect(&self) -> CampaignResult<()> {
        let credentials = self.options.credentials();
        for host in self.topology.hostnames() {
            self.ops.pool().connect(host, &credentials).await?;
        }
        Ok(())
    }

    async fn provision(&self) -> CampaignResult<()> {
        let tasks = self.topology.hosts().iter().map(|h| {
            let ops = self.ops.clone();
            let host = h.hostname.clone();
            let net_iface = h.net_iface.clone();
            let local = self.options.local_output_dir.clone();
            let repo = self.options.repo.clone();
            let is_client = self.topology.is_client(&host);
            let task = async move {
                ops.setup_host(&host, &net_iface, &local, &repo, is_client)
                    .await
            };
            (h.hostname.clone(), task)
        });
        fan_out("provision", tasks).await?;
        info!("all hosts provisioned");
        Ok(())
    }

    /// Pre-launch every disk, hosts in parallel and disks of one host in
    /// order.
    async fn pre_launch(&self) -> CampaignResult<()> {
        let tasks = self.topology.disk_server_hosts().iter().map(|d| {
            let ops = self.ops.clone();
            let d = d.clone();
            let host = d.host.clone();
            let task = async move {
                for disk in &d.disks {
                    ops.pre_launch(&d.host, &d.net_iface, &disk.params).await?;
                }
                Ok::<(), OpError>(())
            };
            (host, task)
        });
        fan_out("pre-launch", tasks).await
    }

    async fn format_disks(&self) -> CampaignResult<()> {
        let tasks = self.topology.disk_server_hosts().iter().map(|d| {
            let ops = self.ops.clone();
            let d = d.clone();
            let host = d.host.clone();
            let task = async move {
                for disk in &d.disks {
                    ops.format_disk(&d.host, &disk.params.disk_pci).await?;
                }
                Ok::<(), OpError>(())
            };
            (host, task)
        });
        fan_out("format disks", tasks).await
    }

    async fn start_controller(&self) -> CampaignResult<()> {
        let controller = self.topology.controller();
        self.ops
            .start_controller(&controller.host, &controller.net_iface, &controller.params)
            .await?;
        Ok(())
    }

    async fn start_disk_servers(&self) -> CampaignResult<()> {
        let controller_ip = self.topology.controller_ip().to_string();
        let tasks = self.topology.disk_server_hosts().iter().map(|d| {
            let ops = self.ops.clone();
            let d = d.clone();
            let host = d.host.clone();
            let controller_ip = controller_ip.clone();
            let task = async move {
                for disk in &d.disks {
                    ops.start_disk_server(&d.host, &d.net_iface, &disk.params, &controller_ip)
                        .await?;
                }
                Ok::<(), OpError>(())
            };
            (host, task)
        });
        fan_out("start disk servers", tasks).await?;
        info!(disks = self.topology.disk_count(), "disk servers started");
        Ok(())
    }

    /// Build every client handle in order. A client host other than the
    /// controller host gets a fresh iokerneld before its block devices are
    /// attached; the controller host already runs one.
    async fn setup_clients(&mut self) -> CampaignResult<()> {
        let topology = self.topology.clone();
        let controller_host = topology.controller_host();
        let mut runtime_started: HashSet<&str> = HashSet::new();
        for spec in topology.clients() {
            let handle = ClientHandle::setup(
                &self.ops,
                spec,
                topology.controller_ip(),
                &self.options.local_output_dir,
            )
            .await?;
            self.clients.push(handle);

            let host = spec.host.as_str();
            if host == controller_host {
                debug!(%host, "controller already runs iokerneld");
            } else if runtime_started.insert(host) {
                self.ops.stop_iokerneld(host).await?;
                self.ops.start_iokerneld(host, &spec.net_iface).await?;
            }

            if let Some(handle) = self.clients.last_mut() {
                handle.attach_block_devices().await?;
            }
        }
        Ok(())
    }

    /// Tear down clients, then disk-server hosts, then the controller host.
    /// Hosts never connected are skipped. A failing host is logged and the
    /// rest are still attempted.
    async fn teardown(&mut self) {
        for client in &self.clients {
            if let Err(e) = client.teardown().await {
                warn!(host = client.hostname(), error = %e, "client teardown failed");
            }
        }

        let topology = self.topology.clone();
        for host in topology.teardown_order() {
            if !self.ops.pool().is_connected(host).await {
                debug!(%host, "not connected, skipping teardown");
                continue;
            }
            if let Err(e) = self.ops.teardown(host).await {
                error!(%host, error = %e, "teardown failed");
                self.teardown_failures.push(host.to_string());
            }
        }
    }

    /// Bring every reached host's output home, then close its connection.
    async fn collect(&mut self, workload: &dyn Workload) {
        let topology = self.topology.clone();
        let local = self.options.local_output_dir.clone();
        let pool = self.ops.pool().clone();

        let mut reached = Vec::new();
        for host in topology.hostnames() {
            if pool.is_connected(host).await {
                reached.push(host);
            }
        }

        let controller = topology.controller_host();
        if self.options.get_controller_traces && reached.contains(&controller) {
            if let Err(e) = self.ops.gather_traces(controller).await {
                warn!(host = %controller, error = %e, "cannot gather controller traces");
            }
        }
        let mut gathered = HashSet::new();
        for host in topology.client_hostnames() {
            if !reached.contains(&host) || !gathered.insert(host) {
                continue;
            }
            if let Err(e) = self.ops.gather_traces(host).await {
                warn!(%host, error = %e, "cannot gather client traces");
            }
        }

        for host in reached {
            match self.ops.fetch_output(host, &local).await {
                Ok(dir) => debug!(%host, dir = %dir.display(), "output collected"),
                Err(e) => {
                    error!(%host, error = %e, "cannot collect output");
                    self.collection_failures.push(host.to_string());
                }
            }
            if let Err(e) = pool.close(host).await {
                warn!(%host, error = %e, "cannot close connection");
            }
        }

        if let Err(e) = workload.after_collection(&local, &self.clients).await {
            error!(workload = workload.name(), error = %e, "post-processing failed");
        }
        validate::log_disk_server_stats(&local);
    }
}

impl std::fmt::Debug for Campaign {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Campaign")
            .field("phase", &self.phase)
            .field("hosts", &self.topology.hostnames())
            .field("clients", &self.clients.len())
            .finish()
    }
}
