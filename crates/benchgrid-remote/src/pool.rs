//! Connection pool — one authenticated channel per hostname.
//!
//! The pool is owned by the campaign and shared (behind an `Arc`) with the
//! tasks of a fan-out. Commands issued to the same host go through that
//! host's lane and run one at a time; commands to different hosts run
//! concurrently.
//!
//! When a host was connected with a passphrase, every command on it gets a
//! [`Responder`] that types the passphrase whenever the output asks for it.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::command::{CommandLine, CommandOutput};
use crate::error::{RemoteError, RemoteResult};
use crate::responder::Responder;
use crate::transport::{Credentials, RemoteChild, Transport};

/// How [`ConnectionPool::run_remote`] executes a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecMode {
    /// Block until exit, report only success.
    Sync,
    /// Block until exit, return captured output.
    SyncWithOutput,
    /// Start now, await the result later.
    Async,
    /// Start a long-running command that is waited on or killed out of band.
    Background,
}

/// What [`ConnectionPool::run_remote`] hands back, one variant per mode.
pub enum RemoteResponse {
    Status(bool),
    Output(CommandOutput),
    Pending(PendingCommand),
    Background(BackgroundProcess),
}

impl RemoteResponse {
    /// Success of a command that already finished.
    pub fn ok(&self) -> Option<bool> {
        match self {
            Self::Status(ok) => Some(*ok),
            Self::Output(output) => Some(output.ok),
            Self::Pending(_) | Self::Background(_) => None,
        }
    }
}

#[derive(Clone)]
struct Connection {
    responder: Option<Responder>,
    lane: Arc<Mutex<()>>,
}

pub struct ConnectionPool {
    transport: Arc<dyn Transport>,
    connections: Mutex<HashMap<String, Connection>>,
    command_timeout: Option<Duration>,
}

impl ConnectionPool {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            connections: Mutex::new(HashMap::new()),
            command_timeout: None,
        }
    }

    /// Bound every synchronous and async command. Background commands are
    /// never bounded.
    pub fn with_command_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Open and cache a channel to `host`. Reconnecting replaces the cached
    /// credentials.
    pub async fn connect(&self, host: &str, credentials: &Credentials) -> RemoteResult<()> {
        if let Some(key) = &credentials.ssh_key_path {
            debug!(%host, key = %key.display(), "using ssh key");
        }
        self.transport.open(host, credentials).await?;

        let connection = Connection {
            responder: credentials.passphrase.as_deref().map(Responder::passphrase),
            lane: Arc::new(Mutex::new(())),
        };
        self.connections
            .lock()
            .await
            .insert(host.to_string(), connection);
        info!(%host, "connected");
        Ok(())
    }

    pub async fn close(&self, host: &str) -> RemoteResult<()> {
        let removed = self.connections.lock().await.remove(host);
        if removed.is_none() {
            return Err(RemoteError::NotConnected(host.to_string()));
        }
        self.transport.close(host).await?;
        debug!(%host, "connection closed");
        Ok(())
    }

    /// Close every cached channel, logging the ones that fail to close.
    pub async fn close_all(&self) {
        for host in self.connected_hosts().await {
            if let Err(e) = self.close(&host).await {
                warn!(%host, error = %e, "failed to close connection");
            }
        }
    }

    pub async fn is_connected(&self, host: &str) -> bool {
        self.connections.lock().await.contains_key(host)
    }

    /// Connected hostnames, sorted.
    pub async fn connected_hosts(&self) -> Vec<String> {
        let mut hosts: Vec<String> = self.connections.lock().await.keys().cloned().collect();
        hosts.sort();
        hosts
    }

    async fn connection(&self, host: &str) -> RemoteResult<Connection> {
        self.connections
            .lock()
            .await
            .get(host)
            .cloned()
            .ok_or_else(|| RemoteError::NotConnected(host.to_string()))
    }

    /// Run a command and report whether it exited zero.
    pub async fn run(&self, host: &str, cmd: impl Into<CommandLine>) -> RemoteResult<bool> {
        Ok(self.run_with_output(host, cmd).await?.ok)
    }

    /// Run a command and return its captured output.
    pub async fn run_with_output(
        &self,
        host: &str,
        cmd: impl Into<CommandLine>,
    ) -> RemoteResult<CommandOutput> {
        let line = cmd.into().render();
        let conn = self.connection(host).await?;
        execute(
            self.transport.clone(),
            host.to_string(),
            line,
            conn,
            self.command_timeout,
        )
        .await
    }

    /// Start a command whose result is awaited later through the returned
    /// handle. It queues behind earlier commands on the same host.
    pub async fn run_async(
        &self,
        host: &str,
        cmd: impl Into<CommandLine>,
    ) -> RemoteResult<PendingCommand> {
        let line = cmd.into().render();
        let conn = self.connection(host).await?;
        let handle = tokio::spawn(execute(
            self.transport.clone(),
            host.to_string(),
            line.clone(),
            conn,
            self.command_timeout,
        ));
        Ok(PendingCommand {
            host: host.to_string(),
            command: line,
            handle,
        })
    }

    /// Start a long-running command. The host's lane is only held while the
    /// command is being started, so other commands (including the one that
    /// stops it) can run on the host meanwhile.
    pub async fn run_in_background(
        &self,
        host: &str,
        cmd: impl Into<CommandLine>,
    ) -> RemoteResult<BackgroundProcess> {
        let line = cmd.into().render();
        let conn = self.connection(host).await?;
        let child = {
            let _lane = conn.lane.lock().await;
            debug!(%host, mode = "background", "{line}");
            self.transport
                .spawn(host, &line, conn.responder.clone())
                .await?
        };
        Ok(BackgroundProcess {
            host: host.to_string(),
            command: line,
            child,
        })
    }

    /// Run a command in the given mode.
    pub async fn run_remote(
        &self,
        host: &str,
        cmd: impl Into<CommandLine>,
        mode: ExecMode,
    ) -> RemoteResult<RemoteResponse> {
        Ok(match mode {
            ExecMode::Sync => RemoteResponse::Status(self.run(host, cmd).await?),
            ExecMode::SyncWithOutput => {
                RemoteResponse::Output(self.run_with_output(host, cmd).await?)
            }
            ExecMode::Async => RemoteResponse::Pending(self.run_async(host, cmd).await?),
            ExecMode::Background => {
                RemoteResponse::Background(self.run_in_background(host, cmd).await?)
            }
        })
    }

    /// Copy `remote_path` from `host` to `local_path`.
    pub async fn fetch(&self, host: &str, remote_path: &str, local_path: &Path) -> RemoteResult<()> {
        let conn = self.connection(host).await?;
        let _lane = conn.lane.lock().await;
        debug!(%host, remote = remote_path, local = %local_path.display(), "fetching file");
        self.transport.fetch(host, remote_path, local_path).await
    }

    /// Process ids of `name` on `host`. Empty when nothing matches.
    pub async fn remote_pids(&self, host: &str, name: &str) -> RemoteResult<Vec<String>> {
        let output = self
            .run_with_output(host, CommandLine::new().arg("pidof").arg(name))
            .await?;
        if !output.ok {
            warn!(%host, process = name, "cannot read pid for remote process");
            return Ok(Vec::new());
        }
        Ok(output
            .stdout
            .split_whitespace()
            .map(str::to_string)
            .collect())
    }
}

async fn execute(
    transport: Arc<dyn Transport>,
    host: String,
    line: String,
    conn: Connection,
    timeout: Option<Duration>,
) -> RemoteResult<CommandOutput> {
    let _lane = conn.lane.lock().await;
    debug!(host = %host, "{line}");

    let mut child = transport.spawn(&host, &line, conn.responder.clone()).await?;
    let output = match timeout {
        None => child.wait().await?,
        Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
            Ok(result) => result?,
            Err(_) => {
                if let Err(e) = child.kill().await {
                    warn!(host = %host, error = %e, "failed to kill timed out command");
                }
                return Err(RemoteError::Timeout {
                    host,
                    command: line,
                    timeout: limit,
                });
            }
        },
    };
    log_output(&host, &output);
    Ok(output)
}

fn log_output(host: &str, output: &CommandOutput) {
    if !output.stdout.is_empty() {
        debug!(%host, stdout = %output.stdout.trim_end());
    }
    if !output.ok {
        warn!(
            %host,
            code = ?output.code,
            stderr = %output.stderr.trim_end(),
            "process exited with an error"
        );
    }
}

/// A command started with [`ExecMode::Async`].
pub struct PendingCommand {
    host: String,
    command: String,
    handle: JoinHandle<RemoteResult<CommandOutput>>,
}

impl PendingCommand {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub async fn wait(self) -> RemoteResult<CommandOutput> {
        self.handle
            .await
            .map_err(|e| RemoteError::Join(format!("{} on {}: {e}", self.command, self.host)))?
    }
}

/// A command started with [`ExecMode::Background`].
pub struct BackgroundProcess {
    host: String,
    command: String,
    child: Box<dyn RemoteChild>,
}

impl BackgroundProcess {
    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Local id of the process carrying the command, if there is one.
    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }

    pub async fn wait(&mut self) -> RemoteResult<CommandOutput> {
        let output = self.child.wait().await?;
        log_output(&self.host, &output);
        Ok(output)
    }

    pub async fn kill(&mut self) -> RemoteResult<()> {
        debug!(host = %self.host, command = %self.command, "killing background command");
        self.child.kill().await
    }
}
