//! The seam between the connection pool and the wire.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::command::CommandOutput;
use crate::error::RemoteResult;
use crate::responder::Responder;

/// How to authenticate to a host.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub user: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    /// Unlocks the ssh key when the channel opens, and is typed whenever a
    /// remote command prompts for a passphrase.
    pub passphrase: Option<String>,
}

impl Credentials {
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            user: Some(user.into()),
            ..Default::default()
        }
    }

    pub fn with_key(mut self, path: impl Into<PathBuf>) -> Self {
        self.ssh_key_path = Some(path.into());
        self
    }

    pub fn with_passphrase(mut self, passphrase: impl Into<String>) -> Self {
        self.passphrase = Some(passphrase.into());
        self
    }
}

/// A command started on a host that has not been reaped yet.
#[async_trait]
pub trait RemoteChild: Send {
    /// Local process id of the process carrying the command, if any.
    fn id(&self) -> Option<u32>;

    /// Wait for exit and collect output.
    async fn wait(&mut self) -> RemoteResult<CommandOutput>;

    /// Terminate the command.
    async fn kill(&mut self) -> RemoteResult<()>;
}

/// Raw remote shell primitive.
///
/// Implementations open and close a per-host channel and start commands
/// over it. They do not log, serialize or interpret exit codes; the
/// [`ConnectionPool`](crate::ConnectionPool) does.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, host: &str, credentials: &Credentials) -> RemoteResult<()>;

    async fn spawn(
        &self,
        host: &str,
        command: &str,
        responder: Option<Responder>,
    ) -> RemoteResult<Box<dyn RemoteChild>>;

    /// Copy a remote file to the orchestrating host.
    async fn fetch(&self, host: &str, remote_path: &str, local_path: &Path) -> RemoteResult<()>;

    async fn close(&self, host: &str) -> RemoteResult<()>;

    /// Run a command to completion.
    async fn exec(
        &self,
        host: &str,
        command: &str,
        responder: Option<Responder>,
    ) -> RemoteResult<CommandOutput> {
        let mut child = self.spawn(host, command, responder).await?;
        child.wait().await
    }
}
