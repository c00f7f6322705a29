//! Transport over the system OpenSSH client.
//!
//! `open` starts a control master per host; every later `ssh`/`scp` call
//! rides on the master's socket, so authentication happens once per host.
//! Commands run with a forced pseudo-terminal, which makes interactive
//! prompts from the remote side visible on stdout.
//!
//! A passphrase-protected key is unlocked by the master through an
//! `SSH_ASKPASS` helper that echoes the secret from its environment. The
//! secret never touches the disk or the command line.

use std::collections::HashMap;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::debug;

use crate::command::CommandOutput;
use crate::error::{RemoteError, RemoteResult};
use crate::process::ManagedChild;
use crate::responder::Responder;
use crate::transport::{Credentials, RemoteChild, Transport};

/// Environment variable the askpass helper reads the passphrase from.
const PASSPHRASE_ENV: &str = "BENCHGRID_SSH_PASSPHRASE";
const ASKPASS_SCRIPT: &str = "#!/bin/sh\nprintf '%s\\n' \"$BENCHGRID_SSH_PASSPHRASE\"\n";

#[derive(Debug, Clone)]
struct HostOptions {
    user: Option<String>,
    key: Option<PathBuf>,
}

pub struct SshTransport {
    control_dir: TempDir,
    hosts: Mutex<HashMap<String, HostOptions>>,
    ssh: PathBuf,
    scp: PathBuf,
}

impl SshTransport {
    /// Transport using `ssh` and `scp` from `PATH`, with control sockets in
    /// a fresh private temporary directory.
    pub fn new() -> RemoteResult<Self> {
        let control_dir = tempfile::Builder::new()
            .prefix("benchgrid-ssh-")
            .tempdir()
            .map_err(|source| RemoteError::Io {
                host: "local".to_string(),
                source,
            })?;
        Ok(Self {
            control_dir,
            hosts: Mutex::new(HashMap::new()),
            ssh: PathBuf::from("ssh"),
            scp: PathBuf::from("scp"),
        })
    }

    fn control_path(&self) -> String {
        // %C expands to a hash of the connection parameters, keeping socket
        // paths short enough for sun_path.
        format!("ControlPath={}/%C", self.control_dir.path().display())
    }

    fn options(&self, host: &str) -> RemoteResult<HostOptions> {
        let hosts = self
            .hosts
            .lock()
            .map_err(|_| RemoteError::NotConnected(host.to_string()))?;
        hosts
            .get(host)
            .cloned()
            .ok_or_else(|| RemoteError::NotConnected(host.to_string()))
    }

    /// Write the askpass helper into the control directory.
    async fn askpass(&self) -> RemoteResult<PathBuf> {
        let path = self.control_dir.path().join("askpass.sh");
        let io = |source| RemoteError::Io {
            host: "local".to_string(),
            source,
        };
        tokio::fs::write(&path, ASKPASS_SCRIPT).await.map_err(io)?;
        tokio::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o700))
            .await
            .map_err(io)?;
        Ok(path)
    }

    /// The command starting the control master for `host`. Without a
    /// passphrase the master never prompts.
    async fn master_command(
        &self,
        host: &str,
        options: &HostOptions,
        passphrase: Option<&str>,
    ) -> RemoteResult<Command> {
        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.base_args(options)).args([
            "-o",
            "ControlMaster=yes",
            "-o",
            "ControlPersist=yes",
            "-o",
            "StrictHostKeyChecking=accept-new",
        ]);
        match passphrase {
            Some(passphrase) => {
                cmd.env("SSH_ASKPASS", self.askpass().await?)
                    .env("SSH_ASKPASS_REQUIRE", "force")
                    .env(PASSPHRASE_ENV, passphrase)
                    .args(["-o", "NumberOfPasswordPrompts=1"]);
            }
            None => {
                cmd.args(["-o", "BatchMode=yes"]);
            }
        }
        cmd.arg("-fN").arg(host);
        Ok(cmd)
    }

    /// Options shared by every invocation against `host`.
    fn base_args(&self, options: &HostOptions) -> Vec<String> {
        let mut args = vec!["-o".to_string(), self.control_path()];
        if let Some(user) = &options.user {
            args.push("-o".to_string());
            args.push(format!("User={user}"));
        }
        if let Some(key) = &options.key {
            args.push("-i".to_string());
            args.push(key.display().to_string());
        }
        args
    }
}

#[async_trait]
impl Transport for SshTransport {
    async fn open(&self, host: &str, credentials: &Credentials) -> RemoteResult<()> {
        let options = HostOptions {
            user: credentials.user.clone(),
            key: credentials.ssh_key_path.clone(),
        };

        let cmd = self
            .master_command(host, &options, credentials.passphrase.as_deref())
            .await?;
        debug!(
            %host,
            with_passphrase = credentials.passphrase.is_some(),
            "starting ssh control master"
        );

        let mut child = ManagedChild::spawn(host, cmd, "ssh -fN", None)?;
        let output = child.wait().await?;
        if !output.ok {
            return Err(RemoteError::Connect {
                host: host.to_string(),
                reason: output.stderr.trim().to_string(),
            });
        }

        self.hosts
            .lock()
            .map_err(|_| RemoteError::Connect {
                host: host.to_string(),
                reason: "host table poisoned".to_string(),
            })?
            .insert(host.to_string(), options);
        Ok(())
    }

    async fn spawn(
        &self,
        host: &str,
        command: &str,
        responder: Option<Responder>,
    ) -> RemoteResult<Box<dyn RemoteChild>> {
        let options = self.options(host)?;
        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.base_args(&options))
            .arg("-tt")
            .arg(host)
            .arg("--")
            .arg(command);
        let child = ManagedChild::spawn(host, cmd, command, responder)?;
        Ok(Box::new(child))
    }

    async fn fetch(&self, host: &str, remote_path: &str, local_path: &Path) -> RemoteResult<()> {
        let options = self.options(host)?;
        let mut cmd = Command::new(&self.scp);
        cmd.args(self.base_args(&options))
            .arg("-q")
            .arg(format!("{host}:{remote_path}"))
            .arg(local_path);

        let mut child = ManagedChild::spawn(host, cmd, "scp", None)?;
        let CommandOutput { ok, stderr, .. } = child.wait().await?;
        if ok {
            Ok(())
        } else {
            Err(RemoteError::Fetch {
                host: host.to_string(),
                remote_path: remote_path.to_string(),
                reason: stderr.trim().to_string(),
            })
        }
    }

    async fn close(&self, host: &str) -> RemoteResult<()> {
        let options = {
            let mut hosts = self
                .hosts
                .lock()
                .map_err(|_| RemoteError::NotConnected(host.to_string()))?;
            hosts
                .remove(host)
                .ok_or_else(|| RemoteError::NotConnected(host.to_string()))?
        };

        let mut cmd = Command::new(&self.ssh);
        cmd.args(self.base_args(&options))
            .args(["-O", "exit"])
            .arg(host);
        let mut child = ManagedChild::spawn(host, cmd, "ssh -O exit", None)?;
        // The master may already be gone; closing is best effort.
        let output = child.wait().await?;
        if !output.ok {
            debug!(%host, stderr = %output.stderr.trim(), "control master already closed");
        }
        Ok(())
    }
}
