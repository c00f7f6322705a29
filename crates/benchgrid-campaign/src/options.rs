//! Run options that are not part of the campaign file.

use std::path::PathBuf;
use std::time::Duration;

use benchgrid_ops::RepoOptions;
use benchgrid_remote::Credentials;

/// How a campaign is run: who connects, where output goes and which
/// optional steps are taken.
#[derive(Debug, Clone)]
pub struct CampaignOptions {
    /// Local directory receiving every host's output.
    pub local_output_dir: PathBuf,
    /// Remote user on every host.
    pub user: String,
    /// Typed whenever a remote command asks for it, e.g. a git clone over
    /// a protected key.
    pub passphrase: Option<String>,
    pub ssh_key_path: Option<PathBuf>,
    pub repo: RepoOptions,
    /// Copy the controller's in-memory traces into its output first.
    pub get_controller_traces: bool,
    /// Format every disk before the disk servers start.
    pub format_disks: bool,
    /// Upper bound for any single remote command. `None` waits forever.
    pub command_timeout: Option<Duration>,
}

impl CampaignOptions {
    pub fn new(user: impl Into<String>, local_output_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_output_dir: local_output_dir.into(),
            user: user.into(),
            passphrase: None,
            ssh_key_path: None,
            repo: RepoOptions::default(),
            get_controller_traces: false,
            format_disks: false,
            command_timeout: None,
        }
    }

    pub fn credentials(&self) -> Credentials {
        let mut credentials = Credentials::new(&self.user);
        if let Some(key) = &self.ssh_key_path {
            credentials = credentials.with_key(key);
        }
        if let Some(passphrase) = &self.passphrase {
            credentials = credentials.with_passphrase(passphrase);
        }
        credentials
    }
}
