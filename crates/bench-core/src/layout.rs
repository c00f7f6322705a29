//! Where the storage system's code, scripts and outputs live on remote hosts.
//!
//! All paths are remote Unix paths and are kept as strings; they are only
//! ever interpolated into shell commands.

use crate::config::LayoutConfig;

/// Prefix for commands that drive the repo's scripts.
pub const XTERM: &str = "TERM=xterm";
pub const DEFAULT_BRANCH: &str = "main";
pub const DEFAULT_REPOSITORY_URL: &str = "https://github.com/mit-sandook/sandook.git";

const DEFAULT_TRACES_DIR: &str = "/dev/shm/sandook";
const DEFAULT_MOUNT_POINT: &str = "/mnt/sandook";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteLayout {
    pub user: String,
    pub code_parent_dir: String,
    pub repository_url: String,
    pub traces_dir: String,
    pub mount_point: String,
}

impl RemoteLayout {
    /// Default layout under the remote user's home directory.
    pub fn for_user(user: &str) -> Self {
        Self {
            user: user.to_string(),
            code_parent_dir: format!("/home/{user}/mit-sandook"),
            repository_url: DEFAULT_REPOSITORY_URL.to_string(),
            traces_dir: DEFAULT_TRACES_DIR.to_string(),
            mount_point: DEFAULT_MOUNT_POINT.to_string(),
        }
    }

    /// Default layout with the campaign file's `[layout]` overrides applied.
    pub fn from_config(user: &str, config: Option<&LayoutConfig>) -> Self {
        let mut layout = Self::for_user(user);
        if let Some(cfg) = config {
            if let Some(dir) = &cfg.code_parent_dir {
                layout.code_parent_dir = dir.trim_end_matches('/').to_string();
            }
            if let Some(url) = &cfg.repository_url {
                layout.repository_url = url.clone();
            }
            if let Some(dir) = &cfg.traces_dir {
                layout.traces_dir = dir.clone();
            }
            if let Some(dir) = &cfg.mount_point {
                layout.mount_point = dir.clone();
            }
        }
        layout
    }

    pub fn code_dir(&self) -> String {
        format!("{}/sandook", self.code_parent_dir)
    }

    /// Remote directory every service writes its logs and traces into.
    pub fn output_dir(&self) -> String {
        format!("{}/sandook-output", self.code_parent_dir)
    }

    pub fn compressed_output(&self) -> String {
        format!("{}.tar.gz", self.output_dir())
    }

    pub fn build_dir(&self) -> String {
        format!("{}/build", self.code_dir())
    }

    pub fn sandook_config_template(&self) -> String {
        format!("{}/config.json", self.build_dir())
    }

    pub fn virtual_disk_config_template(&self) -> String {
        format!("{}/sandook/virtual_disk/virtual_disk.config", self.build_dir())
    }

    pub fn rust_bindings_dir(&self) -> String {
        format!("{}/sandook/virtual_disk/rust_bindings", self.code_dir())
    }

    pub fn loadgen_dir(&self) -> String {
        format!("{}/loadgen", self.code_dir())
    }

    pub fn cargo(&self) -> String {
        format!("/home/{}/.cargo/bin/cargo", self.user)
    }

    /// Default local directory for collected outputs of one run.
    pub fn default_local_output_dir(&self, timestamp: &str) -> String {
        format!(
            "{}/sandook-experiments-output-{timestamp}",
            self.code_parent_dir
        )
    }
}

/// Scripts shipped in the storage system's repository, relative to its root.
pub mod scripts {
    pub const INSTALL_DEPS: &str = "scripts/install_deps.sh";
    pub const BUILD: &str = "scripts/build.sh";
    pub const RUN: &str = "scripts/run.sh";
    pub const SETUP: &str = "scripts/setup.sh";
    pub const FORMAT_DISK: &str = "scripts/format_disk.sh";
}
