//! Provisioning the storage system's repository on a host.
//!
//! The repository is cloned once, then kept on the requested branch and
//! rebuilt only when something asked for it.

use bench_core::layout::{DEFAULT_BRANCH, XTERM, scripts};
use benchgrid_remote::CommandLine;
use tracing::debug;

use crate::error::OpResult;
use crate::host::{Failure, HostOps};

/// Which repository state a campaign wants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoOptions {
    pub branch: String,
    /// Remove the checkout and start from a fresh clone.
    pub clean: bool,
    /// Skip the build unless a clean or pull forces one.
    pub no_build: bool,
    /// Pull even when already on the right branch.
    pub pull: bool,
}

impl Default for RepoOptions {
    fn default() -> Self {
        Self {
            branch: DEFAULT_BRANCH.to_string(),
            clean: false,
            no_build: false,
            pull: false,
        }
    }
}

impl RepoOptions {
    pub fn should_build(&self) -> bool {
        self.clean || !self.no_build || self.pull
    }
}

impl HostOps {
    /// Bring the checkout on `host` to the requested state.
    pub async fn setup_repository(
        &self,
        host: &str,
        repo: &RepoOptions,
        is_client: bool,
    ) -> OpResult<()> {
        if repo.clean {
            self.clean_repo(host).await?;
        }
        if !self.repo_exists(host).await? {
            self.clone_repo(host, &repo.branch).await?;
            self.install_repo(host).await?;
        }
        if repo.pull || !self.repo_branch_matches(host, &repo.branch).await? {
            self.pull_repo(host, &repo.branch).await?;
        }
        if repo.should_build() {
            self.build_repo(host, is_client).await?;
        }
        debug!(%host, "repository ready");
        Ok(())
    }

    pub async fn clean_repo(&self, host: &str) -> OpResult<()> {
        debug!(%host, "cleaning repository");
        self.pool()
            .run(host, format!("rm -rf {}", self.layout().code_dir()))
            .await?;
        Ok(())
    }

    pub async fn repo_exists(&self, host: &str) -> OpResult<bool> {
        let exists = self
            .pool()
            .run(host, format!("[ -d {} ]", self.layout().code_dir()))
            .await?;
        debug!(%host, exists, "repository lookup");
        Ok(exists)
    }

    pub async fn repo_branch_matches(&self, host: &str, branch: &str) -> OpResult<bool> {
        let output = self
            .checked(
                host,
                "check repository branch",
                Failure::Provision,
                format!(
                    "cd {}; git branch --show-current;",
                    self.layout().code_dir()
                ),
            )
            .await?;
        Ok(output.stdout.trim() == branch)
    }

    pub async fn add_github_to_known_hosts(&self, host: &str) -> OpResult<()> {
        self.checked(
            host,
            "add github to known hosts",
            Failure::Provision,
            "ssh-keyscan -H github.com >> ~/.ssh/known_hosts",
        )
        .await?;
        Ok(())
    }

    pub async fn clone_repo(&self, host: &str, branch: &str) -> OpResult<()> {
        debug!(%host, %branch, "cloning repository");
        self.add_github_to_known_hosts(host).await?;
        let layout = self.layout();
        let cmd = CommandLine::new()
            .arg(format!("cd {};", layout.code_parent_dir))
            .arg(format!("git clone {};", layout.repository_url))
            .arg(format!("cd {};", layout.code_dir()))
            .arg(format!("git checkout {branch};"))
            .arg("git checkout .;")
            .arg("git pull --rebase;");
        self.checked(host, "clone repository", Failure::Provision, cmd)
            .await?;
        Ok(())
    }

    pub async fn pull_repo(&self, host: &str, branch: &str) -> OpResult<()> {
        debug!(%host, %branch, "pulling repository");
        let cmd = CommandLine::new()
            .arg(format!("cd {};", self.layout().code_dir()))
            .arg("git fetch;")
            .arg(format!("git checkout {branch};"))
            .arg("git checkout .;")
            .arg("git pull --rebase;");
        self.checked(host, "pull repository", Failure::Provision, cmd)
            .await?;
        Ok(())
    }

    /// Install the repo's system dependencies.
    pub async fn install_repo(&self, host: &str) -> OpResult<()> {
        debug!(%host, "installing dependencies");
        self.checked(
            host,
            "install dependencies",
            Failure::Provision,
            self.in_code_dir(format!("./{};", scripts::INSTALL_DEPS)),
        )
        .await?;
        Ok(())
    }

    /// Build the storage system. Clients first build it without LTO so the
    /// virtual-disk bindings and the load generator can link against it.
    pub async fn build_repo(&self, host: &str, is_client: bool) -> OpResult<()> {
        if is_client {
            let cargo = self.layout().cargo();
            self.build_sandook(host, true).await?;
            self.build_with_cargo(
                host,
                "build rust bindings",
                &self.layout().rust_bindings_dir(),
                &cargo,
            )
            .await?;
            self.build_with_cargo(host, "build loadgen", &self.layout().loadgen_dir(), &cargo)
                .await?;
        }
        self.build_sandook(host, false).await
    }

    async fn build_sandook(&self, host: &str, no_lto: bool) -> OpResult<()> {
        debug!(%host, lto = !no_lto, "building");
        let prefix = if no_lto { "NO_LTO=1" } else { "" };
        self.checked(
            host,
            "build repository",
            Failure::Provision,
            self.in_code_dir(format!("{prefix} ./{} clean;", scripts::BUILD)),
        )
        .await?;
        Ok(())
    }

    async fn build_with_cargo(
        &self,
        host: &str,
        action: &'static str,
        dir: &str,
        cargo: &str,
    ) -> OpResult<()> {
        debug!(%host, %dir, "{action}");
        self.checked(
            host,
            action,
            Failure::Provision,
            [
                XTERM.to_string(),
                format!("cd {dir};"),
                format!("{cargo} clean;"),
                format!("{cargo} build --release"),
            ],
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::OpError;
    use crate::test_support::ops_with;
    use benchgrid_remote::ScriptedTransport;

    fn has(transport: &ScriptedTransport, host: &str, needle: &str) -> bool {
        transport.position(host, needle).is_some()
    }

    #[test]
    fn build_decision() {
        let mut o = RepoOptions {
            no_build: true,
            ..Default::default()
        };
        assert!(!o.should_build());
        o.pull = true;
        assert!(o.should_build());
        o.pull = false;
        o.clean = true;
        assert!(o.should_build());
        assert!(RepoOptions::default().should_build());
    }

    #[tokio::test]
    async fn missing_checkout_is_cloned_and_installed() {
        let transport = ScriptedTransport::new()
            .fail_on("[ -d ")
            .respond("git branch --show-current", "main\n");
        let ops = ops_with(transport.clone(), &["n1"]).await;
        let repo = RepoOptions {
            no_build: true,
            ..Default::default()
        };
        ops.setup_repository("n1", &repo, false).await.unwrap();

        let keyscan = transport.position("n1", "ssh-keyscan").unwrap();
        let clone = transport.position("n1", "git clone").unwrap();
        let install = transport.position("n1", "install_deps.sh").unwrap();
        assert!(keyscan < clone && clone < install);
        assert!(!has(&transport, "n1", "git fetch"));
        assert!(!has(&transport, "n1", "build.sh"));
    }

    #[tokio::test]
    async fn branch_mismatch_pulls_and_rebuilds() {
        let transport =
            ScriptedTransport::new().respond("git branch --show-current", "feature-x\n");
        let ops = ops_with(transport.clone(), &["n1"]).await;
        let repo = RepoOptions {
            no_build: true,
            ..Default::default()
        };
        assert!(!repo.should_build());
        ops.setup_repository("n1", &repo, false).await.unwrap();
        assert!(has(&transport, "n1", "git checkout main;"));
        assert!(!has(&transport, "n1", "git clone"));
        assert!(!has(&transport, "n1", "build.sh"));
    }

    #[tokio::test]
    async fn clients_build_bindings_and_loadgen_first() {
        let transport = ScriptedTransport::new().respond("git branch --show-current", "main\n");
        let ops = ops_with(transport.clone(), &["c1"]).await;
        ops.setup_repository("c1", &RepoOptions::default(), true)
            .await
            .unwrap();

        let commands = transport.commands_on("c1");
        let builds: Vec<&String> = commands
            .iter()
            .filter(|c| c.contains("build.sh") || c.contains("cargo build"))
            .collect();
        assert_eq!(builds.len(), 4);
        assert!(builds[0].contains("NO_LTO=1"));
        assert!(builds[1].contains("rust_bindings"));
        assert!(builds[2].contains("/loadgen;"));
        assert!(builds[3].contains(" ./scripts/build.sh clean;"));
        assert!(!builds[3].contains("NO_LTO"));
        assert!(builds[1].contains("/home/alice/.cargo/bin/cargo build --release"));
    }

    #[tokio::test]
    async fn clean_removes_the_checkout_first() {
        let transport = ScriptedTransport::new().respond("git branch --show-current", "main\n");
        let ops = ops_with(transport.clone(), &["n1"]).await;
        let repo = RepoOptions {
            clean: true,
            ..Default::default()
        };
        ops.setup_repository("n1", &repo, false).await.unwrap();
        assert_eq!(
            transport.commands_on("n1")[0],
            "rm -rf /home/alice/mit-sandook/sandook"
        );
    }

    #[tokio::test]
    async fn failed_build_is_a_provision_error() {
        let transport = ScriptedTransport::new()
            .respond("git branch --show-current", "main\n")
            .fail_on("cargo build");
        let ops = ops_with(transport, &["c1"]).await;
        let err = ops
            .setup_repository("c1", &RepoOptions::default(), true)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            OpError::Provision {
                action: "build rust bindings",
                ..
            }
        ));
    }
}
