use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use bench_core::{CampaignFile, RemoteLayout, Topology};
use benchgrid_campaign::{Campaign, CampaignOptions, ServersOnly, Workload, workload_for};
use benchgrid_ops::RepoOptions;
use benchgrid_remote::SshTransport;
use tracing::info;

use crate::RunArgs;

/// The one workload every client is configured with. A campaign without
/// clients only drives the storage side.
fn select_workload(topology: &Topology) -> anyhow::Result<Box<dyn Workload>> {
    let apps: BTreeSet<&str> = topology.clients().iter().map(|c| c.params.app.as_str()).collect();
    match apps.len() {
        0 => Ok(Box::new(ServersOnly)),
        1 => Ok(workload_for(apps.first().copied().unwrap_or_default())?),
        _ => bail!(
            "clients run different apps ({}); one campaign drives one workload",
            apps.into_iter().collect::<Vec<_>>().join(", ")
        ),
    }
}

fn options(args: &RunArgs, layout: &RemoteLayout) -> anyhow::Result<CampaignOptions> {
    let output_dir = match &args.output_dir {
        Some(dir) => dir.clone(),
        None => {
            let stamp = chrono::Local::now().format("%Y%m%d-%H%M%S").to_string();
            PathBuf::from(layout.default_local_output_dir(&stamp))
        }
    };
    let passphrase = if args.get_passphrase {
        Some(
            dialoguer::Password::new()
                .with_prompt("Enter passphrase for SSH key (if any)")
                .allow_empty_password(true)
                .interact()
                .context("cannot read passphrase")?,
        )
    } else {
        None
    };

    let mut options = CampaignOptions::new(&args.user, output_dir);
    options.passphrase = passphrase.filter(|p| !p.is_empty());
    options.ssh_key_path = args.ssh_key_path.clone();
    options.repo = RepoOptions {
        branch: args.branch.clone(),
        clean: args.clean,
        no_build: args.no_build,
        pull: args.pull,
    };
    options.get_controller_traces = args.get_controller_traces;
    options.format_disks = args.format_disks;
    options.command_timeout = args.command_timeout_secs.map(Duration::from_secs);
    Ok(options)
}

pub async fn run(args: RunArgs) -> anyhow::Result<()> {
    let file = CampaignFile::from_file(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    let topology = Topology::parse(&file)?;
    let layout = RemoteLayout::from_config(&args.user, file.layout.as_ref());
    let workload = select_workload(&topology)?;
    let options = options(&args, &layout)?;
    let output_dir = options.local_output_dir.clone();

    info!(
        config = %args.config.display(),
        output = %output_dir.display(),
        workload = workload.name(),
        "campaign configured"
    );

    let transport = Arc::new(SshTransport::new()?);
    let mut campaign = Campaign::new(topology, layout, options, transport);
    let report = campaign.run(workload.as_ref()).await?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for category in &report.validation.categories {
            println!("{}", category.summary());
        }
        println!("✓ Outputs in {}", output_dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(apps: &[&str]) -> Topology {
        let mut text = String::from(
            "[machines.m0]\nhost = \"h0\"\nnet_iface = \"eth0\"\nroles = [\"controller\"]\n\
             [machines.m0.controller]\nip = \"10.0.0.1\"\n\
             control_plane_scheduler_type = \"p\"\ndata_plane_scheduler_type = \"d\"\n",
        );
        for (i, app) in apps.iter().enumerate() {
            text.push_str(&format!(
                "[machines.c{i}]\nhost = \"c{i}\"\nnet_iface = \"eth0\"\nroles = [\"client_{i}\"]\n\
                 [machines.c{i}.client_{i}]\nip = \"10.0.1.{i}\"\ncores = 1\napp = \"{app}\"\n"
            ));
        }
        Topology::parse(&CampaignFile::parse(&text).unwrap()).unwrap()
    }

    #[test]
    fn one_app_selects_its_workload() {
        let workload = select_workload(&topology(&["loadgen", "loadgen"])).unwrap();
        assert_eq!(workload.name(), "loadgen");
    }

    #[test]
    fn mixed_or_unknown_apps_are_rejected() {
        assert!(select_workload(&topology(&["loadgen", "fio"])).is_err());
        assert!(select_workload(&topology(&["fio"])).is_err());
    }

    #[test]
    fn no_clients_drives_servers_only() {
        let workload = select_workload(&topology(&[])).unwrap();
        assert_eq!(workload.name(), ServersOnly::NAME);
    }

    #[test]
    fn run_flags_become_options() {
        let args = RunArgs {
            config: PathBuf::from("config.toml"),
            output_dir: None,
            user: "alice".to_string(),
            get_passphrase: false,
            ssh_key_path: Some(PathBuf::from("/k")),
            branch: "dev".to_string(),
            clean: false,
            no_build: true,
            pull: false,
            get_controller_traces: true,
            format_disks: false,
            command_timeout_secs: Some(90),
            json: false,
        };
        let layout = RemoteLayout::for_user("alice");
        let options = options(&args, &layout).unwrap();
        assert!(
            options
                .local_output_dir
                .to_string_lossy()
                .starts_with("/home/alice/mit-sandook/sandook-experiments-output-")
        );
        assert!(!options.repo.should_build());
        assert_eq!(options.repo.branch, "dev");
        assert_eq!(options.command_timeout, Some(Duration::from_secs(90)));
        assert!(options.get_controller_traces);
        assert_eq!(options.credentials().ssh_key_path, Some(PathBuf::from("/k")));
    }
}
