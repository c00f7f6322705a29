//! bench — drives storage benchmark campaigns over ssh.
//!
//! # Usage
//!
//! ```text
//! bench run --config config.toml --user alice --get-passphrase
//! bench merge-buckets -i out/loadgen_buckets -o out/loadgen_merged.csv
//! bench validate --output-dir out --disks 3
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "bench",
    about = "benchgrid — storage benchmark campaigns",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a full campaign: provision, start services, run the workload,
    /// tear down, collect and validate.
    Run(RunArgs),
    /// Merge per-client latency histograms into one CSV.
    MergeBuckets {
        /// Directory holding loadgen_latencies*.txt files.
        #[arg(short = 'i', long)]
        input_dir: PathBuf,
        /// Path of the merged CSV.
        #[arg(short = 'o', long)]
        output_filepath: PathBuf,
    },
    /// Check an already collected output tree.
    Validate {
        /// Local output directory of a previous run.
        #[arg(long)]
        output_dir: PathBuf,
        /// Number of disks the campaign ran with.
        #[arg(long)]
        disks: usize,
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Args)]
pub struct RunArgs {
    /// Campaign file.
    #[arg(long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Where collected outputs go. Defaults to a timestamped directory
    /// next to the code.
    #[arg(long)]
    pub output_dir: Option<PathBuf>,

    /// Remote user on every host.
    #[arg(long)]
    pub user: String,

    /// Prompt for the ssh key passphrase.
    #[arg(long)]
    pub get_passphrase: bool,

    #[arg(long)]
    pub ssh_key_path: Option<PathBuf>,

    /// Branch of the storage system to run.
    #[arg(long, default_value = bench_core::layout::DEFAULT_BRANCH)]
    pub branch: String,

    /// Force a clean clone and build.
    #[arg(long)]
    pub clean: bool,

    /// Do not rebuild the code.
    #[arg(long)]
    pub no_build: bool,

    /// Pull and build the latest code of the branch.
    #[arg(long)]
    pub pull: bool,

    /// Fetch the controller's detailed traces.
    #[arg(long)]
    pub get_controller_traces: bool,

    /// Format disks before launching the disk servers.
    #[arg(long)]
    pub format_disks: bool,

    /// Give up on any single remote command after this many seconds.
    #[arg(long)]
    pub command_timeout_secs: Option<u64>,

    /// Print the campaign report as JSON.
    #[arg(long)]
    pub json: bool,
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,bench=debug,benchgrid=debug"))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_json)?;

    match cli.command {
        Command::Run(args) => commands::run::run(args).await,
        Command::MergeBuckets {
            input_dir,
            output_filepath,
        } => commands::merge::merge(&input_dir, &output_filepath),
        Command::Validate {
            output_dir,
            disks,
            format,
        } => commands::validate::validate(&output_dir, disks, &format),
    }
}
