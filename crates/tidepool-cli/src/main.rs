//! tidepool: run the share scheduler from the command line.
//!
//! # Usage
//!
//! ```text
//! tidepool schedule --config scheduler.toml --backends reports.json --request request.json
//! tidepool pools --backends reports.json --filter backend=lvm
//! tidepool rpc --url http://nas:8457/rest/nms --user admin --password secret \
//!     --object folder --method get_child_props --params '["pool/share", ""]'
//! ```

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "tidepool",
    about = "tidepool: share placement scheduler",
    version,
    propagate_version = true
)]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Place a share on one of the reporting backends.
    ///
    /// Every backend in the reports file counts as alive. The decision is
    /// persisted to an in-memory store and the resulting backend command is
    /// printed along with the chosen host.
    Schedule {
        /// Scheduler configuration (TOML). Defaults apply when omitted.
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Backend capability reports (JSON).
        #[arg(short, long)]
        backends: PathBuf,
        /// Request spec and filter properties (JSON).
        #[arg(short, long)]
        request: PathBuf,
        /// Number of distinct destinations to choose. Above 1 nothing is
        /// persisted or dispatched.
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// List reported pools, optionally filtered by regex.
    Pools {
        #[arg(short, long)]
        config: Option<PathBuf>,
        #[arg(short, long)]
        backends: PathBuf,
        /// `key=regex` filter on name, host, backend or pool. Repeatable.
        #[arg(short, long = "filter")]
        filters: Vec<String>,
    },
    /// Make one authenticated JSON-RPC call.
    Rpc {
        #[arg(long)]
        url: String,
        #[arg(long)]
        user: String,
        #[arg(long)]
        password: String,
        #[arg(long)]
        object: String,
        #[arg(long)]
        method: String,
        /// JSON parameters.
        #[arg(long, default_value = "[]")]
        params: String,
    },
}

fn init_tracing(json: bool) -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new("info,tidepool=debug"))?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
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
        Commands::Schedule {
            config,
            backends,
            request,
            count,
        } => commands::schedule::run(config.as_deref(), &backends, &request, count),
        Commands::Pools {
            config,
            backends,
            filters,
        } => commands::pools::run(config.as_deref(), &backends, &filters),
        Commands::Rpc {
            url,
            user,
            password,
            object,
            method,
            params,
        } => commands::rpc::run(&url, &user, &password, &object, &method, &params).await,
    }
}
