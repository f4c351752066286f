//! Command-line surface. `serve` is the only long-running command
//! (spec.md §5); `queue` and `channels` are thin read/write helpers over
//! the same store, useful for operating the process without the REST API.

pub mod channels;
pub mod queue;
pub mod serve;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "latticeflow", version, about = "Design-library ingest and organizer daemon")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Root directory for the sqlite database, staging, and library
    /// (defaults to `~/.latticeflow/data`, or `$LATTICEFLOW_HOME/data`).
    #[arg(long, global = true)]
    pub data_dir: Option<std::path::PathBuf>,

    #[arg(long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the REST API, worker manager, sync service, and cleanup service.
    Serve(serve::ServeArgs),
    /// Inspect or edit the job queue.
    Queue(queue::QueueArgs),
    /// Inspect discovered channels.
    Channels(channels::ChannelsArgs),
}

pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let layout = match cli.data_dir {
        Some(root) => latticeflow_core::paths::DataLayout::from_root(root),
        None => latticeflow_core::paths::DataLayout::new(),
    };
    layout.ensure_all()?;

    latticeflow_logging::init_logging(latticeflow_logging::LogConfig {
        app_name: "latticeflow",
        logs_dir: layout.logs_dir(),
        verbose: cli.verbose,
    })?;

    match cli.command {
        Commands::Serve(args) => serve::run(layout, args).await,
        Commands::Queue(args) => queue::run(layout, args).await,
        Commands::Channels(args) => channels::run(layout, args).await,
    }
}
