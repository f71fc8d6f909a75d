//! remoteapp - operator CLI for the container manager
//!
//! Usage:
//!   remoteapp start --user alice --image repo/app:latest --mapping-id m1
//!   remoteapp list --user alice
//!   remoteapp stop --url-id 0a1b2c3d4e5f
//!   remoteapp image repo/app:latest

mod commands;

use clap::{Parser, Subcommand};
use commands::{ImageArgs, ListArgs, ManagerArgs, StartArgs, StopArgs};
use remoteapp_container_manager::ContainerManager;
use tracing::debug;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "remoteapp")]
#[command(author = "Remote Apps Team")]
#[command(version)]
#[command(about = "Start, stop and list remote application containers")]
#[command(propagate_version = true)]
struct Cli {
    #[command(flatten)]
    manager: ManagerArgs,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a container for a user's application grant
    Start(StartArgs),

    /// Stop and remove a container
    #[command(visible_alias = "rm")]
    Stop(StopArgs),

    /// List running containers of the realm
    #[command(visible_alias = "ls")]
    List(ListArgs),

    /// Show the metadata of an image
    Image(ImageArgs),

    /// Show version and build info
    Version,
}

fn init_logging() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("remoteapp=debug".parse().unwrap())
                .add_directive("remoteapp_container_manager=debug".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    let cli = Cli::parse();

    if let Commands::Version = cli.command {
        println!("remoteapp v{}", VERSION);
        println!("  Build: {}", env!("CARGO_PKG_NAME"));
        return Ok(());
    }

    let config = cli.manager.manager_config()?;
    debug!(realm = %config.realm, host = ?config.docker.effective_host(), "Using configuration");
    let manager = ContainerManager::new(config);

    match cli.command {
        Commands::Start(args) => commands::start(&manager, args).await,
        Commands::Stop(args) => commands::stop(&manager, args).await,
        Commands::List(args) => commands::list(&manager, args).await,
        Commands::Image(args) => commands::image(&manager, args).await,
        Commands::Version => Ok(()),
    }
}
