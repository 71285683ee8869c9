mod operator;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use eviction::in_use::{InUseDetector, OpenCountDetector};
use eviction::policy::lru::LruPolicy;
use eviction::policy::size::SizePolicy;
use eviction::{ControlSurface, MountTable, PolicyRegistry};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::operator::{Operator, load_image};

#[derive(Parser)]
#[command(name = "ouichefs-evict")]
#[command(about = "Eviction policies for ouichefs volumes")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Mount volume images and read clean commands from stdin
    Start {
        #[arg(long = "image", help = "JSON volume image to mount, in index order")]
        images: Vec<PathBuf>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

impl Default for Commands {
    fn default() -> Self {
        Self::Start { images: Vec::new() }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging based on CLI arguments
    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let images = match cli.command.unwrap_or_default() {
        Commands::Common(command) => return utils::handle_common_command(&command, &config),
        Commands::Start { images } => images,
    };

    config.validate().context("Invalid configuration")?;
    tracing::info!(
        trigger_threshold = config.eviction.trigger_threshold,
        lru_timestamp = %config.lru.timestamp,
        "Loaded configuration"
    );

    let registry = Arc::new(PolicyRegistry::new());
    let detector: Arc<dyn InUseDetector> = Arc::new(OpenCountDetector);
    registry.register(Arc::new(LruPolicy::new(config.lru, Arc::clone(&detector))))?;
    registry.register(Arc::new(SizePolicy::new(Arc::clone(&detector))))?;
    if let Some(name) = &config.eviction.default_policy {
        registry
            .select(name)
            .with_context(|| format!("Failed to select startup policy '{name}'"))?;
    }

    let mounts = Arc::new(MountTable::new());
    let mut operator = Operator::new(ControlSurface::new(Arc::clone(&mounts), registry));
    for path in &images {
        let volume = load_image(path)?;
        operator
            .mount(Arc::new(volume))
            .with_context(|| format!("Failed to mount {}", path.display()))?;
    }

    tracing::info!(
        volumes = mounts.len(),
        policy = %operator.control().registry().active_name(),
        "Ready, reading commands from stdin"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read from stdin")? else {
                    break;
                };
                match operator.execute(&line) {
                    Ok(Some(output)) => println!("{output}"),
                    Ok(None) => {}
                    Err(e) => eprintln!("error: {e:#}"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal.context("Failed to listen for ctrl+c signal")?;
                tracing::info!("Received ctrl+c, shutting down");
                break;
            }
        }
    }

    Ok(())
}
