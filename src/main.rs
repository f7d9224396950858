//! Bakeshop - layers fillings onto the pi-gen image pipeline.
//!
//! A JSON recipe names the image, the filling directories to stage and
//! the pipeline settings. Bakeshop stages the fillings, writes the
//! pipeline config, runs the build and zips the result.

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{error, info};

use bakeshop::commands::{self, BuildOptions};
use bakeshop::config::Config;
use bakeshop::git::GitCli;
use bakeshop::preflight;
use bakeshop::recipe::{self, fetch::HttpFetcher};

#[derive(Parser)]
#[command(name = "bakeshop")]
#[command(about = "Bake Raspberry Pi images from a recipe and fillings")]
#[command(
    after_help = "EXAMPLES:\n  bakeshop -r recipes/kiosk.json        Build the kiosk image\n  bakeshop -r https://host/kiosk.json   Build from a remote recipe\n  bakeshop -r recipes/kiosk.json clean  Remove kiosk staging"
)]
struct Cli {
    /// Recipe file path or http(s) URL
    #[arg(short, long)]
    recipe: String,

    /// Write the pipeline config and stop before building
    #[arg(long)]
    config_only: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Release pipeline mounts and remove this recipe's staging
    Clean,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    if !preflight::is_root() {
        error!("bakeshop must be run as root");
        std::process::exit(1);
    }

    let base_dir = std::env::current_dir()?;
    dotenvy::dotenv().ok();
    let config = Config::load(&base_dir);
    config.log();

    let fetcher = HttpFetcher::new()?;
    let recipe = recipe::load(&cli.recipe, &config.recipes_dir, &fetcher)?;

    match cli.command {
        Some(Commands::Clean) => {
            commands::cmd_clean(&config, &recipe);
        }
        None => {
            let options = BuildOptions {
                config_only: cli.config_only,
            };
            if let Some(archive) = commands::cmd_build(&config, &recipe, &GitCli, options)? {
                info!("Baked {}", archive.display());
            }
        }
    }

    Ok(())
}
