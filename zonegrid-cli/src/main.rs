//! zonegrid CLI - inspect configuration and placement for zone-aware clusters

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;
use zonegrid_cli::config::{ConfigManager, Roster, format_settings};
use zonegrid_cli::planning::{plan_roster, simulate};

/// Zone-aware cluster membership and placement tool
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Set the log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Grid configuration file (bundled defaults when absent)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate the configuration and print the resolved settings
    Validate,
    /// Plan partition placement for a member roster
    Plan {
        /// Roster file with `[[members]]` entries (id, zone, address)
        #[arg(short, long)]
        members: PathBuf,
    },
    /// Place a synthetic cluster and optionally fail one zone
    Simulate {
        /// Number of zones
        #[arg(long, default_value = "3")]
        zones: u8,

        /// Members in every zone
        #[arg(long, default_value = "2")]
        members_per_zone: u8,

        /// Zone whose members are declared dead after the first plan
        #[arg(long)]
        kill_zone: Option<String>,
    },
}

fn print_lines(lines: &[String]) {
    for line in lines {
        println!("  {line}");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let manager = match cli.config {
        Some(path) => ConfigManager::load_with_path(path)?,
        None => ConfigManager::defaults()?,
    };
    if let Some(path) = manager.path() {
        info!(path = %path.display(), "configuration loaded");
    }
    let settings = manager.settings();

    match cli.command {
        Commands::Validate => {
            println!("configuration ok");
            print_lines(&format_settings(settings));
        }
        Commands::Plan { members } => {
            let roster = Roster::load(&members)?;
            let summary = plan_roster(settings, &roster)
                .await
                .with_context(|| format!("failed to plan roster {}", members.display()))?;
            println!("placement for {} members", roster.members.len());
            print_lines(&summary.render());
        }
        Commands::Simulate {
            zones,
            members_per_zone,
            kill_zone,
        } => {
            let summary = simulate(settings, zones, members_per_zone, kill_zone.as_deref()).await?;
            println!("initial placement");
            print_lines(&summary.before.render());
            if let Some(after) = &summary.after {
                println!("after failing {} members", summary.killed.len());
                print_lines(&after.render());
            }
        }
    }

    Ok(())
}
