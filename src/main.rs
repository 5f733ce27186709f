use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

use orbiter::{Manifest, Orchestrator};

#[derive(Parser)]
#[command(name = "orbiter", version, about = "Local multi-service orchestrator")]
struct Cli {
    /// Path to the project manifest.
    #[arg(short, long, default_value = "orbiter.yml", global = true)]
    manifest: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every declared service, or just the ones named.
    Up {
        services: Vec<String>,
    },
    /// Stop every running service, or just the ones named.
    Down {
        services: Vec<String>,
    },
    /// Print the dependency-level launch order without starting anything.
    Plan,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let manifest_text = std::fs::read_to_string(&cli.manifest)
        .with_context(|| format!("could not read manifest at {}", cli.manifest.display()))?;
    let manifest = Manifest::from_yaml(&manifest_text)?;
    let manifest_root = cli
        .manifest
        .parent()
        .map(|p| p.to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."));

    match cli.command {
        Commands::Plan => {
            manifest.validate()?;
            let graph = orbiter::graph::DependencyGraph::from_manifest(&manifest);
            let levels = graph.topological_sort()?;
            for (i, level) in levels.iter().enumerate() {
                println!("{} {}", format!("level {}:", i).bold(), level.join(", "));
            }
        }
        Commands::Up { services } => {
            let orchestrator = Orchestrator::new(manifest, manifest_root)?;
            if services.is_empty() {
                orchestrator.start_all().await?;
            } else {
                orchestrator.start_services(&services).await?;
            }
            println!("{}", "all requested services are healthy".green());
        }
        Commands::Down { services } => {
            let orchestrator = Orchestrator::new(manifest, manifest_root)?;
            if services.is_empty() {
                orchestrator.stop_all().await;
            } else {
                for name in &services {
                    orchestrator.stop_service(name).await?;
                }
            }
            println!("{}", "stopped".green());
        }
    }

    Ok(())
}
