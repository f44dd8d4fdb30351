use clap::{Parser, Subcommand};
use colored::*;
use std::process;
use std::time::Duration;

mod cli;

use cli::projects::ProjectsCommands;
use kiln_cli::{init_logging, Services};
use kiln_config::KilnConfig;

/// Base delay between run retries; grows linearly per attempt
const RETRY_DELAY: Duration = Duration::from_secs(2);

#[derive(Parser)]
#[command(name = "kiln")]
#[command(about = "Kiln CLI - build apps with a code agent in cloud sandboxes")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the code agent for a prompt
    Run {
        /// What to build
        value: String,
        /// Project to run in (falls back to the default project)
        #[arg(long)]
        project_id: Option<String>,
    },
    /// Keep active sandboxes alive and expire unreachable ones
    Maintain {
        /// Run a single sweep and exit
        #[arg(long)]
        once: bool,
    },
    /// Manage projects
    #[command(subcommand)]
    Projects(ProjectsCommands),
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    init_logging();

    let cli = Cli::parse();

    if let Err(e) = handle_command(cli.command).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        process::exit(1);
    }
}

async fn handle_command(command: Commands) -> anyhow::Result<()> {
    let services = Services::from_config(KilnConfig::from_env()).await?;

    match command {
        Commands::Run { value, project_id } => {
            cli::run_agent(&services, &value, project_id.as_deref(), RETRY_DELAY).await
        }
        Commands::Maintain { once } => maintain(&services, once).await,
        Commands::Projects(projects_cmd) => {
            cli::projects::handle_projects_command(&services, projects_cmd, RETRY_DELAY).await
        }
    }
}

async fn maintain(services: &Services, once: bool) -> anyhow::Result<()> {
    let sweeper = services.sweeper();

    if once {
        let report = sweeper.sweep().await?;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    sweeper.start().await;
    println!(
        "{} every {} minutes (Ctrl+C to stop)",
        "Sandbox maintenance running".green().bold(),
        services.config.maintenance_interval_minutes
    );

    tokio::signal::ctrl_c().await?;
    sweeper.stop().await;
    println!("{}", "Sandbox maintenance stopped".yellow());
    Ok(())
}
