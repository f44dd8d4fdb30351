pub mod projects;

use colored::*;
use kiln_agent::RunOutput;
use kiln_cli::Services;
use std::time::Duration;

pub async fn run_agent(
    services: &Services,
    value: &str,
    project_id: Option<&str>,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    println!("{}", "Running code agent...".blue().bold());
    let output = services.submit(value, project_id, retry_delay).await?;
    print_run_output(&output);
    Ok(())
}

pub fn print_run_output(output: &RunOutput) {
    println!();
    if output.success {
        println!("{}", "Build complete".green().bold());
    } else {
        println!("{}", "Something went wrong. Please try again.".red().bold());
    }

    println!("  {} {}", "Project:".bold(), output.project_id);
    println!("  {} {}", "Preview:".bold(), output.url.cyan());

    if !output.files.is_empty() {
        println!("  {}", "Files:".bold());
        for path in output.files.keys() {
            println!("    {}", path);
        }
    }

    if let Some(summary) = &output.summary {
        println!();
        println!("{}", summary.dimmed());
    }
}
