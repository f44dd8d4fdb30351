use clap::Subcommand;
use colored::*;
use comfy_table::{modifiers::UTF8_ROUND_CORNERS, presets::UTF8_FULL, ContentArrangement, Table};
use kiln_agent::RunRequest;
use kiln_cli::{run_with_retry, Services};
use kiln_storage::{MessageRole, MessageType, Project};
use std::time::Duration;

#[derive(Subcommand)]
pub enum ProjectsCommands {
    /// List all projects, most recently active first
    List,
    /// Show a project and its conversation
    Show {
        /// Project ID to show
        id: String,
    },
    /// Create a project from a prompt and run the agent for it
    Create {
        /// What to build
        value: String,
    },
}

pub async fn handle_projects_command(
    services: &Services,
    command: ProjectsCommands,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    match command {
        ProjectsCommands::List => list_projects(services).await,
        ProjectsCommands::Show { id } => show_project(services, &id).await,
        ProjectsCommands::Create { value } => create_project(services, &value, retry_delay).await,
    }
}

async fn list_projects(services: &Services) -> anyhow::Result<()> {
    let projects = services.projects().list_projects().await?;

    if projects.is_empty() {
        println!("{}", "No projects found".yellow());
        println!(
            "{}",
            "Use 'kiln projects create <prompt>' to create your first project".dimmed()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec!["ID", "Name", "Created", "Updated"]);

    for project in &projects {
        table.add_row(vec![
            project.id.clone(),
            truncate(&project.name, 30),
            format_date(project),
            project.updated_at.format("%Y-%m-%d %H:%M").to_string(),
        ]);
    }

    println!("{}", table);
    println!("Total: {} projects", projects.len().to_string().cyan());

    Ok(())
}

async fn show_project(services: &Services, id: &str) -> anyhow::Result<()> {
    let project = services.projects().get_project(id).await?;
    let messages = services.messages().list_messages(&project.id).await?;

    println!("{}", format!("Project - {}", project.name).blue().bold());
    println!("  {} {}", "ID:".bold(), project.id);
    println!("  {} {}", "Created:".bold(), format_date(&project));
    println!();

    if messages.is_empty() {
        println!("{}", "No messages yet".dimmed());
        return Ok(());
    }

    for entry in &messages {
        let message = &entry.message;
        let label = match (message.role, message.message_type) {
            (MessageRole::User, _) => "You".cyan().bold(),
            (MessageRole::Assistant, MessageType::Result) => "Agent".green().bold(),
            (MessageRole::Assistant, MessageType::Error) => "Agent".red().bold(),
        };
        println!("{} {}", label, message.created_at.format("%H:%M:%S").to_string().dimmed());
        println!("{}", message.content);

        if let Some(fragment) = &entry.fragment {
            println!(
                "  {} {} ({} files)",
                "Preview:".bold(),
                fragment.sandbox_url.cyan(),
                fragment.files.len()
            );
            if let Some(expires_at) = fragment.sandbox_expires_at {
                println!("  {} {}", "Sandbox expires:".bold(), expires_at.to_rfc3339());
            }
        }
        println!();
    }

    Ok(())
}

async fn create_project(
    services: &Services,
    value: &str,
    retry_delay: Duration,
) -> anyhow::Result<()> {
    let project = services.projects().create_project_with_message(value).await?;
    println!(
        "{} {} ({})",
        "Created project".green().bold(),
        project.name,
        project.id
    );

    let output = run_with_retry(
        &services.code_agent_run(),
        RunRequest {
            value: value.to_string(),
            project_id: Some(project.id),
        },
        services.config.job_retry_attempts,
        retry_delay,
    )
    .await?;

    super::print_run_output(&output);
    Ok(())
}

fn format_date(project: &Project) -> String {
    project.created_at.format("%Y-%m-%d %H:%M").to_string()
}

fn truncate(value: &str, max: usize) -> String {
    if value.chars().count() <= max {
        value.to_string()
    } else {
        let cut: String = value.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", cut)
    }
}
