// ABOUTME: Service wiring for the kiln binary: storage, sandbox provider, agent and sweeper
// ABOUTME: Also owns logging setup and the retry policy for agent runs

use kiln_agent::{
    AgentProvider, AgentProviderError, CodeAgentRun, OpenAIProvider, RouterConfig, RunConfig,
    RunError, RunOutput, RunRequest,
};
use kiln_config::{constants, KilnConfig};
use kiln_sandbox::{
    E2BProvider, MaintenanceConfig, MaintenanceSweeper, ProviderError, SandboxManager,
    SandboxManagerConfig, SandboxProvider,
};
use kiln_storage::{
    FragmentStorage, MessageStorage, NewMessage, ProjectStorage, SqlitePool, StorageError,
};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Error, Debug)]
pub enum SetupError {
    #[error("{0} is not set")]
    MissingSetting(&'static str),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sandbox provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Agent provider error: {0}")]
    Agent(#[from] AgentProviderError),
}

/// Install the global tracing subscriber; `RUST_LOG` overrides the default `info` level
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .compact()
        .init();
}

/// Everything a command needs, built once from configuration
pub struct Services {
    pub config: KilnConfig,
    pub pool: SqlitePool,
    pub fragments: Arc<FragmentStorage>,
    pub sandboxes: Arc<SandboxManager>,
    agent: Arc<dyn AgentProvider>,
}

impl Services {
    pub async fn from_config(config: KilnConfig) -> Result<Self, SetupError> {
        let api_key = config
            .e2b_api_key
            .clone()
            .ok_or(SetupError::MissingSetting(constants::E2B_API_KEY))?;
        let request_timeout = Duration::from_secs(config.http_request_timeout_secs);
        let connect_timeout = Duration::from_secs(config.http_connect_timeout_secs);

        let sandbox_provider = E2BProvider::with_timeouts(
            api_key,
            Some(config.e2b_api_url.clone()),
            Some(config.e2b_domain.clone()),
            request_timeout,
            connect_timeout,
        )?;
        let agent = OpenAIProvider::with_timeouts(
            config.openai_api_key.clone(),
            Some(config.openai_base_url.clone()),
            request_timeout,
            connect_timeout,
        )?;

        let pool = kiln_storage::connect(&config.database_url).await?;
        Ok(Self::new(config, pool, Arc::new(sandbox_provider), Arc::new(agent)))
    }

    pub fn new(
        config: KilnConfig,
        pool: SqlitePool,
        sandbox_provider: Arc<dyn SandboxProvider>,
        agent: Arc<dyn AgentProvider>,
    ) -> Self {
        let fragments = Arc::new(FragmentStorage::new(pool.clone()));
        let sandboxes = Arc::new(SandboxManager::new(
            sandbox_provider,
            fragments.clone(),
            SandboxManagerConfig {
                template: config.sandbox_template.clone(),
                ttl: Duration::from_secs(config.sandbox_ttl_minutes * 60),
            },
        ));

        Self {
            config,
            pool,
            fragments,
            sandboxes,
            agent,
        }
    }

    pub fn projects(&self) -> ProjectStorage {
        ProjectStorage::new(self.pool.clone())
    }

    pub fn messages(&self) -> MessageStorage {
        MessageStorage::new(self.pool.clone())
    }

    pub fn code_agent_run(&self) -> CodeAgentRun {
        CodeAgentRun::new(
            self.pool.clone(),
            self.sandboxes.clone(),
            self.agent.clone(),
            RunConfig {
                model: self.config.agent_model.clone(),
                preview_port: self.config.preview_port,
                router: RouterConfig {
                    soft_limit: self.config.soft_iteration_limit,
                    hard_limit: self.config.max_iterations,
                },
            },
        )
    }

    pub fn sweeper(&self) -> Arc<MaintenanceSweeper> {
        Arc::new(MaintenanceSweeper::new(
            self.sandboxes.clone(),
            self.fragments.clone(),
            MaintenanceConfig {
                interval: Duration::from_secs(self.config.maintenance_interval_minutes * 60),
                batch_size: self.config.maintenance_batch_size,
            },
        ))
    }

    /// Record the user's message in the resolved project, then run the agent for it
    pub async fn submit(
        &self,
        value: &str,
        project_id: Option<&str>,
        retry_delay: Duration,
    ) -> Result<RunOutput, RunError> {
        let project = self.projects().resolve_project(project_id).await?;
        self.messages()
            .create_message(NewMessage::user(&project.id, value))
            .await?;

        run_with_retry(
            &self.code_agent_run(),
            RunRequest {
                value: value.to_string(),
                project_id: Some(project.id),
            },
            self.config.job_retry_attempts,
            retry_delay,
        )
        .await
    }
}

/// Execute a run, starting a fresh run after each fatal error up to `attempts` times
pub async fn run_with_retry(
    run: &CodeAgentRun,
    request: RunRequest,
    attempts: u32,
    retry_delay: Duration,
) -> Result<RunOutput, RunError> {
    let attempts = attempts.max(1);
    let mut attempt = 1;

    loop {
        match run.execute(request.clone()).await {
            Ok(output) => return Ok(output),
            Err(e) if attempt < attempts => {
                warn!("Run attempt {}/{} failed: {}", attempt, attempts, e);
                tokio::time::sleep(retry_delay * attempt).await;
                attempt += 1;
                info!("Retrying run (attempt {}/{})", attempt, attempts);
            }
            Err(e) => return Err(e),
        }
    }
}
