// ABOUTME: One end-to-end code agent run, from trigger to persisted outcome
// ABOUTME: Resolves project and sandbox, drives the router loop, then records a result or error message

use crate::completion::detect_completion;
use crate::prompt::SYSTEM_PROMPT;
use crate::providers::{AgentProvider, AgentProviderError, ChatMessage, ToolDefinition, TurnRequest};
use crate::router::{DoneReason, Router, RouterConfig, RouterDecision};
use crate::state::RunState;
use crate::tools::{tool_definitions, ToolBridge, ToolCall, ToolError};
use kiln_sandbox::{ManagerError, SandboxManager, SandboxResolution};
use kiln_storage::{
    FileMap, MessageStorage, MessageType, NewFragment, NewMessage, ProjectStorage, SqlitePool,
    StorageError,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FRAGMENT_TITLE: &str = "Fragment";
pub const ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Error, Debug)]
pub enum RunError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] ManagerError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentProviderError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    pub value: String,
    #[serde(default)]
    pub project_id: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutput {
    pub project_id: String,
    pub url: String,
    pub title: String,
    pub files: FileMap,
    pub summary: Option<String>,
    pub success: bool,
}

#[derive(Debug, Clone)]
pub struct RunConfig {
    pub model: String,
    /// Sandbox port the preview is served on
    pub preview_port: u16,
    pub router: RouterConfig,
}

pub struct CodeAgentRun {
    projects: ProjectStorage,
    messages: MessageStorage,
    sandboxes: Arc<SandboxManager>,
    agent: Arc<dyn AgentProvider>,
    tools: Vec<ToolDefinition>,
    config: RunConfig,
}

impl CodeAgentRun {
    pub fn new(
        pool: SqlitePool,
        sandboxes: Arc<SandboxManager>,
        agent: Arc<dyn AgentProvider>,
        config: RunConfig,
    ) -> Self {
        Self {
            projects: ProjectStorage::new(pool.clone()),
            messages: MessageStorage::new(pool),
            sandboxes,
            agent,
            tools: tool_definitions(),
            config,
        }
    }

    /// Execute one run and persist exactly one assistant message for it.
    ///
    /// Errors mean nothing was persisted; callers may retry with a fresh run.
    pub async fn execute(&self, request: RunRequest) -> Result<RunOutput, RunError> {
        let project = self
            .projects
            .resolve_project(request.project_id.as_deref())
            .await?;
        info!("Starting code agent run for project {}", project.id);

        let sandbox = self.sandboxes.resolve(&project.id).await?;
        let bridge = ToolBridge::new(self.sandboxes.clone(), sandbox.sandbox_id());

        let mut state = RunState::new();
        let reason = self.drive(&request.value, &bridge, &mut state).await?;
        let success = state.is_complete();
        info!(
            "Agent loop finished ({:?}), success: {}, files: {}",
            reason,
            success,
            state.files.len()
        );

        let url = self.preview_url(sandbox.sandbox_id()).await?;

        if success {
            let (created_at, expires_at) = match &sandbox {
                SandboxResolution::Created {
                    created_at,
                    expires_at,
                    ..
                } => (Some(*created_at), Some(*expires_at)),
                SandboxResolution::Reused { .. } => (None, None),
            };
            let summary = state.summary.clone().unwrap_or_default();

            let (message, fragment) = self
                .messages
                .create_message_with_fragment(
                    NewMessage::assistant(&project.id, MessageType::Result, summary),
                    NewFragment {
                        sandbox_id: sandbox.sandbox_id().to_string(),
                        sandbox_url: url.clone(),
                        title: FRAGMENT_TITLE.to_string(),
                        files: state.files.clone(),
                        sandbox_created_at: created_at,
                        sandbox_expires_at: expires_at,
                    },
                )
                .await?;
            info!("Saved result message {} with fragment {}", message.id, fragment.id);
        } else {
            let message = self
                .messages
                .create_message(NewMessage::assistant(
                    &project.id,
                    MessageType::Error,
                    ERROR_MESSAGE,
                ))
                .await?;
            warn!("Run did not complete, saved error message {}", message.id);
        }

        Ok(RunOutput {
            project_id: project.id,
            url,
            title: FRAGMENT_TITLE.to_string(),
            files: state.files,
            summary: state.summary,
            success,
        })
    }

    async fn drive(
        &self,
        value: &str,
        bridge: &ToolBridge,
        state: &mut RunState,
    ) -> Result<DoneReason, RunError> {
        let mut router = Router::new(self.config.router);
        let mut transcript = vec![ChatMessage::user(value)];

        loop {
            if let RouterDecision::Done(reason) = router.decide(state) {
                return Ok(reason);
            }

            let reply = self
                .agent
                .complete(TurnRequest {
                    system: SYSTEM_PROMPT,
                    model: &self.config.model,
                    transcript: &transcript,
                    tools: &self.tools,
                })
                .await?;
            debug!(
                "Turn {}: {} tool calls",
                router.calls(),
                reply.tool_calls.len()
            );

            let turn_start = transcript.len();
            transcript.push(reply.clone());

            for request in &reply.tool_calls {
                let output = match ToolCall::parse(&request.name, &request.arguments) {
                    Ok(call) => {
                        debug!("Executing {} ({})", call.name(), request.id);
                        bridge.execute(&call, state).await?
                    }
                    Err(e) => {
                        warn!("Rejected tool call {}: {}", request.name, e);
                        format!("Error: {}", e)
                    }
                };
                transcript.push(ChatMessage::tool_result(&request.id, output));
            }

            detect_completion(state, &transcript[turn_start..]);
        }
    }

    async fn preview_url(&self, sandbox_id: &str) -> Result<String, RunError> {
        let handle = self.sandboxes.connect(sandbox_id).await?;
        Ok(format!("https://{}", handle.host_for(self.config.preview_port)))
    }
}
