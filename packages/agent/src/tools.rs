// ABOUTME: Closed tool set exposed to the agent and its bridge into the sandbox
// ABOUTME: Terminal and read failures become text for the agent; write failures end the run

use crate::providers::ToolDefinition;
use crate::state::RunState;
use kiln_sandbox::{ManagerError, ProviderError, SandboxManager, StreamType};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub const TERMINAL: &str = "terminal";
pub const CREATE_OR_UPDATE_FILES: &str = "createOrUpdateFiles";
pub const READ_FILES: &str = "readFiles";

#[derive(Error, Debug)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments for {tool}: {message}")]
    InvalidArguments { tool: String, message: String },

    #[error(transparent)]
    Sandbox(#[from] ManagerError),

    #[error("Failed to write {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: ProviderError,
    },

    #[error(transparent)]
    Read(ProviderError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInput {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
struct TerminalArgs {
    command: String,
}

#[derive(Debug, Deserialize)]
struct WriteFilesArgs {
    files: Vec<FileInput>,
}

#[derive(Debug, Deserialize)]
struct ReadFilesArgs {
    files: Vec<String>,
}

/// A validated tool invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolCall {
    Terminal { command: String },
    CreateOrUpdateFiles { files: Vec<FileInput> },
    ReadFiles { files: Vec<String> },
}

impl ToolCall {
    /// Validate a model-issued call against the tool's argument schema
    pub fn parse(name: &str, arguments: &str) -> Result<Self, ToolError> {
        let invalid = |e: serde_json::Error| ToolError::InvalidArguments {
            tool: name.to_string(),
            message: e.to_string(),
        };

        match name {
            TERMINAL => {
                let args: TerminalArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(Self::Terminal {
                    command: args.command,
                })
            }
            CREATE_OR_UPDATE_FILES => {
                let args: WriteFilesArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(Self::CreateOrUpdateFiles { files: args.files })
            }
            READ_FILES => {
                let args: ReadFilesArgs = serde_json::from_str(arguments).map_err(invalid)?;
                Ok(Self::ReadFiles { files: args.files })
            }
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Terminal { .. } => TERMINAL,
            Self::CreateOrUpdateFiles { .. } => CREATE_OR_UPDATE_FILES,
            Self::ReadFiles { .. } => READ_FILES,
        }
    }
}

pub fn tool_definitions() -> Vec<ToolDefinition> {
    vec![
        ToolDefinition {
            name: TERMINAL,
            description: "Use the terminal to run commands",
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string" }
                },
                "required": ["command"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: CREATE_OR_UPDATE_FILES,
            description: "Create or update files in sandbox",
            parameters: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": {
                            "type": "object",
                            "properties": {
                                "path": { "type": "string" },
                                "content": { "type": "string" }
                            },
                            "required": ["path", "content"],
                            "additionalProperties": false
                        }
                    }
                },
                "required": ["files"],
                "additionalProperties": false
            }),
        },
        ToolDefinition {
            name: READ_FILES,
            description: "Read files from the sandbox",
            parameters: json!({
                "type": "object",
                "properties": {
                    "files": {
                        "type": "array",
                        "items": { "type": "string" }
                    }
                },
                "required": ["files"],
                "additionalProperties": false
            }),
        },
    ]
}

/// Executes tool calls against one sandbox, opening a fresh connection per call
pub struct ToolBridge {
    manager: Arc<SandboxManager>,
    sandbox_id: String,
}

impl ToolBridge {
    pub fn new(manager: Arc<SandboxManager>, sandbox_id: impl Into<String>) -> Self {
        Self {
            manager,
            sandbox_id: sandbox_id.into(),
        }
    }

    /// Run a tool and return the text handed back to the agent.
    ///
    /// Only `createOrUpdateFiles` can fail; its error ends the run.
    pub async fn execute(&self, call: &ToolCall, state: &mut RunState) -> Result<String, ToolError> {
        match call {
            ToolCall::Terminal { command } => Ok(self.terminal(command).await),
            ToolCall::CreateOrUpdateFiles { files } => self.write_files(files, state).await,
            ToolCall::ReadFiles { files } => Ok(self.read_files(files).await),
        }
    }

    async fn terminal(&self, command: &str) -> String {
        info!("Terminal tool called with command: {}", command);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = match self.manager.connect(&self.sandbox_id).await {
            Ok(handle) => handle
                .run(command, tx)
                .await
                .map_err(|e| e.to_string())
                .and_then(|result| {
                    if result.success() {
                        Ok(result.stdout)
                    } else {
                        Err(ProviderError::CommandExited {
                            exit_code: result.exit_code,
                            stdout: result.stdout,
                            stderr: result.stderr,
                        }
                        .to_string())
                    }
                }),
            Err(e) => Err(e.to_string()),
        };

        match outcome {
            Ok(stdout) => {
                debug!("Terminal command completed, output length {}", stdout.len());
                stdout
            }
            Err(e) => {
                let mut stdout = String::new();
                let mut stderr = String::new();
                while let Ok(chunk) = rx.try_recv() {
                    match chunk.stream {
                        StreamType::Stdout => stdout.push_str(&chunk.data),
                        StreamType::Stderr => stderr.push_str(&chunk.data),
                    }
                }
                let message = format!(
                    "Command failed: {} \nstdout: {}\nstderror: {}",
                    e, stdout, stderr
                );
                warn!("{}", message);
                message
            }
        }
    }

    async fn write_files(
        &self,
        files: &[FileInput],
        state: &mut RunState,
    ) -> Result<String, ToolError> {
        info!(
            "Writing {} files: {:?}",
            files.len(),
            files.iter().map(|f| f.path.as_str()).collect::<Vec<_>>()
        );

        let handle = self.manager.connect(&self.sandbox_id).await?;
        for file in files {
            handle
                .write(&file.path, &file.content)
                .await
                .map_err(|source| {
                    error!("Failed to write {}: {}", file.path, source);
                    ToolError::Write {
                        path: file.path.clone(),
                        source,
                    }
                })?;
            state.record_file(&file.path, &file.content);
            debug!("Wrote {} ({} bytes)", file.path, file.content.len());
        }

        Ok(format!("Successfully created/updated {} files", files.len()))
    }

    async fn read_files(&self, paths: &[String]) -> String {
        info!("Reading files: {:?}", paths);

        match self.try_read_files(paths).await {
            Ok(contents) => contents,
            Err(e) => {
                warn!("readFiles failed: {}", e);
                format!("Error: {}", e)
            }
        }
    }

    async fn try_read_files(&self, paths: &[String]) -> Result<String, ToolError> {
        let handle = self.manager.connect(&self.sandbox_id).await?;
        let mut contents = Vec::with_capacity(paths.len());
        for path in paths {
            let content = handle.read(path).await.map_err(ToolError::Read)?;
            contents.push(FileInput {
                path: path.clone(),
                content,
            });
        }
        Ok(serde_json::to_string(&contents)?)
    }
}
