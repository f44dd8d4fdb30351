// ABOUTME: Provider traits for ephemeral, network-reachable sandboxes
// ABOUTME: Defines sandbox creation/connection and the per-sandbox command and file interface

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;

pub mod e2b;

pub use e2b::E2BProvider;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Sandbox not reachable: {0}")]
    NotReachable(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Command exited with status {exit_code}: {stderr}")]
    CommandExited {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    Stdout,
    Stderr,
}

/// A piece of command output, delivered as soon as the sandbox produces it
#[derive(Debug, Clone)]
pub struct OutputChunk {
    pub stream: StreamType,
    pub data: String,
}

/// Output of a command that ran to completion
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandResult {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Backend that creates sandboxes and reconnects to existing ones
#[async_trait]
pub trait SandboxProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Create a sandbox from a template, alive for `timeout`. Returns the sandbox id.
    async fn create(&self, template: &str, timeout: Duration) -> Result<String>;

    /// Open a live connection to an existing sandbox
    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>>;
}

/// Live connection to one sandbox
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn sandbox_id(&self) -> &str;

    /// Run a shell command, forwarding output chunks to `output` while it runs.
    ///
    /// A command that runs but exits non-zero is `Ok` with its exit code; errors
    /// are reserved for transport and protocol failures.
    async fn run(
        &self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<CommandResult>;

    async fn write(&self, path: &str, content: &str) -> Result<()>;

    async fn read(&self, path: &str) -> Result<String>;

    /// Public hostname routed to `port` inside the sandbox
    fn host_for(&self, port: u16) -> String;

    /// Run a command without streaming, treating a non-zero exit as an error
    async fn exec(&self, command: &str) -> Result<CommandResult> {
        let (tx, _rx) = mpsc::unbounded_channel();
        let result = self.run(command, tx).await?;
        if !result.success() {
            return Err(ProviderError::CommandExited {
                exit_code: result.exit_code,
                stdout: result.stdout,
                stderr: result.stderr,
            });
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_success() {
        let ok = CommandResult::default();
        assert!(ok.success());

        let failed = CommandResult {
            exit_code: 127,
            stdout: String::new(),
            stderr: "command not found".to_string(),
        };
        assert!(!failed.success());
    }

    #[test]
    fn test_command_exited_error_mentions_status() {
        let err = ProviderError::CommandExited {
            exit_code: 2,
            stdout: String::new(),
            stderr: "boom".to_string(),
        };
        assert_eq!(err.to_string(), "Command exited with status 2: boom");
    }
}
