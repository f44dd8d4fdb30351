// ABOUTME: Code agent for Kiln: a bounded tool-using loop that builds apps inside a sandbox
// ABOUTME: Exposes the run orchestration plus its router, tools, completion check and model providers

pub mod completion;
pub mod prompt;
pub mod providers;
pub mod router;
pub mod run;
pub mod state;
pub mod tools;

pub use completion::{detect_completion, TASK_SUMMARY_MARKER};
pub use providers::{
    AgentProvider, AgentProviderError, ChatMessage, OpenAIProvider, Role, ToolCallRequest,
    ToolDefinition, TurnRequest,
};
pub use router::{DoneReason, Router, RouterConfig, RouterDecision};
pub use run::{CodeAgentRun, RunConfig, RunError, RunOutput, RunRequest, ERROR_MESSAGE, FRAGMENT_TITLE};
pub use state::RunState;
pub use tools::{ToolBridge, ToolCall, ToolError};
