// ABOUTME: Detects the task summary marker in an agent turn's output
// ABOUTME: Records the final assistant text as the run summary when the marker is present

use crate::providers::{ChatMessage, Role};
use crate::state::RunState;
use tracing::info;

pub const TASK_SUMMARY_MARKER: &str = "<task_summary>";

/// Text of the last assistant message in a turn's output
pub fn last_assistant_text(output: &[ChatMessage]) -> Option<&str> {
    output
        .iter()
        .rev()
        .find(|message| message.role == Role::Assistant)
        .and_then(|message| message.content.as_deref())
}

/// Returns true when this turn reported a summary
pub fn detect_completion(state: &mut RunState, output: &[ChatMessage]) -> bool {
    match last_assistant_text(output) {
        Some(text) if text.contains(TASK_SUMMARY_MARKER) => {
            info!("Task summary detected");
            state.summary = Some(text.to_string());
            true
        }
        _ => false,
    }
}
