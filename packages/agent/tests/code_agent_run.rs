// ABOUTME: End-to-end tests for the code agent run with scripted model turns
// ABOUTME: Uses in-memory SQLite and the stub sandbox provider to check persisted outcomes

use async_trait::async_trait;
use kiln_agent::providers::AgentProviderResult;
use kiln_agent::{
    AgentProvider, ChatMessage, CodeAgentRun, RouterConfig, RunConfig, RunError, RunRequest,
    ToolError, TurnRequest, ERROR_MESSAGE,
};
use kiln_sandbox::testing::StubProvider;
use kiln_sandbox::{ManagerError, SandboxManager, SandboxManagerConfig};
use kiln_storage::{
    FragmentStorage, MessageRole, MessageStorage, MessageType, ProjectStorage, SqlitePool,
    DEFAULT_PROJECT_NAME,
};
use pretty_assertions::assert_eq;
use serde_json::json;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

type Hook = Box<dyn FnOnce() + Send>;

/// Replays canned assistant messages, then keeps answering without a summary
struct ScriptedAgent {
    replies: Mutex<VecDeque<ChatMessage>>,
    transcripts: Mutex<Vec<usize>>,
    /// Runs once when the given call number is answered
    hook: Mutex<Option<(usize, Hook)>>,
}

impl ScriptedAgent {
    fn new(replies: Vec<ChatMessage>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            transcripts: Mutex::new(Vec::new()),
            hook: Mutex::new(None),
        })
    }

    fn with_hook(replies: Vec<ChatMessage>, call: usize, hook: Hook) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            transcripts: Mutex::new(Vec::new()),
            hook: Mutex::new(Some((call, hook))),
        })
    }

    fn calls(&self) -> usize {
        self.transcripts.lock().unwrap().len()
    }
}

#[async_trait]
impl AgentProvider for ScriptedAgent {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: TurnRequest<'_>) -> AgentProviderResult<ChatMessage> {
        let call = {
            let mut transcripts = self.transcripts.lock().unwrap();
            transcripts.push(request.transcript.len());
            transcripts.len()
        };

        let mut hook = self.hook.lock().unwrap();
        if hook.as_ref().is_some_and(|(at, _)| *at == call) {
            if let Some((_, run)) = hook.take() {
                run();
            }
        }
        drop(hook);

        Ok(self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| ChatMessage::assistant("Still working on it.")))
    }
}

struct Harness {
    pool: SqlitePool,
    provider: StubProvider,
    sandboxes: Arc<SandboxManager>,
}

async fn harness() -> Harness {
    let pool = kiln_storage::connect("sqlite::memory:").await.unwrap();
    let provider = StubProvider::new();
    let sandboxes = Arc::new(SandboxManager::new(
        Arc::new(provider.clone()),
        Arc::new(FragmentStorage::new(pool.clone())),
        SandboxManagerConfig {
            template: "vibe-nextjs".to_string(),
            ttl: Duration::from_secs(3600),
        },
    ));
    Harness {
        pool,
        provider,
        sandboxes,
    }
}

fn run_with(harness: &Harness, agent: Arc<ScriptedAgent>) -> CodeAgentRun {
    CodeAgentRun::new(
        harness.pool.clone(),
        harness.sandboxes.clone(),
        agent,
        RunConfig {
            model: "gpt-5-mini".to_string(),
            preview_port: 3000,
            router: RouterConfig::default(),
        },
    )
}

fn request(value: &str, project_id: Option<&str>) -> RunRequest {
    RunRequest {
        value: value.to_string(),
        project_id: project_id.map(str::to_string),
    }
}

fn todo_app_script() -> Vec<ChatMessage> {
    vec![
        ChatMessage::assistant("Installing dependencies.").with_tool_call(
            "call-1",
            "terminal",
            json!({"command": "npm install date-fns --yes"}),
        ),
        ChatMessage::assistant("Writing the page.").with_tool_call(
            "call-2",
            "createOrUpdateFiles",
            json!({"files": [{"path": "app/page.tsx", "content": "export default function Page() { return <main>Todos</main>; }"}]}),
        ),
        ChatMessage::assistant("<task_summary>\nBuilt a todo app.\n</task_summary>"),
    ]
}

#[tokio::test]
async fn test_successful_run_saves_result_with_fragment() {
    let harness = harness().await;
    let agent = ScriptedAgent::new(todo_app_script());

    let output = run_with(&harness, agent.clone())
        .execute(request("build a todo app", None))
        .await
        .unwrap();

    assert!(output.success);
    assert_eq!(agent.calls(), 3);
    assert_eq!(output.title, "Fragment");
    assert_eq!(output.url, "https://3000-stub-sbx-1.stub.local");
    assert!(output.summary.as_deref().unwrap().contains("<task_summary>"));
    assert_eq!(output.files.len(), 1);

    let project = ProjectStorage::new(harness.pool.clone())
        .get_project(&output.project_id)
        .await
        .unwrap();
    assert_eq!(project.name, DEFAULT_PROJECT_NAME);

    let messages = MessageStorage::new(harness.pool.clone())
        .list_messages(&output.project_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.role, MessageRole::Assistant);
    assert_eq!(messages[0].message.message_type, MessageType::Result);

    let fragment = messages[0].fragment.as_ref().expect("fragment saved");
    assert_eq!(fragment.files, output.files);
    assert_eq!(fragment.sandbox_id.as_deref(), Some("stub-sbx-1"));
    assert!(fragment.sandbox_url.starts_with("https://"));
    let created = fragment.sandbox_created_at.expect("new sandbox records creation");
    let expires = fragment.sandbox_expires_at.expect("new sandbox records expiry");
    assert_eq!(
        (expires - created).num_seconds(),
        3600,
        "expiry is creation plus the sandbox TTL"
    );

    assert!(harness.provider.file("stub-sbx-1", "app/page.tsx").is_some());
}

#[tokio::test]
async fn test_run_without_summary_saves_error_message() {
    let harness = harness().await;
    let agent = ScriptedAgent::new(Vec::new());

    let output = run_with(&harness, agent.clone())
        .execute(request("build a todo app", None))
        .await
        .unwrap();

    assert!(!output.success);
    assert_eq!(agent.calls(), 14, "the fifteenth router call stops the run");

    let messages = MessageStorage::new(harness.pool.clone())
        .list_messages(&output.project_id)
        .await
        .unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].message.message_type, MessageType::Error);
    assert_eq!(messages[0].message.content, ERROR_MESSAGE);
    assert!(messages[0].fragment.is_none());
}

#[tokio::test]
async fn test_files_without_summary_stop_at_soft_limit_as_failure() {
    let harness = harness().await;
    let agent = ScriptedAgent::new(vec![ChatMessage::assistant("Writing.").with_tool_call(
        "call-1",
        "createOrUpdateFiles",
        json!({"files": [{"path": "app/page.tsx", "content": "export default 1"}]}),
    )]);

    let output = run_with(&harness, agent.clone())
        .execute(request("build a todo app", None))
        .await
        .unwrap();

    assert!(!output.success);
    assert_eq!(agent.calls(), 11);
    assert_eq!(output.files.len(), 1);
}

#[tokio::test]
async fn test_second_run_reuses_project_sandbox() {
    let harness = harness().await;
    let project = ProjectStorage::new(harness.pool.clone())
        .create_project("todo")
        .await
        .unwrap();

    run_with(&harness, ScriptedAgent::new(todo_app_script()))
        .execute(request("build a todo app", Some(&project.id)))
        .await
        .unwrap();
    let second = run_with(&harness, ScriptedAgent::new(todo_app_script()))
        .execute(request("add dark mode", Some(&project.id)))
        .await
        .unwrap();

    assert_eq!(second.project_id, project.id);
    assert_eq!(harness.provider.created(), vec!["stub-sbx-1".to_string()]);

    let messages = MessageStorage::new(harness.pool.clone())
        .list_messages(&project.id)
        .await
        .unwrap();
    let reused = messages[1].fragment.as_ref().unwrap();
    assert_eq!(reused.sandbox_id.as_deref(), Some("stub-sbx-1"));
    assert!(reused.sandbox_created_at.is_none());
    assert!(reused.sandbox_expires_at.is_none());
}

#[tokio::test]
async fn test_malformed_tool_call_is_reported_to_agent() {
    let harness = harness().await;
    let mut script = vec![ChatMessage::assistant("Oops.").with_tool_call(
        "call-0",
        "readFiles",
        json!({"files": "app/page.tsx"}),
    )];
    script.extend(todo_app_script());
    let agent = ScriptedAgent::new(script);

    let output = run_with(&harness, agent.clone())
        .execute(request("build a todo app", None))
        .await
        .unwrap();

    assert!(output.success);
    assert_eq!(agent.calls(), 4);
}

#[tokio::test]
async fn test_write_failure_aborts_run_without_saving() {
    let harness = harness().await;
    harness.provider.fail_writes_after(0);

    let err = run_with(&harness, ScriptedAgent::new(todo_app_script()))
        .execute(request("build a todo app", None))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Tool(ToolError::Write { .. })));

    let project = ProjectStorage::new(harness.pool.clone())
        .resolve_project(None)
        .await
        .unwrap();
    let messages = MessageStorage::new(harness.pool.clone())
        .list_messages(&project.id)
        .await
        .unwrap();
    assert!(messages.is_empty());
}

#[tokio::test]
async fn test_sandbox_creation_failure_is_fatal() {
    let harness = harness().await;
    harness.provider.fail_create(true);

    let err = run_with(&harness, ScriptedAgent::new(todo_app_script()))
        .execute(request("build a todo app", None))
        .await
        .unwrap_err();

    assert!(matches!(err, RunError::Sandbox(_)));
}

#[tokio::test]
async fn test_preview_url_failure_is_fatal_and_saves_nothing() {
    let harness = harness().await;
    let provider = harness.provider.clone();
    let agent = ScriptedAgent::with_hook(
        todo_app_script(),
        3,
        Box::new(move || provider.set_unreachable("stub-sbx-1")),
    );

    let err = run_with(&harness, agent.clone())
        .execute(request("build a todo app", None))
        .await
        .unwrap_err();

    assert_eq!(agent.calls(), 3);
    assert!(matches!(
        err,
        RunError::Sandbox(ManagerError::NotReachable { ref sandbox_id, .. }) if sandbox_id == "stub-sbx-1"
    ));

    let project = ProjectStorage::new(harness.pool.clone())
        .resolve_project(None)
        .await
        .unwrap();
    let messages = MessageStorage::new(harness.pool.clone())
        .list_messages(&project.id)
        .await
        .unwrap();
    assert!(messages.is_empty());
}
