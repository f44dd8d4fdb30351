// ABOUTME: In-memory sandbox provider for tests
// ABOUTME: Records commands and files per sandbox and lets tests script failures

use crate::providers::{
    CommandResult, OutputChunk, ProviderError, Result, SandboxHandle, SandboxProvider, StreamType,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::mpsc;

#[derive(Default)]
struct StubState {
    next_id: usize,
    reachable: HashSet<String>,
    created: Vec<(String, Duration)>,
    connects: Vec<String>,
    commands: Vec<(String, String)>,
    files: HashMap<String, BTreeMap<String, String>>,
    responses: Vec<(String, CommandResult)>,
    fail_create: bool,
    fail_writes_after: Option<usize>,
    writes: usize,
    fail_reads: bool,
}

/// Sandbox provider backed by in-process maps
#[derive(Clone, Default)]
pub struct StubProvider {
    state: Arc<Mutex<StubState>>,
}

impl StubProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StubState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Register a sandbox that already exists and accepts connections
    pub fn add_sandbox(&self, sandbox_id: &str) {
        self.state().reachable.insert(sandbox_id.to_string());
    }

    pub fn set_unreachable(&self, sandbox_id: &str) {
        self.state().reachable.remove(sandbox_id);
    }

    pub fn fail_create(&self, fail: bool) {
        self.state().fail_create = fail;
    }

    /// Let `count` writes succeed, then fail every later one
    pub fn fail_writes_after(&self, count: usize) {
        self.state().fail_writes_after = Some(count);
    }

    pub fn fail_reads(&self, fail: bool) {
        self.state().fail_reads = fail;
    }

    /// Answer any command containing `pattern` with `result`
    pub fn respond(&self, pattern: &str, result: CommandResult) {
        self.state().responses.push((pattern.to_string(), result));
    }

    /// Ids of sandboxes created through this provider, oldest first
    pub fn created(&self) -> Vec<String> {
        (1..=self.state().created.len())
            .map(|n| format!("stub-sbx-{}", n))
            .collect()
    }

    pub fn created_timeouts(&self) -> Vec<Duration> {
        self.state().created.iter().map(|(_, t)| *t).collect()
    }

    pub fn connects(&self) -> Vec<String> {
        self.state().connects.clone()
    }

    /// Every command run, as `(sandbox_id, command)`
    pub fn commands(&self) -> Vec<(String, String)> {
        self.state().commands.clone()
    }

    pub fn file(&self, sandbox_id: &str, path: &str) -> Option<String> {
        self.state()
            .files
            .get(sandbox_id)
            .and_then(|files| files.get(path))
            .cloned()
    }

    pub fn put_file(&self, sandbox_id: &str, path: &str, content: &str) {
        self.state()
            .files
            .entry(sandbox_id.to_string())
            .or_default()
            .insert(path.to_string(), content.to_string());
    }
}

#[async_trait]
impl SandboxProvider for StubProvider {
    fn name(&self) -> &str {
        "stub"
    }

    async fn create(&self, template: &str, timeout: Duration) -> Result<String> {
        let mut state = self.state();
        if state.fail_create {
            return Err(ProviderError::Api {
                status: 500,
                message: "sandbox quota exceeded".to_string(),
            });
        }

        state.next_id += 1;
        let id = format!("stub-sbx-{}", state.next_id);
        state.created.push((template.to_string(), timeout));
        state.reachable.insert(id.clone());
        Ok(id)
    }

    async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>> {
        let mut state = self.state();
        state.connects.push(sandbox_id.to_string());
        if !state.reachable.contains(sandbox_id) {
            return Err(ProviderError::NotReachable(sandbox_id.to_string()));
        }

        Ok(Box::new(StubHandle {
            sandbox_id: sandbox_id.to_string(),
            provider: self.clone(),
        }))
    }
}

struct StubHandle {
    sandbox_id: String,
    provider: StubProvider,
}

#[async_trait]
impl SandboxHandle for StubHandle {
    fn sandbox_id(&self) -> &str {
        &self.sandbox_id
    }

    async fn run(
        &self,
        command: &str,
        output: mpsc::UnboundedSender<OutputChunk>,
    ) -> Result<CommandResult> {
        let result = {
            let mut state = self.provider.state();
            state
                .commands
                .push((self.sandbox_id.clone(), command.to_string()));
            if !state.reachable.contains(&self.sandbox_id) {
                return Err(ProviderError::NotReachable(self.sandbox_id.clone()));
            }
            state
                .responses
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, result)| result.clone())
                .unwrap_or_default()
        };

        if !result.stdout.is_empty() {
            let _ = output.send(OutputChunk {
                stream: StreamType::Stdout,
                data: result.stdout.clone(),
            });
        }
        if !result.stderr.is_empty() {
            let _ = output.send(OutputChunk {
                stream: StreamType::Stderr,
                data: result.stderr.clone(),
            });
        }

        Ok(result)
    }

    async fn write(&self, path: &str, content: &str) -> Result<()> {
        let mut state = self.provider.state();
        if let Some(limit) = state.fail_writes_after {
            if state.writes >= limit {
                return Err(ProviderError::Api {
                    status: 507,
                    message: format!("no space left writing {}", path),
                });
            }
        }
        state.writes += 1;
        state
            .files
            .entry(self.sandbox_id.clone())
            .or_default()
            .insert(path.to_string(), content.to_string());
        Ok(())
    }

    async fn read(&self, path: &str) -> Result<String> {
        let state = self.provider.state();
        if state.fail_reads {
            return Err(ProviderError::NotReachable(self.sandbox_id.clone()));
        }
        state
            .files
            .get(&self.sandbox_id)
            .and_then(|files| files.get(path))
            .cloned()
            .ok_or_else(|| ProviderError::FileNotFound(path.to_string()))
    }

    fn host_for(&self, port: u16) -> String {
        format!("{}-{}.stub.local", port, self.sandbox_id)
    }
}
