// ABOUTME: Sandbox lifecycle policy: reuse a live project sandbox or create a new one
// ABOUTME: Probes candidates with a keep-alive command and computes expiry from the TTL

use crate::providers::{ProviderError, SandboxHandle, SandboxProvider};
use chrono::{DateTime, Utc};
use kiln_storage::{FragmentStorage, StorageError};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

const KEEP_ALIVE_COMMAND: &str = "echo 'keeping sandbox alive'";

#[derive(Error, Debug)]
pub enum ManagerError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Failed to create sandbox: {0}")]
    Create(#[source] ProviderError),

    #[error("Sandbox {sandbox_id} is not reachable: {source}")]
    NotReachable {
        sandbox_id: String,
        #[source]
        source: ProviderError,
    },
}

pub type Result<T> = std::result::Result<T, ManagerError>;

#[derive(Debug, Clone)]
pub struct SandboxManagerConfig {
    /// Template new sandboxes are created from
    pub template: String,
    /// Lifetime requested for new sandboxes; also the persisted expiry offset
    pub ttl: Duration,
}

/// Outcome of resolving the sandbox for a run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SandboxResolution {
    Reused {
        sandbox_id: String,
    },
    Created {
        sandbox_id: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
}

impl SandboxResolution {
    pub fn sandbox_id(&self) -> &str {
        match self {
            Self::Reused { sandbox_id } | Self::Created { sandbox_id, .. } => sandbox_id,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Self::Created { .. })
    }
}

pub struct SandboxManager {
    provider: Arc<dyn SandboxProvider>,
    fragments: Arc<FragmentStorage>,
    config: SandboxManagerConfig,
}

impl SandboxManager {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        fragments: Arc<FragmentStorage>,
        config: SandboxManagerConfig,
    ) -> Self {
        Self {
            provider,
            fragments,
            config,
        }
    }

    pub fn config(&self) -> &SandboxManagerConfig {
        &self.config
    }

    /// Reuse the project's newest unexpired sandbox if it answers, otherwise create one.
    ///
    /// A failed probe only means the candidate is skipped; a failed creation is fatal.
    pub async fn resolve(&self, project_id: &str) -> Result<SandboxResolution> {
        let candidate = self
            .fragments
            .latest_active_for_project(project_id, Utc::now())
            .await?;

        if let Some(sandbox_id) = candidate.and_then(|fragment| fragment.sandbox_id) {
            debug!("Probing sandbox {} for project {}", sandbox_id, project_id);
            match self.connect(&sandbox_id).await {
                Ok(_) => {
                    info!("Reusing sandbox {} for project {}", sandbox_id, project_id);
                    return Ok(SandboxResolution::Reused { sandbox_id });
                }
                Err(e) => {
                    warn!("Existing sandbox unusable, creating a new one: {}", e);
                }
            }
        }

        self.create().await
    }

    /// Open a live connection and nudge the sandbox with a keep-alive command
    pub async fn connect(&self, sandbox_id: &str) -> Result<Box<dyn SandboxHandle>> {
        let handle = self
            .provider
            .connect(sandbox_id)
            .await
            .map_err(|source| ManagerError::NotReachable {
                sandbox_id: sandbox_id.to_string(),
                source,
            })?;

        if let Err(e) = handle.exec(KEEP_ALIVE_COMMAND).await {
            warn!("Keep-alive failed for sandbox {}: {}", sandbox_id, e);
        }

        Ok(handle)
    }

    pub async fn create(&self) -> Result<SandboxResolution> {
        let created_at = Utc::now();
        let sandbox_id = self
            .provider
            .create(&self.config.template, self.config.ttl)
            .await
            .map_err(ManagerError::Create)?;
        let expires_at = self.compute_expiry(created_at);

        info!(
            "Created {} sandbox {} (expires {})",
            self.provider.name(),
            sandbox_id,
            expires_at
        );

        Ok(SandboxResolution::Created {
            sandbox_id,
            created_at,
            expires_at,
        })
    }

    pub fn compute_expiry(&self, created_at: DateTime<Utc>) -> DateTime<Utc> {
        let ttl = chrono::Duration::from_std(self.config.ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        created_at + ttl
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::CommandResult;
    use crate::testing::StubProvider;
    use kiln_storage::{FileMap, MessageStorage, MessageType, NewFragment, NewMessage, ProjectStorage};

    struct Fixture {
        provider: StubProvider,
        manager: SandboxManager,
        messages: MessageStorage,
        project_id: String,
    }

    async fn setup() -> Fixture {
        let pool = kiln_storage::connect("sqlite::memory:").await.unwrap();
        let project = ProjectStorage::new(pool.clone())
            .create_project("demo")
            .await
            .unwrap();
        let provider = StubProvider::new();
        let manager = SandboxManager::new(
            Arc::new(provider.clone()),
            Arc::new(FragmentStorage::new(pool.clone())),
            SandboxManagerConfig {
                template: "nextjs".to_string(),
                ttl: Duration::from_secs(3600),
            },
        );
        Fixture {
            provider,
            manager,
            messages: MessageStorage::new(pool),
            project_id: project.id,
        }
    }

    async fn record_sandbox(fixture: &Fixture, sandbox_id: &str, expires_at: DateTime<Utc>) {
        fixture
            .messages
            .create_message_with_fragment(
                NewMessage::assistant(&fixture.project_id, MessageType::Result, "done"),
                NewFragment {
                    sandbox_id: sandbox_id.to_string(),
                    sandbox_url: format!("https://3000-{}.stub.local", sandbox_id),
                    title: "Fragment".to_string(),
                    files: FileMap::new(),
                    sandbox_created_at: None,
                    sandbox_expires_at: Some(expires_at),
                },
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_resolve_reuses_reachable_sandbox() {
        let fixture = setup().await;
        fixture.provider.add_sandbox("sbx-live");
        record_sandbox(&fixture, "sbx-live", Utc::now() + chrono::Duration::minutes(30)).await;

        let resolution = fixture.manager.resolve(&fixture.project_id).await.unwrap();

        assert_eq!(
            resolution,
            SandboxResolution::Reused {
                sandbox_id: "sbx-live".to_string()
            }
        );
        assert!(!resolution.is_new());
        assert!(fixture.provider.created().is_empty());
    }

    #[tokio::test]
    async fn test_resolve_creates_when_probe_fails() {
        let fixture = setup().await;
        record_sandbox(&fixture, "sbx-gone", Utc::now() + chrono::Duration::minutes(30)).await;

        let resolution = fixture.manager.resolve(&fixture.project_id).await.unwrap();

        assert!(resolution.is_new());
        assert_ne!(resolution.sandbox_id(), "sbx-gone");
        assert_eq!(fixture.provider.connects(), vec!["sbx-gone".to_string()]);
        assert_eq!(fixture.provider.created(), vec![resolution.sandbox_id().to_string()]);
    }

    #[tokio::test]
    async fn test_resolve_ignores_expired_sandbox() {
        let fixture = setup().await;
        fixture.provider.add_sandbox("sbx-old");
        record_sandbox(&fixture, "sbx-old", Utc::now() - chrono::Duration::minutes(1)).await;

        let resolution = fixture.manager.resolve(&fixture.project_id).await.unwrap();

        assert!(resolution.is_new());
        assert!(fixture.provider.connects().is_empty());
    }

    #[tokio::test]
    async fn test_created_sandbox_expires_after_ttl() {
        let fixture = setup().await;

        let resolution = fixture.manager.resolve(&fixture.project_id).await.unwrap();

        match resolution {
            SandboxResolution::Created {
                created_at,
                expires_at,
                ..
            } => assert_eq!(expires_at - created_at, chrono::Duration::hours(1)),
            other => panic!("expected a new sandbox, got {:?}", other),
        }
        assert_eq!(
            fixture.provider.created_timeouts(),
            vec![Duration::from_secs(3600)]
        );
    }

    #[tokio::test]
    async fn test_creation_failure_is_fatal() {
        let fixture = setup().await;
        fixture.provider.fail_create(true);

        let err = fixture.manager.resolve(&fixture.project_id).await.unwrap_err();
        assert!(matches!(err, ManagerError::Create(_)));
    }

    #[tokio::test]
    async fn test_connect_tolerates_failed_keep_alive() {
        let fixture = setup().await;
        fixture.provider.add_sandbox("sbx-1");
        fixture.provider.respond(
            "keeping sandbox alive",
            CommandResult {
                exit_code: 1,
                stdout: String::new(),
                stderr: "busy".to_string(),
            },
        );

        let handle = fixture.manager.connect("sbx-1").await.unwrap();
        assert_eq!(handle.sandbox_id(), "sbx-1");
        assert_eq!(
            fixture.provider.commands(),
            vec![("sbx-1".to_string(), KEEP_ALIVE_COMMAND.to_string())]
        );
    }

    #[tokio::test]
    async fn test_connect_unknown_sandbox_is_not_reachable() {
        let fixture = setup().await;
        let err = fixture.manager.connect("sbx-missing").await.err().unwrap();
        assert!(matches!(err, ManagerError::NotReachable { .. }));
    }
}
