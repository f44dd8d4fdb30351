// ABOUTME: Fragment storage including the sandbox lifecycle columns
// ABOUTME: Supplies reuse candidates and maintenance batches, and forces sandbox expiry

use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::types::Fragment;
use crate::{format_timestamp, parse_optional_timestamp, parse_timestamp, Result, StorageError};

pub(crate) const FRAGMENT_COLUMNS: &str = "id, message_id, sandbox_id, sandbox_url, title, files, \
     sandbox_created_at, sandbox_expires_at, created_at, updated_at";

pub struct FragmentStorage {
    pool: SqlitePool,
}

impl FragmentStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_fragment(&self, id: &str) -> Result<Fragment> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM fragments WHERE id = ?1",
            FRAGMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_fragment(&row),
            None => Err(StorageError::NotFound(format!("Fragment {}", id))),
        }
    }

    /// Most recently created fragment of the project whose sandbox has not expired at `now`
    pub async fn latest_active_for_project(
        &self,
        project_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Fragment>> {
        let row = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM fragments
            WHERE sandbox_id IS NOT NULL
              AND sandbox_expires_at > ?2
              AND message_id IN (SELECT id FROM messages WHERE project_id = ?1)
            ORDER BY created_at DESC, rowid DESC
            LIMIT 1
            "#,
            FRAGMENT_COLUMNS
        ))
        .bind(project_id)
        .bind(format_timestamp(&now))
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| row_to_fragment(&row)).transpose()
    }

    /// Newest fragments across all projects whose sandbox has not expired at `now`
    pub async fn list_active(&self, limit: u32, now: DateTime<Utc>) -> Result<Vec<Fragment>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {}
            FROM fragments
            WHERE sandbox_id IS NOT NULL
              AND sandbox_expires_at > ?1
            ORDER BY created_at DESC, rowid DESC
            LIMIT ?2
            "#,
            FRAGMENT_COLUMNS
        ))
        .bind(format_timestamp(&now))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_fragment).collect()
    }

    /// Force the fragment's sandbox to count as expired from `now` on
    pub async fn expire_sandbox(&self, id: &str, now: DateTime<Utc>) -> Result<()> {
        debug!("Marking sandbox of fragment {} expired at {}", id, now);

        let stamp = format_timestamp(&now);
        let result = sqlx::query(
            "UPDATE fragments SET sandbox_expires_at = ?1, updated_at = ?1 WHERE id = ?2",
        )
        .bind(&stamp)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::NotFound(format!("Fragment {}", id)));
        }

        Ok(())
    }
}

pub(crate) fn row_to_fragment(row: &sqlx::sqlite::SqliteRow) -> Result<Fragment> {
    Ok(Fragment {
        id: row.get("id"),
        message_id: row.get("message_id"),
        sandbox_id: row.get("sandbox_id"),
        sandbox_url: row.get("sandbox_url"),
        title: row.get("title"),
        files: serde_json::from_str(&row.get::<String, _>("files"))?,
        sandbox_created_at: parse_optional_timestamp(
            "sandbox_created_at",
            row.get("sandbox_created_at"),
        )?,
        sandbox_expires_at: parse_optional_timestamp(
            "sandbox_expires_at",
            row.get("sandbox_expires_at"),
        )?,
        created_at: parse_timestamp("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp("updated_at", &row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{FileMap, MessageType, NewFragment, NewMessage};
    use crate::{connect, MessageStorage, ProjectStorage};
    use chrono::Duration;

    struct Fixture {
        fragments: FragmentStorage,
        messages: MessageStorage,
        projects: ProjectStorage,
    }

    async fn setup() -> Fixture {
        let pool = connect("sqlite::memory:").await.unwrap();
        Fixture {
            fragments: FragmentStorage::new(pool.clone()),
            messages: MessageStorage::new(pool.clone()),
            projects: ProjectStorage::new(pool),
        }
    }

    async fn add_fragment(
        fixture: &Fixture,
        project_id: &str,
        sandbox_id: &str,
        expires_at: Option<DateTime<Utc>>,
    ) -> Fragment {
        let (_, fragment) = fixture
            .messages
            .create_message_with_fragment(
                NewMessage::assistant(project_id, MessageType::Result, "summary"),
                NewFragment {
                    sandbox_id: sandbox_id.to_string(),
                    sandbox_url: format!("https://3000-{}.e2b.app", sandbox_id),
                    title: "Fragment".to_string(),
                    files: FileMap::new(),
                    sandbox_created_at: None,
                    sandbox_expires_at: expires_at,
                },
            )
            .await
            .unwrap();
        fragment
    }

    #[tokio::test]
    async fn test_latest_active_skips_expired_and_unset() {
        let fixture = setup().await;
        let project = fixture.projects.create_project("a").await.unwrap();
        let now = Utc::now();

        add_fragment(&fixture, &project.id, "live", Some(now + Duration::minutes(30))).await;
        add_fragment(&fixture, &project.id, "old", Some(now - Duration::minutes(1))).await;
        add_fragment(&fixture, &project.id, "reused", None).await;

        let found = fixture
            .fragments
            .latest_active_for_project(&project.id, now)
            .await
            .unwrap()
            .expect("active fragment");
        assert_eq!(found.sandbox_id.as_deref(), Some("live"));
    }

    #[tokio::test]
    async fn test_latest_active_is_scoped_to_project() {
        let fixture = setup().await;
        let a = fixture.projects.create_project("a").await.unwrap();
        let b = fixture.projects.create_project("b").await.unwrap();
        let now = Utc::now();

        add_fragment(&fixture, &a.id, "sbx-a", Some(now + Duration::minutes(30))).await;

        let found = fixture
            .fragments
            .latest_active_for_project(&b.id, now)
            .await
            .unwrap();
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_list_active_respects_limit_and_newest_first() {
        let fixture = setup().await;
        let project = fixture.projects.create_project("a").await.unwrap();
        let now = Utc::now();

        for i in 0..5 {
            add_fragment(
                &fixture,
                &project.id,
                &format!("sbx-{}", i),
                Some(now + Duration::minutes(30)),
            )
            .await;
        }

        let active = fixture.fragments.list_active(3, now).await.unwrap();
        let ids: Vec<_> = active
            .iter()
            .filter_map(|f| f.sandbox_id.clone())
            .collect();
        assert_eq!(ids, vec!["sbx-4", "sbx-3", "sbx-2"]);
    }

    #[tokio::test]
    async fn test_expire_sandbox_removes_it_from_active_set() {
        let fixture = setup().await;
        let project = fixture.projects.create_project("a").await.unwrap();
        let now = Utc::now();
        let fragment =
            add_fragment(&fixture, &project.id, "sbx", Some(now + Duration::minutes(30))).await;

        fixture.fragments.expire_sandbox(&fragment.id, now).await.unwrap();

        let reloaded = fixture.fragments.get_fragment(&fragment.id).await.unwrap();
        assert_eq!(
            reloaded.sandbox_expires_at.map(|t| t.timestamp_millis()),
            Some(now.timestamp_millis())
        );
        assert!(fixture
            .fragments
            .latest_active_for_project(&project.id, now)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_expire_unknown_fragment_is_not_found() {
        let fixture = setup().await;
        let err = fixture
            .fragments
            .expire_sandbox("frag-missing", Utc::now())
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }
}
