// ABOUTME: Message storage for a project's conversation
// ABOUTME: Creates user/assistant messages and atomically attaches result fragments

use chrono::Utc;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::fragments::{row_to_fragment, FRAGMENT_COLUMNS};
use crate::types::{
    Fragment, Message, MessageRole, MessageType, MessageWithFragment, NewFragment, NewMessage,
};
use crate::{format_timestamp, parse_timestamp, Result, StorageError};

pub struct MessageStorage {
    pool: SqlitePool,
}

impl MessageStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_message(&self, input: NewMessage) -> Result<Message> {
        let mut tx = self.pool.begin().await?;
        let message = insert_message(&mut tx, input).await?;
        tx.commit().await?;
        Ok(message)
    }

    /// Create a message and its fragment in one transaction
    pub async fn create_message_with_fragment(
        &self,
        input: NewMessage,
        fragment: NewFragment,
    ) -> Result<(Message, Fragment)> {
        if fragment.sandbox_id.trim().is_empty() {
            return Err(StorageError::InvalidInput(
                "Fragment sandbox id is required".to_string(),
            ));
        }

        let mut tx = self.pool.begin().await?;
        let message = insert_message(&mut tx, input).await?;

        let now = Utc::now();
        let fragment = Fragment {
            id: format!("frag-{}", nanoid::nanoid!()),
            message_id: message.id.clone(),
            sandbox_id: Some(fragment.sandbox_id),
            sandbox_url: fragment.sandbox_url,
            title: fragment.title,
            files: fragment.files,
            sandbox_created_at: fragment.sandbox_created_at,
            sandbox_expires_at: fragment.sandbox_expires_at,
            created_at: now,
            updated_at: now,
        };

        debug!(
            "Creating fragment {} for message {} ({} files)",
            fragment.id,
            message.id,
            fragment.files.len()
        );

        sqlx::query(
            r#"
            INSERT INTO fragments (
                id, message_id, sandbox_id, sandbox_url, title, files,
                sandbox_created_at, sandbox_expires_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
            "#,
        )
        .bind(&fragment.id)
        .bind(&fragment.message_id)
        .bind(&fragment.sandbox_id)
        .bind(&fragment.sandbox_url)
        .bind(&fragment.title)
        .bind(serde_json::to_string(&fragment.files)?)
        .bind(fragment.sandbox_created_at.as_ref().map(format_timestamp))
        .bind(fragment.sandbox_expires_at.as_ref().map(format_timestamp))
        .bind(format_timestamp(&fragment.created_at))
        .bind(format_timestamp(&fragment.updated_at))
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok((message, fragment))
    }

    /// Messages of a project in conversation order, each with its fragment
    pub async fn list_messages(&self, project_id: &str) -> Result<Vec<MessageWithFragment>> {
        let rows = sqlx::query(
            r#"
            SELECT id, project_id, role, message_type, content, created_at, updated_at
            FROM messages
            WHERE project_id = ?1
            ORDER BY created_at ASC, rowid ASC
            "#,
        )
        .bind(project_id)
        .fetch_all(&self.pool)
        .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in rows {
            let message = row_to_message(&row)?;
            let fragment_row = sqlx::query(&format!(
                "SELECT {} FROM fragments WHERE message_id = ?1",
                FRAGMENT_COLUMNS
            ))
            .bind(&message.id)
            .fetch_optional(&self.pool)
            .await?;

            let fragment = fragment_row.map(|r| row_to_fragment(&r)).transpose()?;
            messages.push(MessageWithFragment { message, fragment });
        }

        Ok(messages)
    }
}

pub(crate) async fn insert_message(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    input: NewMessage,
) -> Result<Message> {
    if input.content.trim().is_empty() {
        return Err(StorageError::InvalidInput(
            "Message content is required".to_string(),
        ));
    }

    let now = Utc::now();
    let message = Message {
        id: format!("msg-{}", nanoid::nanoid!()),
        project_id: input.project_id,
        role: input.role,
        message_type: input.message_type,
        content: input.content,
        created_at: now,
        updated_at: now,
    };

    debug!(
        "Creating {} {} message {} in project {}",
        message.role.as_str(),
        message.message_type.as_str(),
        message.id,
        message.project_id
    );

    sqlx::query(
        r#"
        INSERT INTO messages (id, project_id, role, message_type, content, created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        "#,
    )
    .bind(&message.id)
    .bind(&message.project_id)
    .bind(message.role.as_str())
    .bind(message.message_type.as_str())
    .bind(&message.content)
    .bind(format_timestamp(&message.created_at))
    .bind(format_timestamp(&message.updated_at))
    .execute(&mut **tx)
    .await?;

    let touched = sqlx::query("UPDATE projects SET updated_at = ?1 WHERE id = ?2")
        .bind(format_timestamp(&now))
        .bind(&message.project_id)
        .execute(&mut **tx)
        .await?;

    if touched.rows_affected() == 0 {
        return Err(StorageError::NotFound(format!(
            "Project {}",
            message.project_id
        )));
    }

    Ok(message)
}

fn row_to_message(row: &sqlx::sqlite::SqliteRow) -> Result<Message> {
    Ok(Message {
        id: row.get("id"),
        project_id: row.get("project_id"),
        role: MessageRole::from_str(&row.get::<String, _>("role"))?,
        message_type: MessageType::from_str(&row.get::<String, _>("message_type"))?,
        content: row.get("content"),
        created_at: parse_timestamp("created_at", &row.get::<String, _>("created_at"))?,
        updated_at: parse_timestamp("updated_at", &row.get::<String, _>("updated_at"))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{connect, ProjectStorage};
    use chrono::Duration;

    async fn setup() -> (MessageStorage, String) {
        let pool = connect("sqlite::memory:").await.unwrap();
        let project = ProjectStorage::new(pool.clone())
            .create_project("demo")
            .await
            .unwrap();
        (MessageStorage::new(pool), project.id)
    }

    #[tokio::test]
    async fn test_messages_listed_in_order_with_fragments() {
        let (storage, project_id) = setup().await;

        storage
            .create_message(NewMessage::user(&project_id, "build a todo app"))
            .await
            .unwrap();

        let mut files = crate::FileMap::new();
        files.insert("app/page.tsx".to_string(), "export default 1".to_string());
        let expires = Utc::now() + Duration::hours(1);
        storage
            .create_message_with_fragment(
                NewMessage::assistant(
                    &project_id,
                    MessageType::Result,
                    "<task_summary>done</task_summary>",
                ),
                NewFragment {
                    sandbox_id: "sbx-1".to_string(),
                    sandbox_url: "https://3000-sbx-1.e2b.app".to_string(),
                    title: "Fragment".to_string(),
                    files: files.clone(),
                    sandbox_created_at: Some(Utc::now()),
                    sandbox_expires_at: Some(expires),
                },
            )
            .await
            .unwrap();

        let messages = storage.list_messages(&project_id).await.unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].message.role, MessageRole::User);
        assert!(messages[0].fragment.is_none());

        let fragment = messages[1].fragment.as_ref().expect("fragment attached");
        assert_eq!(fragment.files, files);
        assert_eq!(fragment.sandbox_id.as_deref(), Some("sbx-1"));
        assert_eq!(
            fragment.sandbox_expires_at.map(|t| t.timestamp_millis()),
            Some(expires.timestamp_millis())
        );
    }

    #[tokio::test]
    async fn test_message_for_unknown_project_is_rejected() {
        let (storage, _) = setup().await;
        let err = storage
            .create_message(NewMessage::user("prj-missing", "hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_) | StorageError::Sqlx(_)));
    }

    #[tokio::test]
    async fn test_empty_content_is_rejected() {
        let (storage, project_id) = setup().await;
        let err = storage
            .create_message(NewMessage::user(&project_id, "  "))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidInput(_)));
    }
}
