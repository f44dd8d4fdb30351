// ABOUTME: Project storage with default-project fallback and slug naming
// ABOUTME: Resolves the project a run belongs to and lists projects by recent activity

use chrono::Utc;
use rand::seq::SliceRandom;
use sqlx::{Row, SqlitePool};
use tracing::{debug, info};

use crate::messages::insert_message;
use crate::types::{NewMessage, Project};
use crate::{format_timestamp, parse_timestamp, Result, StorageError};

/// Project used when a run arrives without a usable project id
pub const DEFAULT_PROJECT_NAME: &str = "Default Project";

const SLUG_ADJECTIVES: &[&str] = &[
    "amber", "brave", "calm", "clever", "crisp", "eager", "fancy", "gentle", "golden", "happy",
    "jolly", "lively", "lucky", "mellow", "nimble", "quiet", "rapid", "shiny", "swift", "witty",
];

const SLUG_NOUNS: &[&str] = &[
    "badger", "canyon", "comet", "falcon", "forest", "garden", "harbor", "island", "lantern",
    "meadow", "otter", "panda", "pebble", "river", "rocket", "summit", "tiger", "valley",
    "willow", "zephyr",
];

/// Two random words joined kebab-style, e.g. `swift-otter`
pub fn generate_slug() -> String {
    let mut rng = rand::thread_rng();
    let adjective = SLUG_ADJECTIVES.choose(&mut rng).copied().unwrap_or("new");
    let noun = SLUG_NOUNS.choose(&mut rng).copied().unwrap_or("project");
    format!("{}-{}", adjective, noun)
}

pub struct ProjectStorage {
    pool: SqlitePool,
}

impl ProjectStorage {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn create_project(&self, name: &str) -> Result<Project> {
        let mut tx = self.pool.begin().await?;
        let project = insert_project(&mut tx, name).await?;
        tx.commit().await?;
        Ok(project)
    }

    /// Create a slug-named project seeded with the user's first message, atomically
    pub async fn create_project_with_message(&self, value: &str) -> Result<Project> {
        let value = value.trim();
        if value.is_empty() {
            return Err(StorageError::InvalidInput("Value is required".to_string()));
        }
        if value.chars().count() > 10_000 {
            return Err(StorageError::InvalidInput("Value is too long".to_string()));
        }

        let mut tx = self.pool.begin().await?;
        let project = insert_project(&mut tx, &generate_slug()).await?;
        insert_message(&mut tx, NewMessage::user(&project.id, value)).await?;
        tx.commit().await?;

        self.get_project(&project.id).await
    }

    pub async fn find_project(&self, id: &str) -> Result<Option<Project>> {
        let row = sqlx::query("SELECT id, name, created_at, updated_at FROM projects WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_project(row)).transpose()
    }

    pub async fn get_project(&self, id: &str) -> Result<Project> {
        self.find_project(id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("Project {}", id)))
    }

    /// Projects ordered by most recent activity
    pub async fn list_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM projects ORDER BY updated_at DESC, rowid DESC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| self.row_to_project(row))
            .collect()
    }

    pub async fn get_or_create_default_project(&self) -> Result<Project> {
        let row = sqlx::query(
            "SELECT id, name, created_at, updated_at FROM projects WHERE name = ?1 ORDER BY created_at ASC LIMIT 1",
        )
        .bind(DEFAULT_PROJECT_NAME)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => self.row_to_project(row),
            None => {
                info!("Creating {}", DEFAULT_PROJECT_NAME);
                self.create_project(DEFAULT_PROJECT_NAME).await
            }
        }
    }

    /// The requested project when it exists, otherwise the default project
    pub async fn resolve_project(&self, project_id: Option<&str>) -> Result<Project> {
        if let Some(id) = project_id.filter(|id| !id.trim().is_empty()) {
            if let Some(project) = self.find_project(id).await? {
                return Ok(project);
            }
            debug!("Project {} not found, falling back to default project", id);
        }

        self.get_or_create_default_project().await
    }

    fn row_to_project(&self, row: sqlx::sqlite::SqliteRow) -> Result<Project> {
        Ok(Project {
            id: row.get("id"),
            name: row.get("name"),
            created_at: parse_timestamp("created_at", &row.get::<String, _>("created_at"))?,
            updated_at: parse_timestamp("updated_at", &row.get::<String, _>("updated_at"))?,
        })
    }
}

async fn insert_project(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    name: &str,
) -> Result<Project> {
    let name = name.trim();
    if name.is_empty() {
        return Err(StorageError::InvalidInput(
            "Project name is required".to_string(),
        ));
    }

    let now = Utc::now();
    let project = Project {
        id: format!("prj-{}", nanoid::nanoid!()),
        name: name.to_string(),
        created_at: now,
        updated_at: now,
    };

    debug!("Creating project: {} ({})", project.name, project.id);

    sqlx::query(
        "INSERT INTO projects (id, name, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)",
    )
    .bind(&project.id)
    .bind(&project.name)
    .bind(format_timestamp(&project.created_at))
    .bind(format_timestamp(&project.updated_at))
    .execute(&mut **tx)
    .await?;

    Ok(project)
}
