use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool, postgres::PgPoolOptions, types::Json};
use uuid::Uuid;

use super::{CacheEntry, NewProject, Project, RecordStore};
use crate::modules::evaluator::FileReference;

const PROJECT_COLUMNS: &str = "id, user_id, student_name, title, description, grade, files, ai_score, ai_suggestions, created_at";

#[derive(Clone)]
pub struct PgRecordStore {
    pool: PgPool,
}

impl PgRecordStore {
    /// Connects and applies the embedded migrations.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await
            .context("failed to connect to Postgres")?;

        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .context("failed to run database migrations")?;

        Ok(Self { pool })
    }
}

#[derive(FromRow)]
struct ProjectRow {
    id: i64,
    user_id: Uuid,
    student_name: Option<String>,
    title: String,
    description: String,
    grade: Option<f64>,
    files: Json<Vec<FileReference>>,
    ai_score: Option<f64>,
    ai_suggestions: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Project {
            id: row.id,
            user_id: row.user_id,
            student_name: row.student_name,
            title: row.title,
            description: row.description,
            grade: row.grade,
            files: row.files.0,
            ai_score: row.ai_score,
            ai_suggestions: row.ai_suggestions,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl RecordStore for PgRecordStore {
    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects WHERE user_id = $1 ORDER BY created_at DESC, id DESC"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("failed to load projects for user {user_id}"))?;

        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn list_all_projects(&self) -> Result<Vec<Project>> {
        let rows = sqlx::query_as::<_, ProjectRow>(&format!(
            "SELECT {PROJECT_COLUMNS} FROM projects ORDER BY created_at DESC, id DESC"
        ))
        .fetch_all(&self.pool)
        .await
        .context("failed to load projects")?;

        Ok(rows.into_iter().map(Project::from).collect())
    }

    async fn insert_project(&self, project: NewProject) -> Result<Project> {
        let row = sqlx::query_as::<_, ProjectRow>(&format!(
            "INSERT INTO projects (user_id, student_name, title, description, grade, files, ai_score, ai_suggestions)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {PROJECT_COLUMNS}"
        ))
        .bind(project.user_id)
        .bind(&project.student_name)
        .bind(&project.title)
        .bind(&project.description)
        .bind(project.grade)
        .bind(Json(&project.files))
        .bind(project.ai_score)
        .bind(&project.ai_suggestions)
        .fetch_one(&self.pool)
        .await
        .context("failed to insert project")?;

        Ok(row.into())
    }

    async fn get_cached_summary(&self, user_id: Uuid) -> Result<Option<CacheEntry>> {
        sqlx::query_as::<_, CacheEntry>(
            "SELECT user_id, summary AS summary_text, computed_at FROM user_summaries WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to load cached summary for user {user_id}"))
    }

    async fn put_cached_summary(&self, user_id: Uuid, summary: &str) -> Result<CacheEntry> {
        sqlx::query_as::<_, CacheEntry>(
            "INSERT INTO user_summaries (user_id, summary, computed_at) VALUES ($1, $2, NOW())
             ON CONFLICT (user_id) DO UPDATE SET summary = EXCLUDED.summary, computed_at = EXCLUDED.computed_at
             RETURNING user_id, summary AS summary_text, computed_at",
        )
        .bind(user_id)
        .bind(summary)
        .fetch_one(&self.pool)
        .await
        .with_context(|| format!("failed to store cached summary for user {user_id}"))
    }

    async fn delete_cached_summary(&self, user_id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM user_summaries WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to delete cached summary for user {user_id}"))?;
        Ok(())
    }
}
