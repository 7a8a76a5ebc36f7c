use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use uuid::Uuid;

use crate::modules::evaluator::{FileReference, ProjectInput};

mod memory;
mod postgres;

pub use memory::MemoryRecordStore;
pub use postgres::PgRecordStore;

/// Narrow persistence interface for project records and cached summaries.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Projects owned by `user_id`, newest first.
    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>>;

    /// Every project, newest first.
    async fn list_all_projects(&self) -> Result<Vec<Project>>;

    async fn insert_project(&self, project: NewProject) -> Result<Project>;

    async fn get_cached_summary(&self, user_id: Uuid) -> Result<Option<CacheEntry>>;

    /// Overwrites any existing entry for the user.
    async fn put_cached_summary(&self, user_id: Uuid, summary: &str) -> Result<CacheEntry>;

    async fn delete_cached_summary(&self, user_id: Uuid) -> Result<()>;
}

#[derive(Debug, Clone, Serialize)]
pub struct Project {
    pub id: i64,
    pub user_id: Uuid,
    pub student_name: Option<String>,
    pub title: String,
    pub description: String,
    pub grade: Option<f64>,
    pub files: Vec<FileReference>,
    pub ai_score: Option<f64>,
    pub ai_suggestions: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Project {
    pub fn to_input(&self) -> ProjectInput {
        ProjectInput {
            title: self.title.clone(),
            description: self.description.clone(),
            grade: self.grade,
            files: self.files.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewProject {
    pub user_id: Uuid,
    pub student_name: Option<String>,
    pub title: String,
    pub description: String,
    pub grade: Option<f64>,
    pub files: Vec<FileReference>,
    pub ai_score: Option<f64>,
    pub ai_suggestions: Option<String>,
}

/// The last portfolio summary computed for a user.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct CacheEntry {
    pub user_id: Uuid,
    pub summary_text: String,
    pub computed_at: DateTime<Utc>,
}
