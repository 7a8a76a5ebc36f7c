use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{CacheEntry, NewProject, Project, RecordStore};

/// Process-local store used when no database is configured, and by tests.
#[derive(Default)]
pub struct MemoryRecordStore {
    state: RwLock<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    projects: Vec<Project>,
    summaries: HashMap<Uuid, CacheEntry>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn newest_first(mut projects: Vec<Project>) -> Vec<Project> {
    projects.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
    projects
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn list_projects(&self, user_id: Uuid) -> Result<Vec<Project>> {
        let guard = self.state.read().await;
        let owned = guard
            .projects
            .iter()
            .filter(|project| project.user_id == user_id)
            .cloned()
            .collect();
        Ok(newest_first(owned))
    }

    async fn list_all_projects(&self) -> Result<Vec<Project>> {
        let guard = self.state.read().await;
        Ok(newest_first(guard.projects.clone()))
    }

    async fn insert_project(&self, project: NewProject) -> Result<Project> {
        let mut guard = self.state.write().await;
        let stored = Project {
            id: guard.projects.len() as i64 + 1,
            user_id: project.user_id,
            student_name: project.student_name,
            title: project.title,
            description: project.description,
            grade: project.grade,
            files: project.files,
            ai_score: project.ai_score,
            ai_suggestions: project.ai_suggestions,
            created_at: Utc::now(),
        };
        guard.projects.push(stored.clone());
        Ok(stored)
    }

    async fn get_cached_summary(&self, user_id: Uuid) -> Result<Option<CacheEntry>> {
        let guard = self.state.read().await;
        Ok(guard.summaries.get(&user_id).cloned())
    }

    async fn put_cached_summary(&self, user_id: Uuid, summary: &str) -> Result<CacheEntry> {
        let entry = CacheEntry {
            user_id,
            summary_text: summary.to_string(),
            computed_at: Utc::now(),
        };
        let mut guard = self.state.write().await;
        guard.summaries.insert(user_id, entry.clone());
        Ok(entry)
    }

    async fn delete_cached_summary(&self, user_id: Uuid) -> Result<()> {
        let mut guard = self.state.write().await;
        guard.summaries.remove(&user_id);
        Ok(())
    }
}
