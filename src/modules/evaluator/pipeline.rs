use std::sync::Arc;

use futures::future::join_all;
use tokio::time::sleep;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{
    cache::SummaryCache,
    decode::decode,
    error::EvaluationError,
    fetch::ContentFetcher,
    invoker::ModelInvoker,
    prompt::{build_portfolio_prompt, build_prompt},
    types::{EvaluationContext, EvaluationIntent, EvaluationResult, FileReference, ProjectInput},
};
use crate::{
    config::RetryPolicy,
    store::{NewProject, Project, RecordStore},
};

/// A new project handed in by a student.
#[derive(Debug, Clone)]
pub struct Submission {
    pub user_id: Uuid,
    pub student_name: Option<String>,
    pub title: String,
    pub description: String,
    pub grade: Option<f64>,
    pub files: Vec<FileReference>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubmissionFeedback {
    pub score: f64,
    pub suggestions: String,
}

/// Fetch, build, invoke, decode. Owns the retry loop around model calls and
/// keeps the summary cache consistent with submissions.
pub struct Evaluator {
    fetcher: ContentFetcher,
    invoker: ModelInvoker,
    cache: Arc<SummaryCache>,
    store: Arc<dyn RecordStore>,
    retry: RetryPolicy,
}

impl Evaluator {
    pub fn new(
        fetcher: ContentFetcher,
        invoker: ModelInvoker,
        cache: Arc<SummaryCache>,
        store: Arc<dyn RecordStore>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            fetcher,
            invoker,
            cache,
            store,
            retry,
        }
    }

    pub async fn score(
        &self,
        description: &str,
        files: &[FileReference],
        grade: Option<f64>,
    ) -> Result<f64, EvaluationError> {
        let context = self.context(None, description, files, grade).await;
        Ok(self.evaluate(EvaluationIntent::Score, &context).await?.into_score())
    }

    pub async fn suggestions(
        &self,
        description: &str,
        files: &[FileReference],
        grade: Option<f64>,
    ) -> Result<String, EvaluationError> {
        let context = self.context(None, description, files, grade).await;
        Ok(self
            .evaluate(EvaluationIntent::Suggestions, &context)
            .await?
            .into_text())
    }

    pub async fn learning_path(
        &self,
        title: &str,
        description: &str,
        files: &[FileReference],
        grade: Option<f64>,
    ) -> Result<String, EvaluationError> {
        let context = self.context(Some(title), description, files, grade).await;
        Ok(self
            .evaluate(EvaluationIntent::LearningPath, &context)
            .await?
            .into_text())
    }

    pub async fn portfolio_summary(
        &self,
        projects: &[ProjectInput],
    ) -> Result<String, EvaluationError> {
        let contexts = join_all(projects.iter().map(|project| {
            self.context(
                Some(project.title.as_str()),
                &project.description,
                &project.files,
                project.grade,
            )
        }))
        .await;

        let prompt = build_portfolio_prompt(&contexts);
        Ok(self
            .run(EvaluationIntent::PortfolioSummary, &prompt)
            .await?
            .into_text())
    }

    /// Cached portfolio summary for `user_id`, recomputed on a miss or when
    /// `refresh` is set.
    pub async fn user_summary(&self, user_id: Uuid, refresh: bool) -> Result<String, EvaluationError> {
        if !refresh {
            if let Some(entry) = self.cache.get(user_id).await? {
                debug!(%user_id, computed_at = %entry.computed_at, "serving cached summary");
                return Ok(entry.summary_text);
            }
        }

        let ticket = self.cache.ticket(user_id).await;
        let projects = self.store.list_projects(user_id).await?;
        if projects.is_empty() {
            return Err(EvaluationError::NoProjects);
        }

        let inputs: Vec<ProjectInput> = projects.iter().map(Project::to_input).collect();
        let summary = self.portfolio_summary(&inputs).await?;

        if self.cache.put_if_current(ticket, &summary).await?.is_none() {
            info!(%user_id, "summary superseded by a newer submission; not cached");
        }
        Ok(summary)
    }

    /// Scores and reviews a submission, then records it.
    pub async fn submit(&self, submission: Submission) -> Result<SubmissionFeedback, EvaluationError> {
        let user_id = submission.user_id;
        self.cache.invalidate(user_id).await?;

        let context = self
            .context(
                Some(submission.title.as_str()),
                &submission.description,
                &submission.files,
                submission.grade,
            )
            .await;

        let (score, suggestions) = tokio::try_join!(
            self.evaluate(EvaluationIntent::Score, &context),
            self.evaluate(EvaluationIntent::Suggestions, &context),
        )?;
        let feedback = SubmissionFeedback {
            score: score.into_score(),
            suggestions: suggestions.into_text(),
        };

        let project = self
            .store
            .insert_project(NewProject {
                user_id,
                student_name: submission.student_name,
                title: submission.title,
                description: submission.description,
                grade: submission.grade,
                files: submission.files,
                ai_score: Some(feedback.score),
                ai_suggestions: Some(feedback.suggestions.clone()),
            })
            .await?;
        self.cache.invalidate(user_id).await?;

        info!(%user_id, project_id = project.id, score = feedback.score, "project submitted");
        Ok(feedback)
    }

    pub async fn list_projects(&self) -> Result<Vec<Project>, EvaluationError> {
        Ok(self.store.list_all_projects().await?)
    }

    async fn context(
        &self,
        title: Option<&str>,
        description: &str,
        files: &[FileReference],
        grade: Option<f64>,
    ) -> EvaluationContext {
        EvaluationContext {
            title: title.map(str::to_string),
            description: description.to_string(),
            documents: self.fetcher.fetch_all(files).await,
            grade,
        }
    }

    async fn evaluate(
        &self,
        intent: EvaluationIntent,
        context: &EvaluationContext,
    ) -> Result<EvaluationResult, EvaluationError> {
        let prompt = build_prompt(intent, context);
        self.run(intent, &prompt).await
    }

    async fn run(
        &self,
        intent: EvaluationIntent,
        prompt: &str,
    ) -> Result<EvaluationResult, EvaluationError> {
        let mut attempt = 0;

        loop {
            attempt += 1;

            match self.invoker.invoke(prompt, intent).await {
                Ok(raw) => return Ok(decode(intent, &raw)),
                Err(err) if attempt < self.retry.max_attempts => {
                    warn!(
                        %err,
                        attempt,
                        max_attempts = self.retry.max_attempts,
                        intent = intent.as_str(),
                        "model request failed, will retry"
                    );
                    sleep(self.retry.delay_for(attempt)).await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}
