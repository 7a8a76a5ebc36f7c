mod cache;
mod decode;
mod error;
mod extract;
mod fetch;
mod invoker;
mod pipeline;
mod prompt;
#[cfg(test)]
mod test_support;
mod types;

use axum::{
    Json, Router,
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::error;
use uuid::Uuid;

use crate::{
    store::Project,
    web::{AppState, ApiMessage, json_error},
};

pub use cache::SummaryCache;
pub use error::EvaluationError;
pub use fetch::ContentFetcher;
pub use invoker::ModelInvoker;
pub use pipeline::{Evaluator, Submission};
pub use types::{FileReference, FileSelection, ProjectInput};

const UNNAMED_STUDENT: &str = "Unnamed Student";

type ApiError = (StatusCode, Json<ApiMessage>);

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/submit", post(submit))
        .route("/projects", get(list_projects))
        .route("/suggestion", get(suggestion))
        .route("/summary", get(summary))
        .route("/evaluate/score", post(evaluate_score))
        .route("/evaluate/suggestions", post(evaluate_suggestions))
        .route("/evaluate/learning-path", post(evaluate_learning_path))
        .route("/evaluate/portfolio", post(evaluate_portfolio))
}

#[derive(Deserialize)]
struct SubmitRequest {
    user_id: Uuid,
    #[serde(default)]
    student_name: Option<String>,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "file_url")]
    files: Option<FileSelection>,
    #[serde(default)]
    grade: Option<f64>,
}

#[derive(Serialize)]
struct SubmitResponse {
    ai_score: f64,
    ai_suggestions: String,
}

#[derive(Serialize)]
struct ProjectView {
    id: i64,
    user_id: Uuid,
    student_name: String,
    title: String,
    description: String,
    grade: Option<f64>,
    files: Vec<FileReference>,
    ai_score: Option<f64>,
    ai_suggestions: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<Project> for ProjectView {
    fn from(project: Project) -> Self {
        Self {
            id: project.id,
            user_id: project.user_id,
            student_name: project
                .student_name
                .filter(|name| !name.trim().is_empty())
                .unwrap_or_else(|| UNNAMED_STUDENT.to_string()),
            title: project.title,
            description: project.description,
            grade: project.grade,
            files: project.files,
            ai_score: project.ai_score,
            ai_suggestions: project.ai_suggestions,
            created_at: project.created_at,
        }
    }
}

#[derive(Deserialize)]
struct SuggestionQuery {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    file_url: Option<String>,
    #[serde(default)]
    grade: Option<f64>,
}

#[derive(Serialize)]
struct SuggestionResponse {
    suggestion: String,
}

#[derive(Deserialize)]
struct SummaryQuery {
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    refresh: Option<String>,
}

impl SummaryQuery {
    fn refresh(&self) -> bool {
        self.refresh
            .as_deref()
            .is_some_and(|value| value.trim().eq_ignore_ascii_case("true"))
    }
}

#[derive(Serialize)]
struct SummaryResponse {
    summary: String,
}

#[derive(Deserialize)]
struct EvaluateRequest {
    #[serde(default)]
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default, alias = "file_url")]
    files: Option<FileSelection>,
    #[serde(default)]
    grade: Option<f64>,
}

impl EvaluateRequest {
    fn files(&mut self) -> Vec<FileReference> {
        self.files
            .take()
            .map(FileSelection::into_vec)
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct PortfolioRequest {
    projects: Vec<ProjectInput>,
}

#[derive(Serialize)]
struct ScoreResponse {
    score: f64,
}

#[derive(Serialize)]
struct TextResponse {
    text: String,
}

async fn submit(
    State(state): State<AppState>,
    Json(request): Json<SubmitRequest>,
) -> Result<Json<SubmitResponse>, ApiError> {
    let submission = Submission {
        user_id: request.user_id,
        student_name: request.student_name,
        title: request.title,
        description: request.description,
        grade: request.grade,
        files: request
            .files
            .map(FileSelection::into_vec)
            .unwrap_or_default(),
    };

    let feedback = state
        .evaluator()
        .submit(submission)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(SubmitResponse {
        ai_score: feedback.score,
        ai_suggestions: feedback.suggestions,
    }))
}

async fn list_projects(State(state): State<AppState>) -> Result<Json<Vec<ProjectView>>, ApiError> {
    let projects = state
        .evaluator()
        .list_projects()
        .await
        .map_err(evaluation_error)?;

    Ok(Json(projects.into_iter().map(ProjectView::from).collect()))
}

async fn suggestion(
    State(state): State<AppState>,
    Query(query): Query<SuggestionQuery>,
) -> Result<Json<SuggestionResponse>, ApiError> {
    let files: Vec<FileReference> = query
        .file_url
        .filter(|url| !url.trim().is_empty())
        .map(FileReference::new)
        .into_iter()
        .collect();

    let suggestion = state
        .evaluator()
        .learning_path(&query.title, &query.description, &files, query.grade)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(SuggestionResponse { suggestion }))
}

async fn summary(
    State(state): State<AppState>,
    Query(query): Query<SummaryQuery>,
) -> Result<Json<SummaryResponse>, ApiError> {
    let refresh = query.refresh();
    let raw_user_id = query
        .user_id
        .filter(|value| !value.trim().is_empty())
        .ok_or_else(|| json_error(StatusCode::BAD_REQUEST, "user_id is required"))?;
    let user_id = Uuid::parse_str(raw_user_id.trim())
        .map_err(|_| json_error(StatusCode::BAD_REQUEST, "user_id must be a UUID"))?;

    let summary = state
        .evaluator()
        .user_summary(user_id, refresh)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(SummaryResponse { summary }))
}

async fn evaluate_score(
    State(state): State<AppState>,
    Json(mut request): Json<EvaluateRequest>,
) -> Result<Json<ScoreResponse>, ApiError> {
    let files = request.files();
    let score = state
        .evaluator()
        .score(&request.description, &files, request.grade)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(ScoreResponse { score }))
}

async fn evaluate_suggestions(
    State(state): State<AppState>,
    Json(mut request): Json<EvaluateRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let files = request.files();
    let text = state
        .evaluator()
        .suggestions(&request.description, &files, request.grade)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(TextResponse { text }))
}

async fn evaluate_learning_path(
    State(state): State<AppState>,
    Json(mut request): Json<EvaluateRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let files = request.files();
    let text = state
        .evaluator()
        .learning_path(&request.title, &request.description, &files, request.grade)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(TextResponse { text }))
}

async fn evaluate_portfolio(
    State(state): State<AppState>,
    Json(request): Json<PortfolioRequest>,
) -> Result<Json<TextResponse>, ApiError> {
    let text = state
        .evaluator()
        .portfolio_summary(&request.projects)
        .await
        .map_err(evaluation_error)?;

    Ok(Json(TextResponse { text }))
}

fn evaluation_error(err: EvaluationError) -> ApiError {
    match err {
        EvaluationError::ModelUnavailable(reason) => {
            error!(%reason, "evaluation failed: generation backend unavailable");
            json_error(
                StatusCode::BAD_GATEWAY,
                "The evaluation model is unavailable. Please try again later.",
            )
        }
        EvaluationError::NoProjects => {
            json_error(StatusCode::NOT_FOUND, "No projects found for this user.")
        }
        EvaluationError::Store(err) => {
            error!(?err, "record store failure");
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error.")
        }
    }
}
