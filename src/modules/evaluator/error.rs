use thiserror::Error;

/// Failures that escape an evaluation entry point. Per-document problems are
/// absorbed into placeholder text and never show up here.
#[derive(Debug, Error)]
pub enum EvaluationError {
    #[error("generation backend unavailable: {0}")]
    ModelUnavailable(String),

    #[error("no projects found for summary")]
    NoProjects,

    #[error("record store error: {0:#}")]
    Store(#[from] anyhow::Error),
}
