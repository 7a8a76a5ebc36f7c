use std::fmt::Write as _;

use super::types::{EvaluationContext, EvaluationIntent, ExtractedDocument};

pub const NO_FILES_SENTINEL: &str = "No files submitted.";
pub const NO_GRADE_SENTINEL: &str = "N/A";

const SCORE_INSTRUCTION: &str = "Rate this project from 1-10:";
const SUGGESTIONS_INSTRUCTION: &str = "Provide actionable suggestions for this project:";
const LEARNING_PATH_INSTRUCTION: &str = "Recommend next learning steps based on this project:";

/// Compose the prompt for a single project. A portfolio summary over one
/// project is the one-element case of [`build_portfolio_prompt`].
pub fn build_prompt(intent: EvaluationIntent, context: &EvaluationContext) -> String {
    let files = render_documents(&context.documents);
    let grade = render_grade(context.grade);

    match intent {
        EvaluationIntent::Score => format!(
            "{SCORE_INSTRUCTION}\nDescription: {}\nFiles: {files}\nGrade: {grade}",
            context.description
        ),
        EvaluationIntent::Suggestions => format!(
            "{SUGGESTIONS_INSTRUCTION}\nDescription: {}\nFiles:\n{files}\nGrade: {grade}",
            context.description
        ),
        EvaluationIntent::LearningPath => format!(
            "{LEARNING_PATH_INSTRUCTION}\nTitle: {}\nDescription: {}\nFiles:\n{files}\nGrade: {grade}",
            context.title.as_deref().unwrap_or_default(),
            context.description
        ),
        EvaluationIntent::PortfolioSummary => {
            build_portfolio_prompt(std::slice::from_ref(context))
        }
    }
}

pub fn build_portfolio_prompt(projects: &[EvaluationContext]) -> String {
    let mut prompt = format!(
        "Summarize the student's overall performance (average grade: {:.2}):\n",
        average_grade(projects)
    );

    for project in projects {
        let _ = write!(
            prompt,
            "Project Title: {}\nDescription: {}\nGrade: {}\nFiles:\n{}\n",
            project.title.as_deref().unwrap_or_default(),
            project.description,
            render_grade(project.grade),
            render_documents(&project.documents),
        );
    }

    prompt
}

/// Mean over graded projects only; `0.0` when none carry a grade.
pub fn average_grade(projects: &[EvaluationContext]) -> f64 {
    let grades: Vec<f64> = projects.iter().filter_map(|project| project.grade).collect();
    if grades.is_empty() {
        0.0
    } else {
        grades.iter().sum::<f64>() / grades.len() as f64
    }
}

fn render_documents(documents: &[ExtractedDocument]) -> String {
    let mut rendered = String::new();
    for document in documents {
        rendered.push_str(&document.text);
        rendered.push('\n');
    }

    let trimmed = rendered.trim();
    if trimmed.is_empty() {
        NO_FILES_SENTINEL.to_string()
    } else {
        trimmed.to_string()
    }
}

fn render_grade(grade: Option<f64>) -> String {
    match grade {
        Some(value) => value.to_string(),
        None => NO_GRADE_SENTINEL.to_string(),
    }
}
