use serde::{Deserialize, Serialize};

use crate::llm::GenerationBounds;

/// A caller-supplied file to evaluate. Accepts either a bare locator string or
/// an object carrying `locator`/`url` and an optional declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "FileReferenceInput")]
pub struct FileReference {
    pub locator: String,
    pub declared_type: Option<String>,
}

impl FileReference {
    pub fn new(locator: impl Into<String>) -> Self {
        Self {
            locator: locator.into(),
            declared_type: None,
        }
    }

    pub fn with_declared_type(mut self, declared_type: impl Into<String>) -> Self {
        self.declared_type = Some(declared_type.into());
        self
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum FileReferenceInput {
    Bare(String),
    Detailed {
        #[serde(alias = "url")]
        locator: String,
        #[serde(default, alias = "type", alias = "declaredType")]
        declared_type: Option<String>,
    },
}

impl From<FileReferenceInput> for FileReference {
    fn from(input: FileReferenceInput) -> Self {
        match input {
            FileReferenceInput::Bare(locator) => FileReference::new(locator),
            FileReferenceInput::Detailed {
                locator,
                declared_type,
            } => FileReference {
                locator,
                declared_type: declared_type.filter(|value| !value.trim().is_empty()),
            },
        }
    }
}

/// One reference or many; request bodies use both forms.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FileSelection {
    One(FileReference),
    Many(Vec<FileReference>),
}

impl FileSelection {
    pub fn into_vec(self) -> Vec<FileReference> {
        match self {
            FileSelection::One(reference) => vec![reference],
            FileSelection::Many(references) => references,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExtractionStatus {
    Ok,
    Unsupported,
    Failed(String),
}

/// Text obtained for one reference. `text` is never empty for degraded statuses.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedDocument {
    pub source_locator: String,
    pub text: String,
    pub status: ExtractionStatus,
}

impl ExtractedDocument {
    pub fn ok(source_locator: impl Into<String>, text: String) -> Self {
        Self {
            source_locator: source_locator.into(),
            text,
            status: ExtractionStatus::Ok,
        }
    }

    pub fn unsupported(source_locator: impl Into<String>, extension: &str) -> Self {
        let shown = if extension.is_empty() {
            "(none)".to_string()
        } else {
            format!(".{extension}")
        };
        Self {
            source_locator: source_locator.into(),
            text: format!("(Unsupported file type: {shown})"),
            status: ExtractionStatus::Unsupported,
        }
    }

    pub fn failed(source_locator: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut reason = reason.into();
        if reason.trim().is_empty() {
            reason = "unknown error".to_string();
        }
        Self {
            source_locator: source_locator.into(),
            text: format!("(Failed to extract file content: {reason})"),
            status: ExtractionStatus::Failed(reason),
        }
    }
}

/// Everything the prompt builder needs for one project.
#[derive(Debug, Clone, Default)]
pub struct EvaluationContext {
    pub title: Option<String>,
    pub description: String,
    pub documents: Vec<ExtractedDocument>,
    pub grade: Option<f64>,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum EvaluationIntent {
    Score,
    Suggestions,
    LearningPath,
    PortfolioSummary,
}

impl EvaluationIntent {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluationIntent::Score => "score",
            EvaluationIntent::Suggestions => "suggestions",
            EvaluationIntent::LearningPath => "learning_path",
            EvaluationIntent::PortfolioSummary => "portfolio_summary",
        }
    }

    /// Scores are short and deterministic; prose intents are longer and sampled.
    pub fn bounds(&self) -> GenerationBounds {
        match self {
            EvaluationIntent::Score => GenerationBounds {
                max_length: 20,
                min_length: 2,
                sample: false,
            },
            EvaluationIntent::Suggestions | EvaluationIntent::LearningPath => GenerationBounds {
                max_length: 200,
                min_length: 50,
                sample: true,
            },
            EvaluationIntent::PortfolioSummary => GenerationBounds {
                max_length: 400,
                min_length: 150,
                sample: true,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum EvaluationResult {
    Score(f64),
    Text(String),
}

impl EvaluationResult {
    pub fn into_score(self) -> f64 {
        match self {
            EvaluationResult::Score(value) => value,
            EvaluationResult::Text(_) => 0.0,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            EvaluationResult::Text(text) => text,
            EvaluationResult::Score(value) => value.to_string(),
        }
    }
}

/// A project as supplied to a portfolio summary.
#[derive(Debug, Clone, Deserialize)]
pub struct ProjectInput {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub grade: Option<f64>,
    #[serde(default, alias = "file_paths", alias = "file_url")]
    pub files: Vec<FileReference>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn file_reference_accepts_bare_and_detailed_forms() {
        let bare: FileReference = serde_json::from_value(json!("https://x/a.py")).unwrap();
        assert_eq!(bare, FileReference::new("https://x/a.py"));

        let detailed: FileReference =
            serde_json::from_value(json!({"url": "https://x/blob", "type": "pdf"})).unwrap();
        assert_eq!(
            detailed,
            FileReference::new("https://x/blob").with_declared_type("pdf")
        );

        let round_trip: FileReference =
            serde_json::from_value(serde_json::to_value(&detailed).unwrap()).unwrap();
        assert_eq!(round_trip, detailed);
    }

    #[test]
    fn file_selection_flattens() {
        let one: FileSelection = serde_json::from_value(json!("https://x/a.md")).unwrap();
        assert_eq!(one.into_vec().len(), 1);

        let many: FileSelection =
            serde_json::from_value(json!(["https://x/a.md", {"locator": "https://x/b.zip"}]))
                .unwrap();
        let many = many.into_vec();
        assert_eq!(many[1].locator, "https://x/b.zip");
    }

    #[test]
    fn degraded_documents_carry_placeholder_text() {
        let unsupported = ExtractedDocument::unsupported("https://x/a.exe", "exe");
        assert_eq!(unsupported.text, "(Unsupported file type: .exe)");
        assert_eq!(unsupported.status, ExtractionStatus::Unsupported);

        let failed = ExtractedDocument::failed("https://x/a.pdf", "");
        assert!(!failed.text.is_empty());
        assert_eq!(failed.status, ExtractionStatus::Failed("unknown error".into()));
    }

    #[test]
    fn score_intent_is_deterministic() {
        assert!(!EvaluationIntent::Score.bounds().sample);
        assert!(EvaluationIntent::PortfolioSummary.bounds().max_length > 200);
    }
}
