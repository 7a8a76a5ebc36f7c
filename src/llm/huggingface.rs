use std::env;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{Value, json};

use super::{GenerationBackend, GenerationBounds};

const DEFAULT_API_BASE: &str = "https://api-inference.huggingface.co/models";

/// Hosted sequence-to-sequence summarisation endpoint.
pub struct HuggingFaceBackend {
    http: Client,
    endpoint: String,
    token: Option<String>,
    model: String,
}

impl HuggingFaceBackend {
    pub fn new(endpoint: impl Into<String>, token: Option<String>, model: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            endpoint: endpoint.into(),
            token,
            model: model.into(),
        }
    }

    /// `HF_API_URL` overrides the endpoint entirely (self-hosted inference servers).
    pub fn from_env(model: String) -> Result<Self> {
        if model.trim().is_empty() {
            bail!("GENERATION_MODEL must name a model repository for the huggingface backend");
        }
        let endpoint = env::var("HF_API_URL")
            .ok()
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| format!("{DEFAULT_API_BASE}/{model}"));
        let token = env::var("HF_API_TOKEN").ok();
        Ok(Self::new(endpoint, token, model))
    }
}

#[async_trait]
impl GenerationBackend for HuggingFaceBackend {
    fn name(&self) -> &str {
        &self.model
    }

    async fn generate(&self, prompt: &str, bounds: GenerationBounds) -> Result<String> {
        let payload = json!({
            "inputs": prompt,
            "parameters": {
                "max_length": bounds.max_length,
                "min_length": bounds.min_length,
                "do_sample": bounds.sample,
            },
            "options": { "wait_for_model": true },
        });

        let mut request = self.http.post(&self.endpoint).json(&payload);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        let body_text = response.text().await.context("failed to read response body")?;
        if !status.is_success() {
            bail!("inference call failed with status {status}: {body_text}");
        }

        let body: Value = serde_json::from_str(&body_text)
            .with_context(|| format!("failed to parse inference response as JSON: {body_text}"))?;

        generated_text(&body).ok_or_else(|| anyhow!("unexpected inference response payload: {body}"))
    }
}

/// Flattens the response shapes the inference server has been seen to return.
fn generated_text(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Array(items) => items.first().and_then(generated_text),
        Value::Object(map) => ["summary_text", "generated_text", "text"]
            .iter()
            .find_map(|key| map.get(*key))
            .and_then(|field| match field {
                Value::String(text) => Some(text.clone()),
                Value::Number(number) => Some(number.to_string()),
                _ => None,
            }),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, routing::post};
    use tokio::net::TcpListener;

    #[test]
    fn flattens_known_shapes() {
        assert_eq!(
            generated_text(&json!([{"summary_text": "7"}])).as_deref(),
            Some("7")
        );
        assert_eq!(
            generated_text(&json!([{"generated_text": "learn tests"}])).as_deref(),
            Some("learn tests")
        );
        assert_eq!(generated_text(&json!({"summary_text": 9})).as_deref(), Some("9"));
        assert_eq!(generated_text(&json!("plain")).as_deref(), Some("plain"));
        assert_eq!(generated_text(&json!(8.5)).as_deref(), Some("8.5"));
        assert!(generated_text(&json!({"error": "loading"})).is_none());
        assert!(generated_text(&json!([])).is_none());
    }

    #[tokio::test]
    async fn posts_bounds_and_reads_summary() {
        let app = Router::new().route(
            "/model",
            post(|Json(body): Json<Value>| async move {
                let max = body["parameters"]["max_length"].as_u64().unwrap_or_default();
                let sample = body["parameters"]["do_sample"].as_bool().unwrap_or(true);
                Json(json!([{ "summary_text": format!("max={max} sample={sample}") }]))
            }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let backend = HuggingFaceBackend::new(format!("http://{addr}/model"), None, "test");
        let text = backend
            .generate(
                "Rate this project",
                GenerationBounds {
                    max_length: 20,
                    min_length: 2,
                    sample: false,
                },
            )
            .await
            .unwrap();
        assert_eq!(text, "max=20 sample=false");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let app = Router::new().route(
            "/model",
            post(|| async { (axum::http::StatusCode::SERVICE_UNAVAILABLE, "loading") }),
        );
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let backend = HuggingFaceBackend::new(format!("http://{addr}/model"), None, "test");
        let err = backend
            .generate(
                "prompt",
                GenerationBounds {
                    max_length: 200,
                    min_length: 50,
                    sample: true,
                },
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("503"));
    }
}
