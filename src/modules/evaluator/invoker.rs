use std::{sync::Arc, time::Duration};

use tokio::time::timeout;
use tracing::{debug, warn};

use super::{error::EvaluationError, types::EvaluationIntent};
use crate::llm::GenerationBackend;

/// Single call to the configured backend with a hard timeout. No retries.
#[derive(Clone)]
pub struct ModelInvoker {
    backend: Arc<dyn GenerationBackend>,
    timeout: Duration,
}

impl ModelInvoker {
    pub fn new(backend: Arc<dyn GenerationBackend>, timeout: Duration) -> Self {
        Self { backend, timeout }
    }

    pub async fn invoke(
        &self,
        prompt: &str,
        intent: EvaluationIntent,
    ) -> Result<String, EvaluationError> {
        let bounds = intent.bounds();
        let backend = self.backend.name();

        match timeout(self.timeout, self.backend.generate(prompt, bounds)).await {
            Ok(Ok(text)) => {
                debug!(intent = intent.as_str(), %backend, chars = text.len(), "model replied");
                Ok(text)
            }
            Ok(Err(err)) => {
                warn!(?err, intent = intent.as_str(), %backend, "model call failed");
                Err(EvaluationError::ModelUnavailable(format!("{err:#}")))
            }
            Err(_) => {
                warn!(intent = intent.as_str(), %backend, timeout = ?self.timeout, "model call timed out");
                Err(EvaluationError::ModelUnavailable(format!(
                    "no reply within {:?}",
                    self.timeout
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::evaluator::test_support::ScriptedBackend;

    #[tokio::test]
    async fn passes_intent_bounds_to_backend() {
        let backend = Arc::new(ScriptedBackend::replying(|_, _| Ok("7".to_string())));
        let invoker = ModelInvoker::new(backend.clone(), Duration::from_secs(1));

        let text = invoker.invoke("prompt", EvaluationIntent::Score).await.unwrap();
        assert_eq!(text, "7");

        let calls = backend.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].1, EvaluationIntent::Score.bounds());
    }

    #[tokio::test]
    async fn backend_errors_become_model_unavailable() {
        let backend = Arc::new(ScriptedBackend::replying(|_, _| {
            Err(anyhow::anyhow!("connection refused"))
        }));
        let invoker = ModelInvoker::new(backend.clone(), Duration::from_secs(1));

        let err = invoker
            .invoke("prompt", EvaluationIntent::Suggestions)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::ModelUnavailable(ref reason) if reason.contains("refused")));
        assert_eq!(backend.calls().len(), 1);
    }

    #[tokio::test]
    async fn slow_backend_times_out() {
        let backend = Arc::new(
            ScriptedBackend::replying(|_, _| Ok("late".to_string()))
                .with_delay(Duration::from_millis(200)),
        );
        let invoker = ModelInvoker::new(backend, Duration::from_millis(20));

        let err = invoker
            .invoke("prompt", EvaluationIntent::PortfolioSummary)
            .await
            .unwrap_err();
        assert!(matches!(err, EvaluationError::ModelUnavailable(_)));
    }
}
