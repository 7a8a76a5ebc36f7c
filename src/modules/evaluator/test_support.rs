use std::{
    sync::{Mutex, PoisonError},
    time::Duration,
};

use anyhow::Result;
use async_trait::async_trait;

use crate::llm::{GenerationBackend, GenerationBounds};

type Reply = Box<dyn Fn(&str, GenerationBounds) -> Result<String> + Send + Sync>;

/// Backend whose replies come from a closure; records every prompt it sees.
pub struct ScriptedBackend {
    reply: Reply,
    delay: Option<Duration>,
    calls: Mutex<Vec<(String, GenerationBounds)>>,
}

impl ScriptedBackend {
    pub fn replying<F>(reply: F) -> Self
    where
        F: Fn(&str, GenerationBounds) -> Result<String> + Send + Sync + 'static,
    {
        Self {
            reply: Box::new(reply),
            delay: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<(String, GenerationBounds)> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn prompts(&self) -> Vec<String> {
        self.calls().into_iter().map(|(prompt, _)| prompt).collect()
    }
}

#[async_trait]
impl GenerationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str, bounds: GenerationBounds) -> Result<String> {
        self.calls
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((prompt.to_string(), bounds));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        (self.reply)(prompt, bounds)
    }
}
