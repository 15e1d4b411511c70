//! Query + extracted texts → prose report.

use reagent_core::{LanguageModel, Result};
use std::sync::Arc;

pub const DEFAULT_TEMPERATURE: f64 = 0.1;
pub const DOCUMENT_SEPARATOR: &str = "\n\n";
pub const SYNTHESIS_ERROR_MARKER: &str = "Error during synthesis: ";

pub fn build_prompt(query: &str, documents: &[String]) -> String {
    let context = documents.join(DOCUMENT_SEPARATOR);
    format!(
        "You are a helpful research assistant, Help me synthesize the information from the context based on the query. Query: {query}\n\nContext: {context}"
    )
}

/// Pick the language model named by `REAGENT_LLM_PROVIDER` (`ollama` when unset).
pub fn language_model_from_env(client: reqwest::Client) -> Result<Arc<dyn LanguageModel>> {
    let provider = std::env::var("REAGENT_LLM_PROVIDER")
        .ok()
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "ollama".to_string());
    match provider.as_str() {
        "ollama" => Ok(Arc::new(crate::ollama::OllamaClient::from_env(client))),
        "openai_compat" | "openai-compat" => Ok(Arc::new(
            crate::openai_compat::OpenAiCompatClient::from_env(client)?,
        )),
        other => Err(reagent_core::Error::NotSupported(format!(
            "unknown REAGENT_LLM_PROVIDER: {other} (expected ollama or openai_compat)"
        ))),
    }
}

#[derive(Clone)]
pub struct Synthesizer {
    llm: Arc<dyn LanguageModel>,
    temperature: f64,
}

impl Synthesizer {
    pub fn new(llm: Arc<dyn LanguageModel>) -> Self {
        Self {
            llm,
            temperature: DEFAULT_TEMPERATURE,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn model_name(&self) -> &'static str {
        self.llm.name()
    }

    /// Never fails: a model error comes back as marker-prefixed report text.
    pub async fn synthesize(&self, query: &str, documents: &[String]) -> String {
        let prompt = build_prompt(query, documents);
        tracing::info!(
            llm = self.llm.name(),
            documents = documents.len(),
            prompt_chars = prompt.chars().count(),
            "synthesizing report"
        );
        match self.llm.complete(&prompt, self.temperature).await {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(llm = self.llm.name(), error = %e, "synthesis failed");
                format!("{SYNTHESIS_ERROR_MARKER}{e}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reagent_core::Error;
    use std::sync::Mutex;

    struct Recording {
        reply: std::result::Result<String, String>,
        seen: Mutex<Vec<(String, f64)>>,
    }

    #[async_trait::async_trait]
    impl LanguageModel for Recording {
        fn name(&self) -> &'static str {
            "recording"
        }
        async fn complete(&self, prompt: &str, temperature: f64) -> Result<String> {
            self.seen
                .lock()
                .unwrap()
                .push((prompt.to_string(), temperature));
            self.reply.clone().map_err(Error::Llm)
        }
    }

    #[test]
    fn prompt_has_fixed_preamble_and_blank_line_joined_context() {
        let p = build_prompt("why?", &["one".to_string(), "two".to_string()]);
        assert_eq!(
            p,
            "You are a helpful research assistant, Help me synthesize the information from the context based on the query. Query: why?\n\nContext: one\n\ntwo"
        );
    }

    #[tokio::test]
    async fn output_is_returned_verbatim_at_low_temperature() {
        let llm = Arc::new(Recording {
            reply: Ok("  Report body\n".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let s = Synthesizer::new(llm.clone());
        let out = s.synthesize("q", &["doc".to_string()]).await;
        assert_eq!(out, "  Report body\n");
        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].1, 0.1);
        assert!(seen[0].0.contains("Context: doc"));
    }

    #[tokio::test]
    async fn model_error_becomes_marker_text() {
        let llm = Arc::new(Recording {
            reply: Err("connection refused".to_string()),
            seen: Mutex::new(Vec::new()),
        });
        let out = Synthesizer::new(llm).synthesize("q", &[]).await;
        assert!(out.starts_with(SYNTHESIS_ERROR_MARKER));
        assert!(out.contains("connection refused"));
    }
}
