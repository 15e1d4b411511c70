use reagent_core::{Error, LanguageModel, Result};
use serde::{Deserialize, Serialize};

pub const DEFAULT_OLLAMA_BASE_URL: &str = "http://127.0.0.1:11434";
pub const DEFAULT_OLLAMA_MODEL: &str = "granite3.3:2b";

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub(crate) fn llm_timeout_ms_from_env() -> u64 {
    // Small local models on CPU can take minutes on a long context.
    env("REAGENT_LLM_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .filter(|&ms| ms > 0)
        .unwrap_or(300_000)
}

/// Local Ollama server, single-shot (non-streaming) completions.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_ms: u64,
}

impl OllamaClient {
    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            model: model.into(),
            timeout_ms: 300_000,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Self {
        let base_url =
            env("REAGENT_OLLAMA_BASE_URL").unwrap_or_else(|| DEFAULT_OLLAMA_BASE_URL.to_string());
        let model = env("REAGENT_OLLAMA_MODEL").unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string());
        Self::new(client, base_url, model).with_timeout_ms(llm_timeout_ms_from_env())
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms.max(1);
        self
    }

    fn endpoint_generate(&self) -> String {
        format!("{}/api/generate", self.base_url.trim_end_matches('/'))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[async_trait::async_trait]
impl LanguageModel for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, prompt: &str, temperature: f64) -> Result<String> {
        let req = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions { temperature },
        };

        let resp = self
            .client
            .post(self.endpoint_generate())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&req)
            .send()
            .await
            .map_err(|e| Error::Llm(e.to_string()))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::Llm(format!(
                "ollama generate HTTP {status} (model {})",
                self.model
            )));
        }

        let parsed: GenerateResponse = resp.json().await.map_err(|e| Error::Llm(e.to_string()))?;
        tracing::debug!(model = %self.model, chars = parsed.response.len(), "ollama completion");
        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr: SocketAddr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    #[tokio::test]
    async fn generate_sends_model_prompt_and_temperature() {
        let app = Router::new().route(
            "/api/generate",
            post(|Json(v): Json<serde_json::Value>| async move {
                assert_eq!(v["stream"], serde_json::json!(false));
                let echo = format!(
                    "model={} temp={} prompt={}",
                    v["model"].as_str().unwrap_or(""),
                    v["options"]["temperature"],
                    v["prompt"].as_str().unwrap_or("")
                );
                Json(serde_json::json!({ "model": v["model"], "response": echo, "done": true }))
            }),
        );
        let addr = serve(app).await;

        // Trailing slash on the base URL must not produce `//api`.
        let c = OllamaClient::new(
            reqwest::Client::new(),
            format!("http://{addr}/"),
            "granite3.3:2b",
        );
        let out = c.complete("hello", 0.1).await.unwrap();
        assert_eq!(out, "model=granite3.3:2b temp=0.1 prompt=hello");
    }

    #[tokio::test]
    async fn http_error_names_the_model() {
        let app = Router::new().route(
            "/api/generate",
            post(|| async {
                (
                    axum::http::StatusCode::NOT_FOUND,
                    r#"{"error":"model not found"}"#,
                )
            }),
        );
        let addr = serve(app).await;

        let c = OllamaClient::new(reqwest::Client::new(), format!("http://{addr}"), "missing:1b");
        let err = c.complete("x", 0.1).await.unwrap_err();
        match err {
            Error::Llm(m) => {
                assert!(m.contains("404"), "{m}");
                assert!(m.contains("missing:1b"), "{m}");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_server_is_llm_error() {
        // Port 9 (discard) is essentially never an HTTP server on loopback.
        let c = OllamaClient::new(reqwest::Client::new(), "http://127.0.0.1:9", "m")
            .with_timeout_ms(2_000);
        assert!(matches!(c.complete("x", 0.1).await, Err(Error::Llm(_))));
    }
}
