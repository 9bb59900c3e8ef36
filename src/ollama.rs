// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 shoebox contributors

//! Ollama API client for local AI inference
//!
//! Generation failures are returned as [`GenerateOutcome`] values rather
//! than errors: one slow or broken model call must not abort a batch run,
//! so callers inspect `outcome.error` and degrade per item. Generation
//! runs through a candidate list (primary model plus configured
//! fallbacks): a failed or truncated reply moves on to the next model,
//! and only when every candidate fails does the failure reach the caller.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::{Result, ShoeboxError};

/// Ollama API client
pub struct OllamaClient {
    client: Client,
    base_url: String,
}

/// Candidate list for a generation call: the primary model first, then
/// the fallbacks, deduplicated.
pub fn model_candidates(primary: &str, fallbacks: &[String]) -> Vec<String> {
    let mut out = vec![primary.to_string()];
    for fallback in fallbacks {
        if !out.contains(fallback) {
            out.push(fallback.clone());
        }
    }
    out
}

/// Result of one generation call. `error` is set (and `text` empty) when
/// the call failed; `done` is false when the server stopped early.
#[derive(Debug, Clone)]
pub struct GenerateOutcome {
    pub text: String,
    pub model: String,
    pub done: bool,
    pub error: Option<String>,
}

impl GenerateOutcome {
    fn failure(model: &str, error: String) -> Self {
        Self {
            text: String::new(),
            model: model.to_string(),
            done: false,
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Serialize)]
struct GenerateRequest {
    model: String,
    prompt: String,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    images: Option<Vec<String>>,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
    #[serde(default)]
    done: bool,
}

#[derive(Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

#[derive(Deserialize)]
struct ModelInfo {
    name: String,
}

impl OllamaClient {
    /// Create a new Ollama client
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .build()
            .map_err(ShoeboxError::Api)?;

        // Normalize URL
        let base_url = base_url
            .trim_end_matches('/')
            .replace("/api/generate", "")
            .replace("/api/chat", "");

        Ok(Self { client, base_url })
    }

    /// Check if Ollama is available
    pub async fn health_check(&self) -> Result<()> {
        let url = format!("{}/api/tags", self.base_url);

        self.client
            .get(&url)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| {
                ShoeboxError::OllamaUnavailable(format!(
                    "Cannot connect to Ollama at {}: {}",
                    self.base_url, e
                ))
            })?;

        Ok(())
    }

    /// List available models
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let url = format!("{}/api/tags", self.base_url);

        let response = self.client.get(&url).send().await?;

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }

    /// Check if a specific model is available
    pub async fn model_available(&self, model: &str) -> Result<bool> {
        let models = self.list_models().await?;
        Ok(models
            .iter()
            .any(|m| m.starts_with(model) || m == &format!("{}:latest", model)))
    }

    /// Pick the preferred model when installed, otherwise the first
    /// installed fallback. Uses the preferred name unverified when the
    /// tag listing itself fails.
    pub async fn resolve_model(&self, preferred: &str, fallbacks: &[String]) -> String {
        let installed = match self.list_models().await {
            Ok(models) => models,
            Err(e) => {
                warn!(error = %e, "model listing failed, using configured model unverified");
                return preferred.to_string();
            }
        };
        let has = |name: &str| {
            installed
                .iter()
                .any(|m| m.starts_with(name) || m == &format!("{name}:latest"))
        };
        if has(preferred) {
            return preferred.to_string();
        }
        for candidate in fallbacks {
            if has(candidate) {
                warn!(preferred, fallback = %candidate, "configured model not installed");
                return candidate.clone();
            }
        }
        preferred.to_string()
    }

    /// One generation call with an explicit timeout. Never errors: HTTP,
    /// timeout and decode failures come back inside the outcome.
    pub async fn generate(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> GenerateOutcome {
        self.generate_inner(model, prompt, None, timeout).await
    }

    /// Generation with an attached image (for vision models).
    pub async fn generate_with_image(
        &self,
        model: &str,
        prompt: &str,
        image_base64: &str,
        timeout: Duration,
    ) -> GenerateOutcome {
        self.generate_inner(model, prompt, Some(vec![image_base64.to_string()]), timeout)
            .await
    }

    /// Try each candidate model in order until one returns a complete,
    /// error-free outcome. A failed call and a truncated (`done: false`)
    /// reply both move on to the next candidate; the last attempt's
    /// outcome is returned when every candidate fails.
    pub async fn generate_with_fallbacks(
        &self,
        candidates: &[String],
        prompt: &str,
        timeout: Duration,
    ) -> GenerateOutcome {
        self.generate_candidates(candidates, prompt, None, timeout).await
    }

    /// [`Self::generate_with_fallbacks`] with an attached image.
    pub async fn generate_with_image_fallbacks(
        &self,
        candidates: &[String],
        prompt: &str,
        image_base64: &str,
        timeout: Duration,
    ) -> GenerateOutcome {
        self.generate_candidates(
            candidates,
            prompt,
            Some(vec![image_base64.to_string()]),
            timeout,
        )
        .await
    }

    async fn generate_candidates(
        &self,
        candidates: &[String],
        prompt: &str,
        images: Option<Vec<String>>,
        timeout: Duration,
    ) -> GenerateOutcome {
        let mut last = GenerateOutcome::failure("", "no models configured".to_string());
        for model in candidates {
            let outcome = self
                .generate_inner(model, prompt, images.clone(), timeout)
                .await;
            if outcome.error.is_none() && outcome.done {
                return outcome;
            }
            warn!(
                model,
                error = outcome.error.as_deref().unwrap_or("truncated reply"),
                "model attempt failed, trying next candidate"
            );
            last = outcome;
        }
        last
    }

    async fn generate_inner(
        &self,
        model: &str,
        prompt: &str,
        images: Option<Vec<String>>,
        timeout: Duration,
    ) -> GenerateOutcome {
        let url = format!("{}/api/generate", self.base_url);

        let request = GenerateRequest {
            model: model.to_string(),
            prompt: prompt.to_string(),
            stream: false,
            images,
        };

        debug!(model, prompt_len = prompt.len(), "sending request to Ollama");

        let response = match self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                let kind = if e.is_timeout() { "timeout" } else { "request failed" };
                return GenerateOutcome::failure(model, format!("{kind}: {e}"));
            }
        };

        if !response.status().is_success() {
            return GenerateOutcome::failure(
                model,
                format!("Ollama returned status {}", response.status()),
            );
        }

        match response.json::<GenerateResponse>().await {
            Ok(result) => GenerateOutcome {
                text: result.response,
                model: model.to_string(),
                done: result.done,
                error: None,
            },
            Err(e) => GenerateOutcome::failure(model, format!("bad response body: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_normalization() {
        let client = OllamaClient::new("http://localhost:11434/api/generate/").unwrap();
        assert_eq!(client.base_url, "http://localhost:11434");
        let client = OllamaClient::new("http://box:11434").unwrap();
        assert_eq!(client.base_url, "http://box:11434");
    }

    #[test]
    fn test_failure_outcome() {
        let outcome = GenerateOutcome::failure("m", "timeout: deadline".to_string());
        assert!(!outcome.is_ok());
        assert!(outcome.text.is_empty());
        assert!(!outcome.done);
    }

    #[tokio::test]
    async fn test_generate_against_dead_server_fails_as_value() {
        // Nothing listens on the discard port.
        let client = OllamaClient::new("http://127.0.0.1:9").unwrap();
        let outcome = client
            .generate("llama3.2:3b", "hi", Duration::from_millis(300))
            .await;
        assert!(outcome.error.is_some());
    }

    #[test]
    fn test_model_candidates_primary_first_deduplicated() {
        let fallbacks = vec!["b".to_string(), "a".to_string(), "c".to_string()];
        assert_eq!(model_candidates("a", &fallbacks), vec!["a", "b", "c"]);
        assert_eq!(model_candidates("x", &[]), vec!["x"]);
    }

    #[tokio::test]
    async fn test_generate_with_fallbacks_tries_every_candidate() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        // Accepts and immediately drops every connection, so each model
        // attempt fails with a closed connection.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        tokio::spawn(async move {
            loop {
                let Ok((sock, _)) = listener.accept().await else { break };
                counter.fetch_add(1, Ordering::SeqCst);
                drop(sock);
            }
        });

        let client = OllamaClient::new(&format!("http://{addr}")).unwrap();
        let candidates = model_candidates("primary", &["fb-one".to_string(), "fb-two".to_string()]);
        let outcome = client
            .generate_with_fallbacks(&candidates, "hi", Duration::from_secs(5))
            .await;

        assert!(outcome.error.is_some());
        assert_eq!(outcome.model, "fb-two");
        assert!(hits.load(Ordering::SeqCst) >= 3, "every candidate should be attempted");
    }
}
