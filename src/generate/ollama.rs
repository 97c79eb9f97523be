use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::{json, Value};
use std::thread;
use std::time::Duration;

use super::{GenerationRequest, Generator};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Connection and retry settings for an Ollama server.
#[derive(Clone, Debug)]
pub struct OllamaConfig {
    pub url: String,
    /// Per-request timeout.
    pub timeout: Duration,
    /// Additional attempts after a transient failure. Zero propagates the first failure.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_OLLAMA_URL.to_string(),
            timeout: Duration::from_secs(300),
            max_retries: 0,
            retry_delay: Duration::from_secs(5),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

enum AttemptError {
    /// Transport faults and 5xx responses; worth retrying.
    Transient(anyhow::Error),
    Fatal(anyhow::Error),
}

/// Blocking client for Ollama's `/api/generate` endpoint.
pub struct OllamaClient {
    config: OllamaConfig,
    agent: ureq::Agent,
}

impl OllamaClient {
    pub fn new(config: OllamaConfig) -> Self {
        let agent = ureq::AgentBuilder::new().timeout(config.timeout).build();
        Self { config, agent }
    }

    fn endpoint(&self) -> String {
        format!("{}/api/generate", self.config.url.trim_end_matches('/'))
    }

    fn post_once(&self, payload: &Value) -> std::result::Result<String, AttemptError> {
        let response = match self.agent.post(&self.endpoint()).send_json(payload) {
            Ok(response) => response,
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                let err = anyhow!("ollama returned HTTP {}: {}", code, body.trim());
                return Err(if code >= 500 {
                    AttemptError::Transient(err)
                } else {
                    AttemptError::Fatal(err)
                });
            }
            Err(ureq::Error::Transport(transport)) => {
                return Err(AttemptError::Transient(anyhow!(
                    "ollama transport error: {}",
                    transport
                )));
            }
        };
        let body: GenerateResponse = response
            .into_json()
            .map_err(|e| AttemptError::Fatal(anyhow!("invalid ollama response body: {}", e)))?;
        Ok(body.response)
    }
}

/// Request body for `/api/generate`. Images are read from disk and base64 encoded.
pub fn build_payload(request: &GenerationRequest<'_>) -> Result<Value> {
    let mut payload = json!({
        "model": request.model,
        "prompt": request.prompt,
        "stream": false,
        "options": {
            "temperature": request.temperature,
        },
    });
    if !request.images.is_empty() {
        let encoded = request
            .images
            .iter()
            .map(|path| {
                std::fs::read(path)
                    .map(|bytes| BASE64.encode(bytes))
                    .with_context(|| format!("failed to read image {}", path))
            })
            .collect::<Result<Vec<String>>>()?;
        payload["images"] = json!(encoded);
    }
    Ok(payload)
}

impl Generator for OllamaClient {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn generate(&self, request: &GenerationRequest<'_>) -> Result<String> {
        let payload = build_payload(request)?;
        let mut attempt = 0;
        loop {
            match self.post_once(&payload) {
                Ok(text) => return Ok(text),
                Err(AttemptError::Fatal(err)) => return Err(err),
                Err(AttemptError::Transient(err)) => {
                    if attempt >= self.config.max_retries {
                        return Err(err.context(format!(
                            "ollama request for model {} failed after {} attempt(s)",
                            request.model,
                            attempt + 1
                        )));
                    }
                    attempt += 1;
                    log::warn!(
                        "{}. Retrying in {}s ({}/{})",
                        err,
                        self.config.retry_delay.as_secs(),
                        attempt,
                        self.config.max_retries
                    );
                    thread::sleep(self.config.retry_delay);
                }
            }
        }
    }
}
