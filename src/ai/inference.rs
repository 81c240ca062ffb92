//! Inference boundary and the Ollama client

use crate::config::AiConfig;
use async_trait::async_trait;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

const SYSTEM_PROMPT: &str = "You are an expert web scraper. You analyze HTML and return CSS \
selectors for business contact fields. Reply with JSON only.";

/// What is sent to the model
#[derive(Debug, Clone, Default)]
pub struct InferenceRequest {
    /// Simplified page content
    pub content: String,
    /// PNG screenshot, sent only in visual mode
    pub screenshot: Option<Vec<u8>>,
    pub instruction: String,
}

/// Errors that can occur while calling the model
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("inference timed out after {0:?}")]
    Timeout(Duration),

    #[error("inference request failed: {0}")]
    Transport(String),

    #[error("inference server returned HTTP {0}")]
    Status(u16),

    #[error("malformed inference response: {0}")]
    Malformed(String),
}

/// A language model that answers a request with text
#[async_trait]
pub trait InferenceClient: Send + Sync {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError>;
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: String,
    system: &'a str,
    stream: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    images: Vec<String>,
    options: GenerateOptions,
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    num_predict: u32,
}

#[derive(Deserialize)]
struct GenerateResponse {
    response: String,
}

/// Client for a local Ollama server's `/api/generate` endpoint
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OllamaClient {
    pub fn new(config: &AiConfig) -> Result<Self, InferenceError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| InferenceError::Transport(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/generate", config.host.trim_end_matches('/')),
            model: config.model.clone(),
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            timeout,
        })
    }
}

#[async_trait]
impl InferenceClient for OllamaClient {
    async fn infer(&self, request: &InferenceRequest) -> Result<String, InferenceError> {
        let images = request
            .screenshot
            .iter()
            .map(|png| base64::engine::general_purpose::STANDARD.encode(png))
            .collect();

        let body = GenerateRequest {
            model: &self.model,
            prompt: format!("{}\n\nHTML:\n{}", request.instruction, request.content),
            system: SYSTEM_PROMPT,
            stream: false,
            images,
            options: GenerateOptions {
                temperature: self.temperature,
                num_predict: self.max_tokens,
            },
        };

        debug!("Calling {} with model {}", self.endpoint, self.model);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    InferenceError::Timeout(self.timeout)
                } else {
                    InferenceError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(InferenceError::Status(status.as_u16()));
        }

        let reply: GenerateResponse = response.json().await.map_err(|e| {
            if e.is_timeout() {
                InferenceError::Timeout(self.timeout)
            } else {
                InferenceError::Malformed(e.to_string())
            }
        })?;

        Ok(reply.response)
    }
}
