use reqwest::blocking::Client;
use serde_json::{json, Value};
use std::env;
use std::time::Duration;

use crate::data::{CompletionService, EmbeddingService, ServiceError};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_EMBED_MODEL: &str = "text-embedding-3-small";
const REQUEST_TIMEOUT_SECS: u64 = 120;

/// OpenAI-compatible implementation of the completion and embedding
/// service traits, talking to `/chat/completions` and `/embeddings` over
/// blocking HTTP.
///
/// Configuration comes from the environment: `OPENAI_API_KEY` (required),
/// `OPENAI_BASE_URL`, `OPENAI_MODEL` and `OPENAI_EMBED_MODEL` (optional,
/// with OpenAI defaults). Any OpenAI-compatible endpoint works through
/// `OPENAI_BASE_URL`.
#[derive(Clone)]
pub struct OpenAiClient {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    embed_model: String,
}

impl OpenAiClient {
    pub fn new(
        api_key: String,
        base_url: Option<String>,
        model: Option<String>,
        embed_model: Option<String>,
    ) -> Result<Self, ServiceError> {
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingCredentials(
                "API key is empty".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| ServiceError::Transport(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            base_url: base_url
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            embed_model: embed_model.unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
        })
    }

    pub fn from_env() -> Result<Self, ServiceError> {
        let api_key = env::var("OPENAI_API_KEY").map_err(|_| {
            ServiceError::MissingCredentials("OPENAI_API_KEY is not set".to_string())
        })?;
        Self::new(
            api_key,
            env::var("OPENAI_BASE_URL").ok(),
            env::var("OPENAI_MODEL").ok(),
            env::var("OPENAI_EMBED_MODEL").ok(),
        )
    }

    /// Model name, used to scope the response cache.
    pub fn model(&self) -> &str {
        &self.model
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .map_err(|e| ServiceError::Transport(format!("POST {} failed: {}", url, e)))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().unwrap_or_default();
            return Err(ServiceError::Transport(format!(
                "POST {} returned {}: {}",
                url,
                status,
                detail.chars().take(500).collect::<String>()
            )));
        }

        response
            .json::<Value>()
            .map_err(|e| ServiceError::InvalidResponse(format!("{} body: {}", url, e)))
    }
}

impl CompletionService for OpenAiClient {
    fn complete(&self, prompt: &str) -> Result<String, ServiceError> {
        let body = json!({
            "model": self.model,
            "messages": [
                {"role": "user", "content": prompt}
            ],
            "temperature": 0,
        });

        let value = self.post("/chat/completions", &body)?;
        value["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                ServiceError::InvalidResponse(
                    "chat completion carried no message content".to_string(),
                )
            })
    }
}

impl EmbeddingService for OpenAiClient {
    fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ServiceError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = json!({
            "model": self.embed_model,
            "input": texts,
        });

        let value = self.post("/embeddings", &body)?;
        let data = value["data"].as_array().ok_or_else(|| {
            ServiceError::InvalidResponse("embedding response carried no data array".to_string())
        })?;

        let mut vectors = Vec::with_capacity(data.len());
        for entry in data {
            let embedding = entry["embedding"].as_array().ok_or_else(|| {
                ServiceError::InvalidResponse("embedding entry is not an array".to_string())
            })?;
            vectors.push(
                embedding
                    .iter()
                    .map(|n| n.as_f64().unwrap_or(0.0) as f32)
                    .collect(),
            );
        }

        Ok(vectors)
    }
}
