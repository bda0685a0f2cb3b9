// src/ai/mod.rs

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::config::OllamaConfig;

const DEFAULT_HOST: &str = "http://localhost:11434";

const SYSTEM_PROMPT: &str = "You are an expert email writer. Generate a personalized, \
professional email based on the template and recipient data provided. Maintain the tone and \
structure of the template while personalizing the content. Return only the email content \
without any additional commentary.";

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("ollama error {status}: {body}")]
    Status { status: u16, body: String },

    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Abstraction for any LLM provider that can personalize an email template.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Personalize `template` for one recipient. Failure here is a hard error
    /// for that recipient; callers must not fall back to plain substitution.
    async fn generate_email(
        &self,
        template: &str,
        recipient_data: &HashMap<String, String>,
    ) -> Result<String, LlmError>;

    /// True when the provider is reachable.
    async fn test_connection(&self) -> bool;

    /// True when the configured model is present on the provider.
    async fn check_model_available(&self) -> bool;
}

/// Dynamic LLM client trait object.
pub type DynLlmClient = Arc<dyn LlmClient>;

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<ModelTag>,
}

#[derive(Debug, Deserialize)]
struct ModelTag {
    name: String,
}

/// Ollama-backed client speaking the local HTTP API.
#[derive(Clone)]
pub struct OllamaClient {
    http: Client,
    host: String,
    model: String,
    temperature: f32,
}

impl OllamaClient {
    pub fn from_config(cfg: &OllamaConfig) -> Self {
        Self {
            http: Client::new(),
            host: cfg
                .host
                .clone()
                .unwrap_or_else(|| DEFAULT_HOST.to_string()),
            model: cfg.model.clone(),
            temperature: cfg.temperature,
        }
    }

    fn format_recipient_data(data: &HashMap<String, String>) -> String {
        let mut lines: Vec<String> = data.iter().map(|(k, v)| format!("- {k}: {v}")).collect();
        lines.sort();
        lines.join("\n")
    }

    fn user_prompt(template: &str, data: &HashMap<String, String>) -> String {
        format!(
            "Template:\n{template}\n\nRecipient Data:\n{}\n\nPlease generate a personalized \
             email based on the template above, incorporating the recipient data naturally.",
            Self::format_recipient_data(data)
        )
    }

    async fn list_models(&self) -> Result<Vec<String>, LlmError> {
        let url = format!("{}/api/tags", self.host);
        let response = self.http.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(LlmError::Status {
                status: response.status().as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let tags: TagsResponse = response.json().await?;
        Ok(tags.models.into_iter().map(|m| m.name).collect())
    }
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn generate_email(
        &self,
        template: &str,
        recipient_data: &HashMap<String, String>,
    ) -> Result<String, LlmError> {
        let recipient = recipient_data
            .get("email")
            .map(String::as_str)
            .unwrap_or("unknown");
        info!("Generating email for recipient: {}", recipient);

        let url = format!("{}/api/chat", self.host);
        let body = json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": SYSTEM_PROMPT },
                { "role": "user", "content": Self::user_prompt(template, recipient_data) },
            ],
            "stream": false,
            "options": { "temperature": self.temperature },
        });

        let response = self.http.post(&url).json(&body).send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            error!("Ollama returned {} for {}: {}", status, recipient, body);
            return Err(LlmError::Status { status, body });
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| LlmError::Malformed(e.to_string()))?;

        debug!(
            "Generated email length: {} characters",
            chat.message.content.len()
        );
        Ok(chat.message.content)
    }

    async fn test_connection(&self) -> bool {
        match self.list_models().await {
            Ok(models) => {
                info!(
                    "Ollama connection test successful. Available models: {}",
                    models.len()
                );
                true
            }
            Err(e) => {
                error!("Ollama connection test failed: {}", e);
                false
            }
        }
    }

    async fn check_model_available(&self) -> bool {
        match self.list_models().await {
            Ok(models) => {
                let available = models.iter().any(|name| name.contains(&self.model));
                if !available {
                    warn!(
                        "Model '{}' not found. Available models: {:?}",
                        self.model, models
                    );
                }
                available
            }
            Err(e) => {
                error!("Error checking model availability: {}", e);
                false
            }
        }
    }
}

/// Factory function to build an LLM client from config.
pub fn build_llm_client(cfg: &OllamaConfig) -> DynLlmClient {
    Arc::new(OllamaClient::from_config(cfg))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> OllamaClient {
        OllamaClient::from_config(&OllamaConfig {
            model: "llama2".to_string(),
            host: None,
            temperature: 0.7,
        })
    }

    #[test]
    fn defaults_to_local_host() {
        assert_eq!(client().host, DEFAULT_HOST);
    }

    #[test]
    fn user_prompt_includes_template_and_data() {
        let mut data = HashMap::new();
        data.insert("email".to_string(), "ana@example.com".to_string());
        data.insert("first_name".to_string(), "Ana".to_string());

        let prompt = OllamaClient::user_prompt("Hi $first_name", &data);
        assert!(prompt.contains("Hi $first_name"));
        assert!(prompt.contains("- email: ana@example.com"));
        assert!(prompt.contains("- first_name: Ana"));
    }
}
