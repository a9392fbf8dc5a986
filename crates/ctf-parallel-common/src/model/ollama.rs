//! Ollama native chat transport. Missing `prompt_eval_count` is counted as 0 input
//! tokens rather than treated as an error.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ModelError;

use super::{Message, Role, Transport};

pub struct OllamaTransport {
    client: reqwest::Client,
    base_url: String,
    model: String,
    temperature: f64,
    top_p: f64,
}

impl OllamaTransport {
    pub fn new(base_url: String, model: String, temperature: f64, top_p: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            model,
            temperature,
            top_p,
        }
    }
}

fn role_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
    }
}

#[async_trait]
impl Transport for OllamaTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let payload = json!({
            "model": self.model,
            "stream": false,
            "messages": messages.iter().map(|m| json!({
                "role": role_str(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "options": {
                "temperature": self.temperature,
                "top_p": self.top_p,
            },
        });

        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url.trim_end_matches('/')))
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;

        let text = body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ModelError::MalformedResponse("missing message.content".into()))?
            .to_string();

        let input_tokens = body.get("prompt_eval_count").and_then(|v| v.as_u64()).unwrap_or(0);
        let output_tokens = body.get("eval_count").and_then(|v| v.as_u64()).unwrap_or(0);

        Ok((text, input_tokens, output_tokens))
    }
}
