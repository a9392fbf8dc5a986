//! OpenAI-compatible transport: passes `history` straight through as the `messages`
//! field. Also covers local vLLM/Ollama-compat servers that speak the same wire shape,
//! per provider.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ModelError;

use super::{Message, Role, Transport};

pub struct OpenAiTransport {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f64,
    top_p: f64,
}

impl OpenAiTransport {
    pub fn new(base_url: String, api_key: String, model: String, temperature: f64, top_p: f64) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url,
            api_key,
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
impl Transport for OpenAiTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let payload = json!({
            "model": self.model,
            "messages": messages.iter().map(|m| json!({
                "role": role_str(m.role),
                "content": m.content,
            })).collect::<Vec<_>>(),
            "temperature": self.temperature,
            "top_p": self.top_p,
        });

        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;

        if let Some(code) = body
            .get("error")
            .and_then(|e| e.get("code"))
            .and_then(|c| c.as_str())
        {
            if code == "context_length_exceeded" {
                return Err(ModelError::ContextWindowExceeded);
            }
            return Err(ModelError::MalformedResponse(format!("backend error: {code}")));
        }

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].message.content".into()))?
            .to_string();

        let input_tokens = body
            .get("usage")
            .and_then(|u| u.get("prompt_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = body
            .get("usage")
            .and_then(|u| u.get("completion_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok((text, input_tokens, output_tokens))
    }
}
