//! Anthropic native transport. Collapses consecutive same-role messages, pulls the
//! system prompt out into the dedicated `system` field, and replaces empty message
//! content with `(No output)`.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ModelError;

use super::{Message, Role, Transport};

const NO_OUTPUT_PLACEHOLDER: &str = "(No output)";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct AnthropicTransport {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

impl AnthropicTransport {
    pub fn new(api_key: String, model: String, temperature: f64, top_p: f64, max_tokens: u32) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key,
            model,
            temperature,
            top_p,
            max_tokens,
        }
    }
}

/// Returns `(system_prompt, collapsed_turns)`.
pub fn prepare_history(messages: &[Message]) -> (Option<String>, Vec<(Role, String)>) {
    let mut system = None;
    let mut collapsed: Vec<(Role, String)> = Vec::new();

    for m in messages {
        if m.role == Role::System {
            system = Some(match system {
                Some(existing) => format!("{existing}\n{}", m.content),
                None => m.content.clone(),
            });
            continue;
        }
        let content = if m.content.trim().is_empty() {
            NO_OUTPUT_PLACEHOLDER.to_string()
        } else {
            m.content.clone()
        };
        match collapsed.last_mut() {
            Some((role, text)) if *role == m.role => {
                text.push('\n');
                text.push_str(&content);
            }
            _ => collapsed.push((m.role, content)),
        }
    }

    (system, collapsed)
}

#[async_trait]
impl Transport for AnthropicTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let (system, turns) = prepare_history(messages);

        let mut payload = json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "messages": turns.iter().map(|(role, content)| json!({
                "role": if *role == Role::Assistant { "assistant" } else { "user" },
                "content": content,
            })).collect::<Vec<_>>(),
        });
        if let Some(system) = system {
            payload["system"] = json!(system);
        }

        let resp = self
            .client
            .post("https://api.anthropic.com/v1/messages")
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;

        if let Some(kind) = body.get("error").and_then(|e| e.get("type")).and_then(|t| t.as_str()) {
            if kind == "invalid_request_error"
                && body
                    .get("error")
                    .and_then(|e| e.get("message"))
                    .and_then(|m| m.as_str())
                    .is_some_and(|m| m.contains("context"))
            {
                return Err(ModelError::ContextWindowExceeded);
            }
            return Err(ModelError::MalformedResponse(format!("backend error: {kind}")));
        }

        let text = body
            .get("content")
            .and_then(|c| c.as_array())
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                    .collect::<Vec<_>>()
                    .join("")
            })
            .ok_or_else(|| ModelError::MalformedResponse("missing content blocks".into()))?;

        let input_tokens = body
            .get("usage")
            .and_then(|u| u.get("input_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);
        let output_tokens = body
            .get("usage")
            .and_then(|u| u.get("output_tokens"))
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        Ok((text, input_tokens, output_tokens))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_consecutive_same_role_and_extracts_system() {
        let messages = vec![
            Message {
                role: Role::System,
                content: "be terse".into(),
            },
            Message {
                role: Role::User,
                content: "hi".into(),
            },
            Message {
                role: Role::User,
                content: "there".into(),
            },
            Message {
                role: Role::Assistant,
                content: "".into(),
            },
        ];
        let (system, turns) = prepare_history(&messages);
        assert_eq!(system.as_deref(), Some("be terse"));
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].1, "hi\nthere");
        assert_eq!(turns[1].1, NO_OUTPUT_PLACEHOLDER);
    }
}
