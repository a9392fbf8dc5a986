//! Together transport: serializes `history` into a single `<human>/<bot>:` prompt and
//! stops generation at the next `<human>` turn.

use async_trait::async_trait;
use serde_json::json;

use crate::error::ModelError;

use super::{Message, Role, Transport};

const STOP_TOKEN: &str = "<human>";

pub struct TogetherTransport {
    client: reqwest::Client,
    api_key: String,
    model: String,
    temperature: f64,
    top_p: f64,
    max_tokens: u32,
}

impl TogetherTransport {
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

pub fn serialize_prompt(messages: &[Message]) -> String {
    let mut prompt = String::new();
    for m in messages {
        match m.role {
            Role::System => {
                prompt.push_str(&m.content);
                prompt.push('\n');
            }
            Role::User => {
                prompt.push_str("<human>: ");
                prompt.push_str(&m.content);
                prompt.push('\n');
            }
            Role::Assistant => {
                prompt.push_str("<bot>: ");
                prompt.push_str(&m.content);
                prompt.push('\n');
            }
        }
    }
    prompt.push_str("<bot>:");
    prompt
}

#[async_trait]
impl Transport for TogetherTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let prompt = serialize_prompt(messages);

        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "temperature": self.temperature,
            "top_p": self.top_p,
            "max_tokens": self.max_tokens,
            "stop": [STOP_TOKEN],
        });

        let resp = self
            .client
            .post("https://api.together.xyz/v1/completions")
            .bearer_auth(&self.api_key)
            .json(&payload)
            .send()
            .await?;

        let body: serde_json::Value = resp.json().await?;

        let text = body
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("text"))
            .and_then(|t| t.as_str())
            .ok_or_else(|| ModelError::MalformedResponse("missing choices[0].text".into()))?
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_human_bot_prompt() {
        let messages = vec![
            Message {
                role: Role::System,
                content: "be terse".into(),
            },
            Message {
                role: Role::User,
                content: "hi".into(),
            },
        ];
        let prompt = serialize_prompt(&messages);
        assert_eq!(prompt, "be terse\n<human>: hi\n<bot>:");
    }
}
