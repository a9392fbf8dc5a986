//! Bedrock-hosted transports, built on the Bedrock Converse API. Two adapters share the
//! same client because the source distinguishes Anthropic-on-Bedrock (history collapsing
//! identical to the native Anthropic transport) from other Bedrock models like
//! DeepSeek (skip empty messages outright, substitute a default user turn if the
//! resulting list would be empty).

use async_trait::async_trait;
use aws_sdk_bedrockruntime::types::{ContentBlock, ConversationRole, Message as BedrockMessage, SystemContentBlock};
use aws_sdk_bedrockruntime::Client;

use crate::error::ModelError;

use super::{anthropic::prepare_history, Message, Role, Transport};

const DEFAULT_USER_TURN: &str = "Please continue.";

/// Resolves AWS credentials through the standard chain (env vars, the profile, IMDS)
/// matching `ISENGARD_PRODUCTION_ACCOUNT`'s own env-var-forwarding convention on the
/// launcher side — this is the one place in the model layer that actually touches AWS
/// configuration rather than just the Bedrock Converse API surface.
pub async fn default_client() -> Client {
    let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
    Client::new(&config)
}

fn role_of(role: Role) -> ConversationRole {
    match role {
        Role::Assistant => ConversationRole::Assistant,
        _ => ConversationRole::User,
    }
}

fn extract_text_and_usage(
    output: aws_sdk_bedrockruntime::operation::converse::ConverseOutput,
) -> Result<(String, u64, u64), ModelError> {
    let message = output
        .output
        .and_then(|o| o.as_message().ok().cloned())
        .ok_or_else(|| ModelError::MalformedResponse("bedrock converse returned no message".into()))?;

    let text = message
        .content
        .iter()
        .filter_map(|b| b.as_text().ok())
        .cloned()
        .collect::<Vec<_>>()
        .join("");

    let (input_tokens, output_tokens) = output
        .usage
        .map(|u| (u.input_tokens.max(0) as u64, u.output_tokens.max(0) as u64))
        .unwrap_or((0, 0));

    Ok((text, input_tokens, output_tokens))
}

pub struct BedrockAnthropicTransport {
    client: Client,
    model_id: String,
}

impl BedrockAnthropicTransport {
    pub fn new(client: Client, model_id: String) -> Self {
        Self { client, model_id }
    }
}

#[async_trait]
impl Transport for BedrockAnthropicTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let (system, turns) = prepare_history(messages);

        let mut request = self.client.converse().model_id(&self.model_id);
        if let Some(system) = system {
            request = request.system(SystemContentBlock::Text(system));
        }
        for (role, content) in turns {
            let msg = BedrockMessage::builder()
                .role(role_of(role))
                .content(ContentBlock::Text(content))
                .build()
                .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
            request = request.messages(msg);
        }

        let output = request
            .send()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        extract_text_and_usage(output)
    }
}

pub struct BedrockConverseTransport {
    client: Client,
    model_id: String,
}

impl BedrockConverseTransport {
    pub fn new(client: Client, model_id: String) -> Self {
        Self { client, model_id }
    }
}

#[async_trait]
impl Transport for BedrockConverseTransport {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let mut request = self.client.converse().model_id(&self.model_id);

        let mut any = false;
        for m in messages {
            if m.role == Role::System || m.content.trim().is_empty() {
                continue;
            }
            let msg = BedrockMessage::builder()
                .role(role_of(m.role))
                .content(ContentBlock::Text(m.content.clone()))
                .build()
                .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
            request = request.messages(msg);
            any = true;
        }
        if !any {
            let msg = BedrockMessage::builder()
                .role(ConversationRole::User)
                .content(ContentBlock::Text(DEFAULT_USER_TURN.to_string()))
                .build()
                .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;
            request = request.messages(msg);
        }

        let output = request
            .send()
            .await
            .map_err(|e| ModelError::MalformedResponse(e.to_string()))?;

        extract_text_and_usage(output)
    }
}
