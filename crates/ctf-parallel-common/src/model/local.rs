//! Local-only stub transports used for testing: Replay (feeds back a canned sequence of
//! responses), Human (feeds a single fixed operator-supplied response), and
//! InstantEmptySubmit (always submits immediately with no action).

use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::ModelError;

use super::{Message, Transport};

pub struct ReplayTransport {
    responses: Mutex<std::collections::VecDeque<String>>,
}

impl ReplayTransport {
    pub fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

#[async_trait]
impl Transport for ReplayTransport {
    async fn submit(&self, _messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        let mut queue = self.responses.lock().expect("replay transport poisoned");
        let text = queue
            .pop_front()
            .ok_or_else(|| ModelError::MalformedResponse("replay transport exhausted".into()))?;
        Ok((text, 0, 0))
    }
}

pub struct HumanTransport {
    fixed_response: String,
}

impl HumanTransport {
    pub fn new(fixed_response: String) -> Self {
        Self { fixed_response }
    }
}

#[async_trait]
impl Transport for HumanTransport {
    async fn submit(&self, _messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        Ok((self.fixed_response.clone(), 0, 0))
    }
}

pub struct InstantEmptySubmitTransport;

#[async_trait]
impl Transport for InstantEmptySubmitTransport {
    async fn submit(&self, _messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
        Ok(("submit".to_string(), 0, 0))
    }
}
