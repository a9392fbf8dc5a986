//! Model Client Abstraction: a uniform `query(history) -> text` over six backend
//! families, with one retry policy, one response-cleaning pipeline, and one cost
//! accountant shared by every provider.

pub mod anthropic;
pub mod bedrock;
pub mod cleaning;
pub mod local;
pub mod ollama;
pub mod openai;
pub mod together;

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::error::ModelError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

/// Per-model-client stats, additive across calls.
#[derive(Debug, Clone, Default)]
pub struct ApiStats {
    pub total_cost: f64,
    pub instance_cost: f64,
    pub tokens_sent: u64,
    pub tokens_received: u64,
    pub api_calls: u64,
}

impl ApiStats {
    pub fn add(&mut self, other: &ApiStats) {
        self.total_cost += other.total_cost;
        self.instance_cost += other.instance_cost;
        self.tokens_sent += other.tokens_sent;
        self.tokens_received += other.tokens_received;
        self.api_calls += other.api_calls;
    }
}

/// Per-token pricing for one model; used to turn a call's token counts into a cost.
#[derive(Debug, Clone, Copy)]
pub struct Pricing {
    pub rate_in: f64,
    pub rate_out: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CostLimits {
    pub per_instance_cost_limit: f64,
    pub total_cost_limit: f64,
}

/// The thin per-provider adapter. Each provider implements exactly this; `ModelClient`
/// supplies everything else (retry, cleaning, accounting).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn submit(&self, messages: &[Message]) -> Result<(String, u64, u64), ModelError>;
}

const MAX_RETRIES: u32 = 10;
const MAX_RESAMPLES: u32 = 10;

pub struct ModelClient {
    transport: Box<dyn Transport>,
    pricing: Pricing,
    limits: CostLimits,
    stats: ApiStats,
    dedupe: bool,
    seen_responses: std::collections::HashSet<String>,
}

impl ModelClient {
    pub fn new(transport: Box<dyn Transport>, pricing: Pricing, limits: CostLimits, dedupe: bool) -> Self {
        Self {
            transport,
            pricing,
            limits,
            stats: ApiStats::default(),
            dedupe,
            seen_responses: std::collections::HashSet::new(),
        }
    }

    pub fn stats(&self) -> &ApiStats {
        &self.stats
    }

    pub async fn query(&mut self, history: &[Message]) -> Result<String, ModelError> {
        for attempt in 0..MAX_RESAMPLES.max(1) {
            let text = self.query_with_retry(history).await?;
            if !self.dedupe || self.seen_responses.insert(text.clone()) {
                return Ok(text);
            }
            log::debug!("duplicate model response on resample {attempt}, resampling");
        }
        // Duplicate guard exhausted its resample budget: accept the last (duplicate) value
        // rather than failing the attempt over a non-fatal quirk.
        self.query_with_retry(history).await
    }

    async fn query_with_retry(&mut self, history: &[Message]) -> Result<String, ModelError> {
        let mut last_err = None;
        for attempt in 0..MAX_RETRIES {
            match self.transport.submit(history).await {
                Ok((raw, input_tokens, output_tokens)) => {
                    let cleaned = cleaning::clean(&raw);
                    self.record_usage(input_tokens, output_tokens)?;
                    return Ok(cleaned);
                }
                Err(err) => {
                    if !is_retryable(&err) {
                        return Err(err);
                    }
                    let backoff = backoff_delay(attempt);
                    log::warn!("model query failed (attempt {attempt}), retrying in {backoff:?}: {err}");
                    tokio::time::sleep(backoff).await;
                    last_err = Some(err);
                }
            }
        }
        Err(ModelError::RetriesExhausted {
            attempts: MAX_RETRIES,
            source: Box::new(last_err.expect("loop ran at least once")),
        })
    }

    fn record_usage(&mut self, input_tokens: u64, output_tokens: u64) -> Result<(), ModelError> {
        let cost = input_tokens as f64 * self.pricing.rate_in + output_tokens as f64 * self.pricing.rate_out;
        self.stats.tokens_sent += input_tokens;
        self.stats.tokens_received += output_tokens;
        self.stats.instance_cost += cost;
        self.stats.total_cost += cost;
        self.stats.api_calls += 1;

        if self.limits.per_instance_cost_limit > 0.0 && self.stats.instance_cost >= self.limits.per_instance_cost_limit
        {
            return Err(ModelError::CostLimitExceeded {
                instance_cost: self.stats.instance_cost,
                total_cost: self.stats.total_cost,
            });
        }
        if self.limits.total_cost_limit > 0.0 && self.stats.total_cost >= self.limits.total_cost_limit {
            return Err(ModelError::CostLimitExceeded {
                instance_cost: self.stats.instance_cost,
                total_cost: self.stats.total_cost,
            });
        }
        Ok(())
    }
}

fn is_retryable(err: &ModelError) -> bool {
    !matches!(
        err,
        ModelError::CostLimitExceeded { .. } | ModelError::ContextWindowExceeded
    )
}

/// Exponential backoff with full jitter, matching the source's `tenacity`
/// `wait_random_exponential` usage: `random(0, min(cap, base * 2^attempt))`.
fn backoff_delay(attempt: u32) -> Duration {
    let cap = 60.0_f64;
    let base = 1.0_f64;
    let max = (base * 2f64.powi(attempt as i32)).min(cap);
    let jittered = rand::thread_rng().gen_range(0.0..=max);
    Duration::from_secs_f64(jittered)
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FlakyTransport {
        failures_left: std::sync::atomic::AtomicU32,
    }

    #[async_trait]
    impl Transport for FlakyTransport {
        async fn submit(&self, _messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
            if self.failures_left.fetch_sub(1, std::sync::atomic::Ordering::SeqCst) > 0 {
                return Err(ModelError::MalformedResponse("transient".into()));
            }
            Ok(("  hello </think> world  ".into(), 10, 5))
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds_and_cleans_and_accounts() {
        let transport = FlakyTransport {
            failures_left: std::sync::atomic::AtomicU32::new(2),
        };
        let mut client = ModelClient::new(
            Box::new(transport),
            Pricing {
                rate_in: 0.01,
                rate_out: 0.02,
            },
            CostLimits {
                per_instance_cost_limit: 0.0,
                total_cost_limit: 0.0,
            },
            false,
        );
        let out = client.query(&[]).await.unwrap();
        assert_eq!(out, "world");
        assert_eq!(client.stats().api_calls, 1);
        assert_eq!(client.stats().tokens_sent, 10);
    }

    struct AlwaysOverBudget;

    #[async_trait]
    impl Transport for AlwaysOverBudget {
        async fn submit(&self, _messages: &[Message]) -> Result<(String, u64, u64), ModelError> {
            Ok(("ok".into(), 1000, 1000))
        }
    }

    #[tokio::test]
    async fn cost_limit_breach_is_not_retried() {
        let mut client = ModelClient::new(
            Box::new(AlwaysOverBudget),
            Pricing {
                rate_in: 1.0,
                rate_out: 1.0,
            },
            CostLimits {
                per_instance_cost_limit: 1.0,
                total_cost_limit: 0.0,
            },
            false,
        );
        let err = client.query(&[]).await.unwrap_err();
        assert!(matches!(err, ModelError::CostLimitExceeded { .. }));
    }
}
