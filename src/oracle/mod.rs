//! Reasoning Oracle boundary
//!
//! The Oracle is an external black-box reasoning service consumed through
//! the [`ReasoningOracle`] trait: similarity scoring, work item
//! classification, and structured analysis. The contract is latency and
//! availability only; outputs are non-deterministic across calls.
//!
//! Transport concerns live here too: bounded retry with exponential
//! backoff and jitter, and a per-call timeout. Locks are never held
//! across an Oracle call.

pub mod anthropic;

use crate::config::OracleConfig;
use crate::error::{Result, ThemisError};
use crate::types::{Complexity, DimensionResult, Scenario, Size, WorkType};
use async_trait::async_trait;
use rand::Rng;
use std::collections::BTreeMap;
use std::future::Future;
use tracing::{debug, warn};

pub use anthropic::AnthropicOracle;

/// Raw classification returned by the Oracle, before validation
#[derive(Debug, Clone)]
pub struct OracleClassification {
    pub size: DimensionResult<Size>,
    pub complexity: DimensionResult<Complexity>,
    pub work_type: DimensionResult<WorkType>,
}

/// External reasoning service
///
/// Implementations must be safe to call concurrently; the engine issues
/// scoring calls for many scenarios in flight at once.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ReasoningOracle: Send + Sync {
    /// Similarity between a work item description and a scenario, 0-100
    async fn score(&self, description: &str, scenario: &Scenario) -> Result<u8>;

    /// Classify a description given enhanced context
    async fn classify(
        &self,
        description: &str,
        context: &BTreeMap<String, String>,
    ) -> Result<OracleClassification>;

    /// Free-form structured analysis (used by the learning tiers)
    async fn analyze(&self, payload: serde_json::Value) -> Result<serde_json::Value>;
}

/// Run an Oracle call with per-attempt timeout and exponential backoff.
///
/// Transient failures retry up to `max_attempts`; the final failure
/// surfaces as [`ThemisError::OracleUnavailable`]. Non-transient errors
/// (validation, parse) surface immediately without retry.
pub async fn call_with_retry<T, F, Fut>(config: &OracleConfig, label: &str, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_message = String::new();

    for attempt in 1..=config.max_attempts {
        match tokio::time::timeout(config.call_timeout, call()).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) if !err.is_transient() => {
                // Parse and validation failures do not improve on retry
                return Err(err);
            }
            Ok(Err(err)) => {
                warn!("Oracle {} attempt {} failed: {}", label, attempt, err);
                last_message = err.to_string();
            }
            Err(_) => {
                warn!(
                    "Oracle {} attempt {} timed out after {:?}",
                    label, attempt, config.call_timeout
                );
                last_message = format!("timed out after {:?}", config.call_timeout);
            }
        }

        if attempt < config.max_attempts {
            let backoff = config.backoff_base * 2u32.saturating_pow(attempt - 1);
            let jitter_ms = rand::thread_rng().gen_range(0..=backoff.as_millis() as u64 / 2 + 1);
            let delay = backoff + std::time::Duration::from_millis(jitter_ms);
            debug!("Retrying Oracle {} in {:?}", label, delay);
            tokio::time::sleep(delay).await;
        }
    }

    Err(ThemisError::OracleUnavailable {
        attempts: config.max_attempts,
        message: last_message,
    })
}
