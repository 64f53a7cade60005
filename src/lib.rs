//! Themis - Self-Improving Work Item Classification Engine
//!
//! A Rust engine that classifies free-text work items along three
//! dimensions (Size, Complexity, Type) and learns from user feedback:
//! - Scenario matching against a curated reference library
//! - Context enrichment from learned rules
//! - Tiered batch learning (pattern analysis / deep optimization)
//! - Immutable, rollback-capable configuration versions
//!
//! # Architecture
//!
//! The system is organized into several layers:
//! - **Types**: Core data structures (Scenario, ContextRule, records)
//! - **Oracle**: Reasoning Oracle boundary (scoring, classification)
//! - **Storage**: Persistence boundary (records, versions)
//! - **Engine**: Facade wiring matcher, enhancer, orchestrator, and the
//!   feedback-learning pipeline
//!
//! # Example
//!
//! ```ignore
//! use themis_core::{ClassificationEngine, ClassificationRequest, ThemisConfig};
//! use themis_core::oracle::AnthropicOracle;
//! use themis_core::storage::MemoryStorage;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let oracle = Arc::new(AnthropicOracle::with_default()?);
//!     let storage = Arc::new(MemoryStorage::new());
//!     let engine = ClassificationEngine::new(
//!         ThemisConfig::default(),
//!         oracle,
//!         storage,
//!         vec![],
//!     )
//!     .await?;
//!
//!     let record = engine
//!         .classify(ClassificationRequest {
//!             description: "Integrate Google OAuth authentication".to_string(),
//!             context: Default::default(),
//!         })
//!         .await?;
//!
//!     println!("{}/{}/{}",
//!         record.result.size.value,
//!         record.result.complexity.value,
//!         record.result.work_type.value);
//!     Ok(())
//! }
//! ```

pub mod classifier;
pub mod config;
pub mod engine;
pub mod enhancer;
pub mod error;
pub mod feedback;
pub mod learning;
pub mod library;
pub mod logging;
pub mod matcher;
pub mod oracle;
pub mod storage;
pub mod types;
pub mod versioning;

// Re-export commonly used types
pub use config::ThemisConfig;
pub use engine::{ClassificationEngine, ClassificationRequest};
pub use error::{Result, ThemisError};
pub use feedback::FeedbackAck;
pub use oracle::{AnthropicOracle, ReasoningOracle};
pub use storage::{MemoryStorage, StorageBackend};
pub use types::{
    ClassificationId, ClassificationRecord, ClassificationResult, Complexity, ConfigSnapshot,
    ConfigurationVersion, ContextRule, Corrections, Dimension, ExpectedClassification,
    FeedbackRecord, FeedbackType, MatchOutcome, RuleId, Scenario, ScenarioId, Size,
    TriggerCondition, WorkType,
};
