// Engine Configuration
//
// Defines configuration for matching thresholds, orchestration penalties,
// learning cadences, and Oracle transport settings. The core constants
// (85/70 match thresholds, 0.7 disagreement penalty, 0.9/0.1 EMA weights)
// live here as tunables rather than hard-coded contracts.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Accuracy prior assigned to scenarios that have no feedback history yet.
/// Below "trusted", above the review threshold.
pub const DEFAULT_INITIAL_ACCURACY: f32 = 65.0;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThemisConfig {
    /// Scenario matcher thresholds
    pub matcher: MatcherConfig,

    /// Classifier orchestrator settings
    pub classifier: ClassifierConfig,

    /// Learning tier cadences and thresholds
    pub learning: LearningConfig,

    /// Oracle transport settings
    pub oracle: OracleConfig,
}

/// Scenario matcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatcherConfig {
    /// Scores at or above this are a MATCH (0-100)
    pub match_threshold: u8,

    /// Scores in [ambiguous_threshold, match_threshold) are AMBIGUOUS
    pub ambiguous_threshold: u8,

    /// Alternatives returned for an ambiguous outcome
    pub ambiguous_top_k: usize,
}

/// Classifier orchestrator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifierConfig {
    /// Confidence multiplier applied when validation disagrees with the
    /// primary result by more than one enum step
    pub disagreement_penalty: f32,

    /// Run the second validation pass against the matched scenario
    pub validation_pass: bool,

    /// Minimum description length in characters
    pub min_description_len: usize,

    /// Maximum description length in characters
    pub max_description_len: usize,
}

/// Learning pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LearningConfig {
    /// Feedback items per Pattern Analyzer batch
    pub pattern_batch_size: u64,

    /// Feedback items per Deep Optimizer batch
    pub deep_batch_size: u64,

    /// EMA weight on the previous accuracy value
    pub ema_retain: f32,

    /// Correction rate above which a cluster yields a rule proposal
    pub correction_rate_threshold: f32,

    /// Rules at or above this confidence are auto-applied
    pub auto_apply_confidence: f32,

    /// Scenarios below this accuracy are flagged for Deep Optimizer review
    pub review_accuracy_threshold: f32,

    /// Accuracy prior for scenarios with no feedback history
    pub initial_accuracy: f32,

    /// Similarity above which two scenarios are near-duplicates
    pub scenario_similarity_threshold: f32,

    /// Shared feedback items required before two scenarios may merge
    pub merge_min_shared_feedback: usize,

    /// Fraction of a scenario's feedback a correction pattern must cover
    /// to justify a split
    pub split_pattern_share: f32,

    /// Confidence multiplier for demoted rules
    pub rule_demotion_factor: f32,
}

/// Oracle transport configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OracleConfig {
    /// Per-call timeout
    #[serde(with = "serde_duration")]
    pub call_timeout: Duration,

    /// Maximum attempts per logical call (first try + retries)
    pub max_attempts: u32,

    /// Base delay for exponential backoff
    #[serde(with = "serde_duration_millis")]
    pub backoff_base: Duration,

    /// TTL for the idempotency cache on classify()
    #[serde(with = "serde_duration")]
    pub cache_ttl: Duration,

    /// Entries kept in the idempotency cache
    pub cache_capacity: usize,

    /// Model identifier for the shipped Anthropic oracle
    pub model: String,

    /// Max tokens for Oracle responses
    pub max_tokens: usize,
}

// Custom serde module for Duration (serialize/deserialize as seconds)
mod serde_duration {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

// Custom serde module for Duration (serialize/deserialize as milliseconds)
mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

impl Default for ThemisConfig {
    fn default() -> Self {
        Self {
            matcher: MatcherConfig {
                match_threshold: 85,
                ambiguous_threshold: 70,
                ambiguous_top_k: 3,
            },
            classifier: ClassifierConfig {
                disagreement_penalty: 0.7,
                validation_pass: true,
                min_description_len: 10,
                max_description_len: 5000,
            },
            learning: LearningConfig {
                pattern_batch_size: 10,
                deep_batch_size: 50,
                ema_retain: 0.9,
                correction_rate_threshold: 0.5,
                auto_apply_confidence: 0.8,
                review_accuracy_threshold: 50.0,
                initial_accuracy: DEFAULT_INITIAL_ACCURACY,
                scenario_similarity_threshold: 0.8,
                merge_min_shared_feedback: 3,
                split_pattern_share: 0.3,
                rule_demotion_factor: 0.8,
            },
            oracle: OracleConfig {
                call_timeout: Duration::from_secs(8),
                max_attempts: 3,
                backoff_base: Duration::from_millis(200),
                cache_ttl: Duration::from_secs(120),
                cache_capacity: 1024,
                model: "claude-3-5-haiku-20241022".to_string(),
                max_tokens: 1024,
            },
        }
    }
}

impl ThemisConfig {
    /// Load configuration from TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Load configuration from TOML string
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let config: ThemisConfig = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.matcher.ambiguous_threshold >= self.matcher.match_threshold {
            return Err(ConfigError::ValidationError(
                "matcher: ambiguous_threshold must be below match_threshold".to_string(),
            ));
        }
        if self.matcher.match_threshold > 100 {
            return Err(ConfigError::ValidationError(
                "matcher: match_threshold must be at most 100".to_string(),
            ));
        }
        if self.matcher.ambiguous_top_k == 0 {
            return Err(ConfigError::ValidationError(
                "matcher: ambiguous_top_k must be at least 1".to_string(),
            ));
        }

        if !(0.0..=1.0).contains(&self.classifier.disagreement_penalty) {
            return Err(ConfigError::ValidationError(
                "classifier: disagreement_penalty must be in [0, 1]".to_string(),
            ));
        }
        if self.classifier.min_description_len >= self.classifier.max_description_len {
            return Err(ConfigError::ValidationError(
                "classifier: min_description_len must be below max_description_len".to_string(),
            ));
        }

        if self.learning.pattern_batch_size == 0 {
            return Err(ConfigError::ValidationError(
                "learning: pattern_batch_size must be at least 1".to_string(),
            ));
        }
        if self.learning.deep_batch_size % self.learning.pattern_batch_size != 0 {
            return Err(ConfigError::ValidationError(
                "learning: deep_batch_size must be a multiple of pattern_batch_size".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.learning.ema_retain) {
            return Err(ConfigError::ValidationError(
                "learning: ema_retain must be in [0, 1)".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.learning.auto_apply_confidence) {
            return Err(ConfigError::ValidationError(
                "learning: auto_apply_confidence must be in [0, 1]".to_string(),
            ));
        }

        if self.oracle.max_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "oracle: max_attempts must be at least 1".to_string(),
            ));
        }
        if self.oracle.call_timeout < Duration::from_millis(100) {
            return Err(ConfigError::ValidationError(
                "oracle: call_timeout must be at least 100ms".to_string(),
            ));
        }
        if self.oracle.cache_capacity == 0 {
            return Err(ConfigError::ValidationError(
                "oracle: cache_capacity must be at least 1".to_string(),
            ));
        }

        Ok(())
    }

    /// Save configuration to TOML file
    pub fn to_file(&self, path: &Path) -> Result<(), ConfigError> {
        let toml_str =
            toml::to_string_pretty(self).map_err(|e| ConfigError::ValidationError(e.to_string()))?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }
}
