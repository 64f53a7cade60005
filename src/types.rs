//! Core data types for the Themis classification engine
//!
//! This module defines the fundamental data structures used throughout themis,
//! including scenarios, context rules, classification records, feedback, and
//! configuration snapshots. These types form the foundation of the
//! self-improving classification system.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for scenarios
///
/// Wraps a UUID to provide type safety and prevent mixing scenario IDs
/// with other UUID-based identifiers in the system. Ordering (via the
/// string form) is used for deterministic tie-breaking in the matcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioId(pub Uuid);

impl ScenarioId {
    /// Create a new random scenario ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a scenario ID from a string
    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ScenarioId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for classification records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassificationId(pub Uuid);

impl ClassificationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for ClassificationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ClassificationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for feedback records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeedbackId(pub Uuid);

impl FeedbackId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FeedbackId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for FeedbackId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for context rules
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RuleId(pub Uuid);

impl RuleId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RuleId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RuleId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Work item size estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Size {
    Xs,
    S,
    M,
    L,
    Xl,
    Xxl,
}

impl Size {
    /// All variants in ascending order
    pub const ALL: [Size; 6] = [Size::Xs, Size::S, Size::M, Size::L, Size::Xl, Size::Xxl];

    /// Position on the ordered scale, for enum-step distance
    pub fn step(&self) -> usize {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Size::Xs => "XS",
            Size::S => "S",
            Size::M => "M",
            Size::L => "L",
            Size::Xl => "XL",
            Size::Xxl => "XXL",
        }
    }
}

impl FromStr for Size {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "XS" => Ok(Size::Xs),
            "S" => Ok(Size::S),
            "M" => Ok(Size::M),
            "L" => Ok(Size::L),
            "XL" => Ok(Size::Xl),
            "XXL" => Ok(Size::Xxl),
            other => Err(format!("Unknown size: {}", other)),
        }
    }
}

impl std::fmt::Display for Size {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work item complexity estimate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Complexity {
    Low,
    Medium,
    High,
    Critical,
}

impl Complexity {
    pub const ALL: [Complexity; 4] = [
        Complexity::Low,
        Complexity::Medium,
        Complexity::High,
        Complexity::Critical,
    ];

    pub fn step(&self) -> usize {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Complexity::Low => "Low",
            Complexity::Medium => "Medium",
            Complexity::High => "High",
            Complexity::Critical => "Critical",
        }
    }
}

impl FromStr for Complexity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Complexity::Low),
            "medium" => Ok(Complexity::Medium),
            "high" => Ok(Complexity::High),
            "critical" => Ok(Complexity::Critical),
            other => Err(format!("Unknown complexity: {}", other)),
        }
    }
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Work item type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkType {
    Feature,
    Enhancement,
    Bug,
    Infrastructure,
    Migration,
    Research,
    Epic,
}

impl WorkType {
    pub const ALL: [WorkType; 7] = [
        WorkType::Feature,
        WorkType::Enhancement,
        WorkType::Bug,
        WorkType::Infrastructure,
        WorkType::Migration,
        WorkType::Research,
        WorkType::Epic,
    ];

    /// Type is nominal, not ordered; any two distinct values are one step
    /// apart for disagreement purposes.
    pub fn step(&self) -> usize {
        Self::ALL.iter().position(|v| v == self).unwrap_or(0)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkType::Feature => "Feature",
            WorkType::Enhancement => "Enhancement",
            WorkType::Bug => "Bug",
            WorkType::Infrastructure => "Infrastructure",
            WorkType::Migration => "Migration",
            WorkType::Research => "Research",
            WorkType::Epic => "Epic",
        }
    }
}

impl FromStr for WorkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "feature" => Ok(WorkType::Feature),
            "enhancement" => Ok(WorkType::Enhancement),
            "bug" => Ok(WorkType::Bug),
            "infrastructure" => Ok(WorkType::Infrastructure),
            "migration" => Ok(WorkType::Migration),
            "research" => Ok(WorkType::Research),
            "epic" => Ok(WorkType::Epic),
            other => Err(format!("Unknown work type: {}", other)),
        }
    }
}

impl std::fmt::Display for WorkType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The three classification dimensions, used to address per-dimension
/// corrections and accuracy tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
    Size,
    Complexity,
    WorkType,
}

impl Dimension {
    pub const ALL: [Dimension; 3] = [Dimension::Size, Dimension::Complexity, Dimension::WorkType];
}

impl std::fmt::Display for Dimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Dimension::Size => write!(f, "size"),
            Dimension::Complexity => write!(f, "complexity"),
            Dimension::WorkType => write!(f, "work_type"),
        }
    }
}

/// Expected classification carried by a scenario
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExpectedClassification {
    pub size: Size,
    pub complexity: Complexity,
    pub work_type: WorkType,
}

/// Canonical reference work pattern with an expected classification and
/// context requirements.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    // === Identity ===
    /// Unique identifier
    pub id: ScenarioId,

    /// Human-readable title, e.g. "OAuth Integration (Single Provider)"
    pub title: String,

    /// Domain tag for grouping, e.g. "authentication"
    pub domain: String,

    // === Expectations ===
    /// Classification a matching work item is expected to receive
    pub expected: ExpectedClassification,

    /// Context keys this scenario contributes when matched (fills only
    /// missing keys, never overwrites caller-provided context)
    pub context_requirements: BTreeMap<String, String>,

    /// Example work item descriptions
    pub examples: Vec<String>,

    /// Phrases that historically indicated a successful match
    pub success_patterns: Vec<String>,

    // === Lifecycle ===
    /// Times this scenario has been matched
    pub usage_count: u64,

    /// Rolling accuracy score (0-100), updated from feedback
    pub accuracy_score: f32,

    /// Structural revision, bumped by the Deep Optimizer
    pub version: u32,

    /// Soft-retired on merge; retired scenarios are excluded from matching
    pub retired: bool,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Scenario {
    /// Create a scenario with the given expectations and an unproven
    /// accuracy prior.
    pub fn new(
        title: impl Into<String>,
        domain: impl Into<String>,
        expected: ExpectedClassification,
    ) -> Self {
        Self {
            id: ScenarioId::new(),
            title: title.into(),
            domain: domain.into(),
            expected,
            context_requirements: BTreeMap::new(),
            examples: Vec::new(),
            success_patterns: Vec::new(),
            usage_count: 0,
            accuracy_score: crate::config::DEFAULT_INITIAL_ACCURACY,
            version: 1,
            retired: false,
            created_at: Utc::now(),
        }
    }
}

/// Trigger condition for a context rule
///
/// Modeled as small tagged variants instead of free-form expressions so
/// matching stays deterministic and unit-testable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum TriggerCondition {
    /// Description contains the given keywords (case-insensitive).
    /// With `match_all` set, every keyword must appear; otherwise any one
    /// suffices.
    KeywordContains {
        keywords: Vec<String>,
        #[serde(default)]
        match_all: bool,
    },

    /// Description matches the given regular expression
    Regex { pattern: String },

    /// All sub-conditions must match
    AllOf { conditions: Vec<TriggerCondition> },

    /// At least one sub-condition must match
    AnyOf { conditions: Vec<TriggerCondition> },
}

/// Where a context rule came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Curated by hand
    Manual,

    /// Proposed by the Pattern Analyzer from feedback batches
    PatternAnalysis,
}

/// Dynamic rule that injects context into a request when its trigger
/// condition matches the description.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextRule {
    /// Unique identifier
    pub id: RuleId,

    /// When this rule fires
    pub trigger: TriggerCondition,

    /// Context entries added when the rule fires
    pub additions: BTreeMap<String, String>,

    /// Confidence in the rule (0.0 - 1.0); rules below the auto-apply
    /// threshold sit in the manual review queue
    pub confidence: f32,

    /// Origin of the rule
    pub source: RuleSource,

    /// Times this rule has fired, updated by the Context Enhancer
    pub applied_count: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ContextRule {
    pub fn new(trigger: TriggerCondition, additions: BTreeMap<String, String>) -> Self {
        Self {
            id: RuleId::new(),
            trigger,
            additions,
            confidence: 1.0,
            source: RuleSource::Manual,
            applied_count: 0,
            created_at: Utc::now(),
        }
    }

    /// Two rules contradict when they share a trigger but disagree on the
    /// value of a context key.
    pub fn contradicts(&self, other: &ContextRule) -> bool {
        if self.trigger != other.trigger {
            return false;
        }
        self.additions.iter().any(|(key, value)| {
            other
                .additions
                .get(key)
                .map(|existing| existing != value)
                .unwrap_or(false)
        })
    }
}

/// One classified dimension: value, Oracle confidence, and reasoning text
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionResult<T> {
    pub value: T,

    /// Oracle confidence (0.0 - 1.0), possibly penalized by validation
    pub confidence: f32,

    /// Oracle reasoning; must be non-empty whenever the value deviates
    /// from a matched scenario's expectation
    pub reasoning: String,
}

/// Full three-dimensional classification result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub size: DimensionResult<Size>,
    pub complexity: DimensionResult<Complexity>,
    pub work_type: DimensionResult<WorkType>,
}

impl ClassificationResult {
    /// Count dimensions that agree with a scenario expectation
    pub fn matching_dimensions(&self, expected: &ExpectedClassification) -> usize {
        let mut matching = 0;
        if self.size.value == expected.size {
            matching += 1;
        }
        if self.complexity.value == expected.complexity {
            matching += 1;
        }
        if self.work_type.value == expected.work_type {
            matching += 1;
        }
        matching
    }
}

/// Outcome of matching a description against the scenario library
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum MatchOutcome {
    /// Best score cleared the match threshold
    Matched {
        scenario_id: ScenarioId,
        score: u8,
    },

    /// Best score landed in the ambiguous band; alternatives are returned
    /// and no scenario context is applied
    Ambiguous {
        candidates: Vec<(ScenarioId, u8)>,
    },

    /// Nothing scored above the floor; flagged as a new-scenario candidate
    NoMatch {
        best_score: Option<u8>,
    },
}

impl MatchOutcome {
    pub fn matched_scenario(&self) -> Option<ScenarioId> {
        match self {
            MatchOutcome::Matched { scenario_id, .. } => Some(*scenario_id),
            _ => None,
        }
    }
}

/// Immutable record of one classify() call
///
/// Created once per call and never mutated afterwards, except for the
/// `invalidated` flag set when reject feedback arrives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassificationRecord {
    // === Identity ===
    /// Unique identifier (immutable)
    pub id: ClassificationId,

    /// Work item description as submitted
    pub description: String,

    /// Caller-provided context, before enhancement
    pub input_context: BTreeMap<String, String>,

    // === Matching ===
    /// Scenario this description matched, if any
    pub matched_scenario: Option<ScenarioId>,

    /// Top-k alternatives with scores when the match was ambiguous;
    /// empty otherwise
    pub alternatives: Vec<(ScenarioId, u8)>,

    /// Snapshot of the enhanced context passed to the Oracle
    pub enhanced_context: BTreeMap<String, String>,

    /// Context rules applied, in application order (audit trail)
    pub applied_rules: Vec<RuleId>,

    // === Result ===
    /// The classification produced by the Oracle
    pub result: ClassificationResult,

    /// Agreement with the matched scenario's expectation
    /// (100/66/33/0; defined only when a scenario matched)
    pub alignment_score: Option<u8>,

    /// Set when reject feedback invalidates this classification
    pub invalidated: bool,

    /// Configuration version active when this record was created
    pub config_version: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Partial per-dimension corrections supplied with edit feedback
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Corrections {
    pub size: Option<Size>,
    pub complexity: Option<Complexity>,
    pub work_type: Option<WorkType>,
}

impl Corrections {
    pub fn is_empty(&self) -> bool {
        self.size.is_none() && self.complexity.is_none() && self.work_type.is_none()
    }

    /// Dimensions touched by this correction set
    pub fn corrected_dimensions(&self) -> Vec<Dimension> {
        let mut dims = Vec::new();
        if self.size.is_some() {
            dims.push(Dimension::Size);
        }
        if self.complexity.is_some() {
            dims.push(Dimension::Complexity);
        }
        if self.work_type.is_some() {
            dims.push(Dimension::WorkType);
        }
        dims
    }
}

/// User verdict on a classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum FeedbackType {
    /// Classification accepted as-is
    Accept,

    /// Classification corrected on one or more dimensions
    Edit { corrections: Corrections },

    /// Classification rejected outright
    Reject { reason: String },
}

/// Append-only record of user feedback on a classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackRecord {
    /// Unique identifier
    pub id: FeedbackId,

    /// Classification this feedback refers to (must exist)
    pub classification_id: ClassificationId,

    /// The verdict
    pub feedback: FeedbackType,

    /// Extra context supplied by the user
    pub additional_context: BTreeMap<String, String>,

    /// Submitting user
    pub user_id: String,

    /// Position in the global feedback sequence, assigned atomically;
    /// batch boundaries for the learning tiers are derived from this
    pub seq: u64,

    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

/// Versioned content: scenarios, context rules, and prompt templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub scenarios: Vec<Scenario>,
    pub context_rules: Vec<ContextRule>,
    pub prompt_templates: BTreeMap<String, String>,
}

impl ConfigSnapshot {
    /// Look up an active (non-retired) scenario
    pub fn scenario(&self, id: ScenarioId) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.id == id && !s.retired)
    }

    /// Active scenarios, in library order
    pub fn active_scenarios(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter().filter(|s| !s.retired)
    }
}

/// Immutable, versioned snapshot of the classification configuration
///
/// Rollback creates a *new* version with the target's content; history is
/// linear and never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigurationVersion {
    /// Monotonically increasing version number
    pub version_id: u64,

    /// The versioned content
    pub snapshot: ConfigSnapshot,

    /// Human-readable description of what changed
    pub change_log: Vec<String>,

    /// Commit timestamp
    pub created_at: DateTime<Utc>,
}
