//! Tiered feedback learning
//!
//! Two batch tiers evolve the configuration from user feedback:
//! - **PatternAnalyzer**: every small batch, turns systematic corrections
//!   into context rules
//! - **DeepOptimizer**: every large batch, restructures the scenario
//!   library and prunes rules
//!
//! Both tiers share the **ConsistencyValidator** for comparing
//! classifications against historical precedent, and both serialize
//! through the engine's optimization lock so concurrent proposals cannot
//! conflict.

pub mod consistency;
pub mod optimizer;
pub mod pattern;

pub use consistency::{ConsistencyReport, ConsistencyValidator};
pub use optimizer::{DeepOptimizer, NoMatchCandidate, OptimizationReport};
pub use pattern::{PatternAnalyzer, PatternReport};
