//! Context Enhancer
//!
//! Merges the three context layers for a classification request:
//! caller-provided base context (highest priority, never overwritten),
//! the matched scenario's context requirements (fill missing keys only),
//! then active context rules in library order (later rules may overwrite
//! earlier rule additions, never base context). The ordered list of
//! applied rule ids is returned for the audit trail.

use crate::types::{ContextRule, RuleId, Scenario, TriggerCondition};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tracing::{debug, warn};

/// Compiled trigger regexes, keyed by pattern. Rules are long-lived and
/// few, so the cache is unbounded.
static REGEX_CACHE: Lazy<Mutex<HashMap<String, Option<Regex>>>> =
    Lazy::new(|| Mutex::new(HashMap::new()));

/// Enhanced context plus the audit trail of applied rules
#[derive(Debug, Clone)]
pub struct EnhancedContext {
    pub context: BTreeMap<String, String>,
    pub applied_rules: Vec<RuleId>,
}

/// Evaluate a trigger condition against a description.
///
/// Keyword matching is case-insensitive; an invalid regex never matches
/// (and is logged once on first compile).
pub fn trigger_matches(condition: &TriggerCondition, description: &str) -> bool {
    match condition {
        TriggerCondition::KeywordContains { keywords, match_all } => {
            let haystack = description.to_lowercase();
            let mut hits = keywords
                .iter()
                .map(|keyword| haystack.contains(&keyword.to_lowercase()));
            if *match_all {
                hits.all(|hit| hit)
            } else {
                hits.any(|hit| hit)
            }
        }
        TriggerCondition::Regex { pattern } => {
            let mut cache = REGEX_CACHE.lock().expect("regex cache poisoned");
            let compiled = cache.entry(pattern.clone()).or_insert_with(|| {
                match Regex::new(pattern) {
                    Ok(regex) => Some(regex),
                    Err(e) => {
                        warn!("Invalid rule trigger regex {:?}: {}", pattern, e);
                        None
                    }
                }
            });
            compiled
                .as_ref()
                .map(|regex| regex.is_match(description))
                .unwrap_or(false)
        }
        TriggerCondition::AllOf { conditions } => conditions
            .iter()
            .all(|condition| trigger_matches(condition, description)),
        TriggerCondition::AnyOf { conditions } => conditions
            .iter()
            .any(|condition| trigger_matches(condition, description)),
    }
}

/// Merges context layers for classification requests
pub struct ContextEnhancer;

impl ContextEnhancer {
    /// Build the enhanced context for a request.
    ///
    /// `scenario` is the matched scenario, if any; ambiguous and no-match
    /// outcomes pass `None` so no scenario context is applied.
    pub fn enhance(
        description: &str,
        base_context: &BTreeMap<String, String>,
        scenario: Option<&Scenario>,
        rules: &[ContextRule],
    ) -> EnhancedContext {
        let mut context = base_context.clone();

        if let Some(scenario) = scenario {
            for (key, value) in &scenario.context_requirements {
                context.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        let mut applied_rules = Vec::new();
        for rule in rules {
            if !trigger_matches(&rule.trigger, description) {
                continue;
            }
            for (key, value) in &rule.additions {
                // Base context always wins; rule layers overwrite each other
                if !base_context.contains_key(key) {
                    context.insert(key.clone(), value.clone());
                }
            }
            applied_rules.push(rule.id);
        }

        debug!(
            "Enhanced context: {} keys, {} rules applied",
            context.len(),
            applied_rules.len()
        );

        EnhancedContext {
            context,
            applied_rules,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Complexity, ExpectedClassification, Size, WorkType};

    fn keyword_rule(keyword: &str, key: &str, value: &str) -> ContextRule {
        let mut additions = BTreeMap::new();
        additions.insert(key.to_string(), value.to_string());
        ContextRule::new(
            TriggerCondition::KeywordContains {
                keywords: vec![keyword.to_string()],
                match_all: false,
            },
            additions,
        )
    }

    fn scenario_with_context(pairs: &[(&str, &str)]) -> Scenario {
        let mut scenario = Scenario::new(
            "OAuth Integration (Single Provider)",
            "authentication",
            ExpectedClassification {
                size: Size::L,
                complexity: Complexity::Medium,
                work_type: WorkType::Feature,
            },
        );
        for (key, value) in pairs {
            scenario
                .context_requirements
                .insert(key.to_string(), value.to_string());
        }
        scenario
    }

    #[test]
    fn test_keyword_trigger_case_insensitive() {
        let condition = TriggerCondition::KeywordContains {
            keywords: vec!["OAuth".to_string()],
            match_all: false,
        };
        assert!(trigger_matches(&condition, "add oauth login"));
        assert!(!trigger_matches(&condition, "add SAML login"));
    }

    #[test]
    fn test_keyword_trigger_match_all() {
        let condition = TriggerCondition::KeywordContains {
            keywords: vec!["oauth".to_string(), "google".to_string()],
            match_all: true,
        };
        assert!(trigger_matches(&condition, "Google OAuth for the web app"));
        assert!(!trigger_matches(&condition, "GitHub OAuth for the web app"));
    }

    #[test]
    fn test_regex_trigger() {
        let condition = TriggerCondition::Regex {
            pattern: r"(?i)migrat(e|ion)".to_string(),
        };
        assert!(trigger_matches(&condition, "Database migration to Postgres"));
        assert!(!trigger_matches(&condition, "Add caching layer"));
    }

    #[test]
    fn test_invalid_regex_never_matches() {
        let condition = TriggerCondition::Regex {
            pattern: "([unclosed".to_string(),
        };
        assert!(!trigger_matches(&condition, "anything"));
    }

    #[test]
    fn test_boolean_composition() {
        let condition = TriggerCondition::AllOf {
            conditions: vec![
                TriggerCondition::KeywordContains {
                    keywords: vec!["oauth".to_string()],
                    match_all: false,
                },
                TriggerCondition::AnyOf {
                    conditions: vec![
                        TriggerCondition::KeywordContains {
                            keywords: vec!["google".to_string()],
                            match_all: false,
                        },
                        TriggerCondition::KeywordContains {
                            keywords: vec!["github".to_string()],
                            match_all: false,
                        },
                    ],
                },
            ],
        };
        assert!(trigger_matches(&condition, "GitHub OAuth login"));
        assert!(!trigger_matches(&condition, "Plain OAuth login"));
        assert!(!trigger_matches(&condition, "GitHub webhook sync"));
    }

    #[test]
    fn test_base_context_never_overwritten() {
        let mut base = BTreeMap::new();
        base.insert("team".to_string(), "platform".to_string());

        let scenario = scenario_with_context(&[("team", "identity"), ("auth_flow", "oauth2")]);
        let rule = keyword_rule("oauth", "team", "security");

        let enhanced = ContextEnhancer::enhance(
            "Integrate Google OAuth authentication",
            &base,
            Some(&scenario),
            &[rule],
        );

        assert_eq!(enhanced.context.get("team").unwrap(), "platform");
        assert_eq!(enhanced.context.get("auth_flow").unwrap(), "oauth2");
    }

    #[test]
    fn test_later_rules_overwrite_earlier_rule_additions() {
        let base = BTreeMap::new();
        let first = keyword_rule("oauth", "complexity_hint", "medium");
        let second = keyword_rule("oauth", "complexity_hint", "high");

        let enhanced = ContextEnhancer::enhance(
            "Integrate Google OAuth authentication",
            &base,
            None,
            &[first.clone(), second.clone()],
        );

        assert_eq!(enhanced.context.get("complexity_hint").unwrap(), "high");
        assert_eq!(enhanced.applied_rules, vec![first.id, second.id]);
    }

    #[test]
    fn test_inactive_rules_not_applied() {
        let base = BTreeMap::new();
        let rule = keyword_rule("kafka", "queueing", "true");

        let enhanced = ContextEnhancer::enhance(
            "Integrate Google OAuth authentication",
            &base,
            None,
            &[rule],
        );

        assert!(enhanced.context.is_empty());
        assert!(enhanced.applied_rules.is_empty());
    }
}
