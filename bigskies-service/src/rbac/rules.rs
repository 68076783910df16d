//! Protection rules: ordered topic patterns mapped to (resource, action)

use std::sync::{Arc, RwLock};

use crate::bus::TopicFilter;
use crate::config::ProtectionRuleConfig;
use crate::error::Result;

/// One compiled protection rule
#[derive(Debug, Clone)]
struct CompiledRule {
    filter: TopicFilter,
    resource: String,
    action: String,
}

/// The (resource, action) pair a matched topic must be authorized for
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleMatch {
    pub pattern: String,
    pub resource: String,
    pub action: String,
}

/// Ordered protection rules with atomic reload
///
/// Matching scans in declaration order; the first matching pattern wins.
/// Reload swaps the whole list under a write lock so concurrent readers see
/// either the old or the new list, never a mix.
pub struct RuleSet {
    rules: RwLock<Arc<Vec<CompiledRule>>>,
}

impl RuleSet {
    /// Compile a rule list from configuration
    pub fn compile(configs: &[ProtectionRuleConfig]) -> Result<Self> {
        Ok(Self {
            rules: RwLock::new(Arc::new(Self::build(configs)?)),
        })
    }

    fn build(configs: &[ProtectionRuleConfig]) -> Result<Vec<CompiledRule>> {
        configs
            .iter()
            .map(|rule| {
                Ok(CompiledRule {
                    filter: TopicFilter::parse(&rule.pattern)?,
                    resource: rule.resource.clone(),
                    action: rule.action.clone(),
                })
            })
            .collect()
    }

    /// Replace the rule list atomically
    ///
    /// A compile error leaves the active list untouched.
    pub fn reload(&self, configs: &[ProtectionRuleConfig]) -> Result<()> {
        let compiled = Arc::new(Self::build(configs)?);
        *self.rules.write().expect("rule lock poisoned") = compiled;
        Ok(())
    }

    /// First rule matching the topic, in declaration order
    pub fn match_topic(&self, topic: &str) -> Option<RuleMatch> {
        let rules = Arc::clone(&self.rules.read().expect("rule lock poisoned"));
        rules.iter().find(|rule| rule.filter.matches(topic)).map(|rule| RuleMatch {
            pattern: rule.filter.pattern().to_string(),
            resource: rule.resource.clone(),
            action: rule.action.clone(),
        })
    }

    pub fn len(&self) -> usize {
        self.rules.read().expect("rule lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(pattern: &str, resource: &str, action: &str) -> ProtectionRuleConfig {
        ProtectionRuleConfig {
            pattern: pattern.to_string(),
            resource: resource.to_string(),
            action: action.to_string(),
        }
    }

    #[test]
    fn test_first_match_wins() {
        let rules = RuleSet::compile(&[
            rule("bigskies/coordinator/telescope/control/+", "telescope", "control"),
            rule("bigskies/coordinator/telescope/#", "telescope", "read"),
        ])
        .unwrap();

        let m = rules
            .match_topic("bigskies/coordinator/telescope/control/slew")
            .unwrap();
        assert_eq!(m.action, "control");

        let m = rules
            .match_topic("bigskies/coordinator/telescope/query/position")
            .unwrap();
        assert_eq!(m.action, "read");
    }

    #[test]
    fn test_no_match() {
        let rules = RuleSet::compile(&[rule(
            "bigskies/coordinator/telescope/#",
            "telescope",
            "read",
        )])
        .unwrap();
        assert!(rules.match_topic("bigskies/coordinator/plugin/event/x").is_none());
    }

    #[test]
    fn test_empty_rule_set_matches_nothing() {
        let rules = RuleSet::compile(&[]).unwrap();
        assert!(rules.is_empty());
        assert!(rules.match_topic("bigskies/coordinator/telescope/control/slew").is_none());
    }

    #[test]
    fn test_reload_swaps_atomically() {
        let rules = RuleSet::compile(&[rule(
            "bigskies/coordinator/telescope/#",
            "telescope",
            "read",
        )])
        .unwrap();

        rules
            .reload(&[rule("bigskies/coordinator/plugin/#", "plugin", "manage")])
            .unwrap();

        assert!(rules.match_topic("bigskies/coordinator/telescope/query/x").is_none());
        let m = rules.match_topic("bigskies/coordinator/plugin/event/x").unwrap();
        assert_eq!(m.resource, "plugin");
    }

    #[test]
    fn test_reload_failure_keeps_old_rules() {
        let rules = RuleSet::compile(&[rule(
            "bigskies/coordinator/telescope/#",
            "telescope",
            "read",
        )])
        .unwrap();

        assert!(rules.reload(&[rule("bad/#/pattern", "x", "y")]).is_err());
        assert_eq!(rules.len(), 1);
        assert!(rules.match_topic("bigskies/coordinator/telescope/q").is_some());
    }

    #[test]
    fn test_match_stable_under_reload() {
        let configs = [rule(
            "bigskies/coordinator/telescope/control/+",
            "telescope",
            "control",
        )];
        let rules = RuleSet::compile(&configs).unwrap();

        let before = rules.match_topic("bigskies/coordinator/telescope/control/slew");
        rules.reload(&configs).unwrap();
        let after = rules.match_topic("bigskies/coordinator/telescope/control/slew");
        assert_eq!(before, after);
    }
}
