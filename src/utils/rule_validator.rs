// Copyright 2026 BadCompany
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

// Comprehensive rule-set validation - fail-fast at load time

use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{Rule, RuleSetSource};
use std::collections::HashSet;

/// Validates rule sets for structural correctness before compilation.
pub struct RuleValidator;

impl RuleValidator {
    /// Validate a complete source document. Called by the compiler; load is
    /// all-or-nothing.
    pub fn validate(source: &RuleSetSource) -> Result<(), ShieldError> {
        let mut seen_ids = HashSet::new();
        for (idx, rule) in source.rules.iter().enumerate() {
            Self::validate_rule(rule, idx)?;
            if !seen_ids.insert(rule.id.as_str()) {
                return Err(ShieldError::RuleCompile(format!(
                    "duplicate rule id '{}'",
                    rule.id
                )));
            }
        }

        let mut seen_limits = HashSet::new();
        for limit in &source.rate_limits {
            if limit.id.is_empty() {
                return Err(ShieldError::RuleCompile(
                    "rate limit with empty id".to_string(),
                ));
            }
            if !seen_limits.insert(limit.id.as_str()) {
                return Err(ShieldError::RuleCompile(format!(
                    "duplicate rate limit id '{}'",
                    limit.id
                )));
            }
            if limit.max_calls == 0 {
                return Err(ShieldError::RuleCompile(format!(
                    "rate limit '{}': max_calls must be positive",
                    limit.id
                )));
            }
            if limit.window_seconds == 0 {
                return Err(ShieldError::RuleCompile(format!(
                    "rate limit '{}': window_seconds must be positive",
                    limit.id
                )));
            }
        }

        for name in &source.honeypots {
            if name.is_empty() {
                return Err(ShieldError::RuleCompile(
                    "honeypot with empty tool name".to_string(),
                ));
            }
        }

        for pattern in &source.custom_pii {
            if pattern.name.is_empty() || pattern.pattern.is_empty() {
                return Err(ShieldError::RuleCompile(
                    "custom PII pattern requires name and pattern".to_string(),
                ));
            }
        }

        for pattern in &source.sanitizer.blocked_patterns {
            if pattern.name.is_empty() || pattern.pattern.is_empty() {
                return Err(ShieldError::RuleCompile(
                    "blocked pattern requires name and pattern".to_string(),
                ));
            }
        }

        Ok(())
    }

    fn validate_rule(rule: &Rule, idx: usize) -> Result<(), ShieldError> {
        let context = format!("rule #{} ('{}')", idx + 1, rule.id);

        if rule.id.is_empty() {
            return Err(ShieldError::RuleCompile(format!(
                "rule #{}: id cannot be empty",
                idx + 1
            )));
        }

        let has_tool = rule.tool.is_some();
        let has_args = rule
            .args_match
            .as_ref()
            .is_some_and(|m| !m.is_empty());
        let has_session = rule.session.as_ref().is_some_and(|m| !m.is_empty());
        let has_chain = rule.chain.as_ref().is_some_and(|c| !c.is_empty());
        if !has_tool && !has_args && !has_session && !has_chain {
            return Err(ShieldError::RuleCompile(format!(
                "{context}: at least one of tool, args_match, session, or chain must be specified"
            )));
        }

        if let Some(session) = &rule.session {
            for (key, pred) in session {
                if !key.starts_with("tool_count.") || key.len() <= "tool_count.".len() {
                    return Err(ShieldError::RuleCompile(format!(
                        "{context}: session predicate key '{key}' must be tool_count.<tool>"
                    )));
                }
                if pred.gt.is_none() && pred.lt.is_none() && pred.eq.is_none() {
                    return Err(ShieldError::RuleCompile(format!(
                        "{context}: session predicate '{key}' needs one of gt, lt, eq"
                    )));
                }
            }
        }

        if let Some(chain) = &rule.chain {
            for step in chain {
                if step.tool.is_empty() {
                    return Err(ShieldError::RuleCompile(format!(
                        "{context}: chain step with empty tool"
                    )));
                }
                if step.within_seconds == 0 {
                    return Err(ShieldError::RuleCompile(format!(
                        "{context}: chain step for '{}' needs within_seconds > 0",
                        step.tool
                    )));
                }
            }
        }

        if let Some(ctx) = &rule.context {
            if let Some(window) = &ctx.time_window {
                crate::engine::matcher::parse_time_window(window)
                    .map_err(|e| ShieldError::RuleCompile(format!("{context}: {e}")))?;
            }
            if let Some(days) = &ctx.days {
                for day in days {
                    crate::engine::matcher::parse_weekday(day)
                        .map_err(|e| ShieldError::RuleCompile(format!("{context}: {e}")))?;
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_core::models::{ChainStep, ToolSelector, Verdict};

    fn bare_rule(id: &str) -> Rule {
        Rule {
            id: id.to_string(),
            tool: Some(ToolSelector::One("x".to_string())),
            args_match: None,
            session: None,
            context: None,
            chain: None,
            then: Verdict::Block,
            message: None,
            severity: Default::default(),
            approval_strategy: Default::default(),
            pii_action: None,
        }
    }

    #[test]
    fn test_duplicate_rule_ids_rejected() {
        let source = RuleSetSource {
            rules: vec![bare_rule("same"), bare_rule("same")],
            ..Default::default()
        };
        let err = RuleValidator::validate(&source).unwrap_err();
        assert!(err.to_string().contains("duplicate rule id"));
    }

    #[test]
    fn test_rule_without_any_condition_rejected() {
        let mut rule = bare_rule("empty");
        rule.tool = None;
        let source = RuleSetSource {
            rules: vec![rule],
            ..Default::default()
        };
        assert!(RuleValidator::validate(&source).is_err());
    }

    #[test]
    fn test_chain_only_rule_is_valid() {
        let mut rule = bare_rule("chain-only");
        rule.tool = None;
        rule.chain = Some(vec![ChainStep {
            tool: "read_db".to_string(),
            within_seconds: 60,
        }]);
        let source = RuleSetSource {
            rules: vec![rule],
            ..Default::default()
        };
        assert!(RuleValidator::validate(&source).is_ok());
    }

    #[test]
    fn test_bad_session_key_rejected() {
        let mut rule = bare_rule("bad-session");
        rule.session = Some(
            [(
                "call_count.read_db".to_string(),
                crate::engine_core::models::CountPredicate {
                    gt: Some(1),
                    ..Default::default()
                },
            )]
            .into_iter()
            .collect(),
        );
        let source = RuleSetSource {
            rules: vec![rule],
            ..Default::default()
        };
        assert!(RuleValidator::validate(&source).is_err());
    }

    #[test]
    fn test_zero_window_rate_limit_rejected() {
        let source: RuleSetSource = crate::utils::loader::parse_rule_set(
            r#"
rate_limits:
  - { id: bad, max_calls: 5, window_seconds: 0 }
"#,
        )
        .unwrap();
        assert!(RuleValidator::validate(&source).is_err());
    }
}
