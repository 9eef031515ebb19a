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

//! Domain models for PolicyShield.
//!
//! This module contains pure data structures representing rules, verdicts,
//! approvals, and trace records. It is designed to be free of I/O side effects.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The four-way decision produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Allow,
    Block,
    Redact,
    Approve,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Allow => "ALLOW",
            Verdict::Block => "BLOCK",
            Verdict::Redact => "REDACT",
            Verdict::Approve => "APPROVE",
        }
    }
}

impl std::fmt::Display for Verdict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Engine operating mode.
///
/// In `Audit` the engine computes verdicts and records them but returns
/// ALLOW to the caller. In `Disabled` it short-circuits to ALLOW before
/// any check. Kill switch and honeypots override both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Enforce,
    Audit,
    Disabled,
}

impl Mode {
    pub fn parse_safe(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "audit" => Mode::Audit,
            "disabled" | "off" => Mode::Disabled,
            _ => Mode::Enforce,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Mode::Enforce => "enforce",
            Mode::Audit => "audit",
            Mode::Disabled => "disabled",
        }
    }
}

/// Advisory severity label attached to rules and detector packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

/// Caching key class used to avoid re-prompting for equivalent approvals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStrategy {
    /// Keyed on tool name + canonical argument JSON
    #[default]
    Once,
    /// Keyed on session id + rule id
    PerSession,
    /// Keyed on rule id
    PerRule,
    /// Keyed on tool name
    PerTool,
}

/// Tool selector: exact name, list of names, or glob pattern (`"delete_*"`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolSelector {
    One(String),
    Many(Vec<String>),
}

/// Argument matcher predicate, keyed by argument name in `args_match`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArgPredicate {
    /// Deep equality against the JSON value
    Eq(serde_json::Value),
    /// Substring on the stringified value
    Contains(String),
    NotContains(String),
    /// Search semantics, case-insensitive
    Regex(String),
    NotRegex(String),
    /// Numeric coercion; non-numeric values never satisfy
    Gt(f64),
    Lt(f64),
}

/// Comparison over a session counter. At least one bound must be set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountPredicate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lt: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eq: Option<u64>,
}

impl CountPredicate {
    pub fn holds(&self, count: u64) -> bool {
        if let Some(n) = self.gt {
            if count <= n {
                return false;
            }
        }
        if let Some(n) = self.lt {
            if count >= n {
                return false;
            }
        }
        if let Some(n) = self.eq {
            if count != n {
                return false;
            }
        }
        self.gt.is_some() || self.lt.is_some() || self.eq.is_some()
    }
}

/// Ambient-context clause: time-of-day window, weekday set, caller role,
/// deployment environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMatch {
    /// "HH:MM-HH:MM", local time; wraps past midnight when start > end
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_window: Option<String>,
    /// Lowercase three-letter day names ("mon".."sun")
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_role: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment: Option<String>,
}

/// One step of a chain (temporal) condition: a prior event with the given
/// tool must exist in the session history no older than `within_seconds`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainStep {
    pub tool: String,
    pub within_seconds: u64,
}

/// A declarative policy rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args_match: Option<HashMap<String, ArgPredicate>>,
    /// Keys are `tool_count.<tool>`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<HashMap<String, CountPredicate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<ContextMatch>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain: Option<Vec<ChainStep>>,
    pub then: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default)]
    pub severity: Severity,
    #[serde(default)]
    pub approval_strategy: ApprovalStrategy,
    /// Stronger action applied when PII is detected in the arguments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_action: Option<Verdict>,
}

/// A sliding-window rate limit, scoped by tool selector (or all tools).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitSpec {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool: Option<ToolSelector>,
    pub max_calls: u32,
    pub window_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// A custom PII pattern loaded from configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiPatternSpec {
    pub name: String,
    pub pattern: String,
}

/// A user-configured blocked pattern enforced by the sanitizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamedPattern {
    pub name: String,
    pub pattern: String,
}

fn default_true() -> bool {
    true
}

fn default_max_string_length() -> usize {
    100_000
}

fn default_max_args_depth() -> usize {
    crate::engine_core::constants::limits::MAX_ARGS_DEPTH
}

fn default_max_total_keys() -> usize {
    1_000
}

/// Sanitizer configuration carried in the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SanitizerSpec {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Detector pack names to run; absent means all built-in packs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detectors: Option<Vec<String>>,
    #[serde(default)]
    pub blocked_patterns: Vec<NamedPattern>,
    #[serde(default = "default_max_string_length")]
    pub max_string_length: usize,
    #[serde(default = "default_max_args_depth")]
    pub max_args_depth: usize,
    #[serde(default = "default_max_total_keys")]
    pub max_total_keys: usize,
    #[serde(default = "default_true")]
    pub trim_whitespace: bool,
}

impl Default for SanitizerSpec {
    fn default() -> Self {
        Self {
            enabled: true,
            detectors: None,
            blocked_patterns: Vec::new(),
            max_string_length: default_max_string_length(),
            max_args_depth: default_max_args_depth(),
            max_total_keys: default_max_total_keys(),
            trim_whitespace: true,
        }
    }
}

fn default_approval_timeout() -> u64 {
    crate::engine_core::constants::defaults::APPROVAL_TIMEOUT_SECS
}

fn default_auto_verdict() -> Verdict {
    Verdict::Block
}

/// Approval behavior carried in the rule set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSpec {
    #[serde(default = "default_approval_timeout")]
    pub timeout_seconds: u64,
    /// Terminal verdict applied when an approval times out
    #[serde(default = "default_auto_verdict")]
    pub auto_verdict: Verdict,
}

impl Default for ApprovalSpec {
    fn default() -> Self {
        Self {
            timeout_seconds: default_approval_timeout(),
            auto_verdict: Verdict::Block,
        }
    }
}

fn default_verdict_allow() -> Verdict {
    Verdict::Allow
}

/// The complete policy document as deserialized from a rule file.
///
/// This is the input to compilation; the compiled form is
/// [`crate::engine::matcher::CompiledRuleSet`]. Treated as immutable after
/// compilation; hot reload replaces the compiled set as a whole.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleSetSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    #[serde(default)]
    pub rules: Vec<Rule>,
    #[serde(default = "default_verdict_allow")]
    pub default_verdict: Verdict,
    #[serde(default)]
    pub rate_limits: Vec<RateLimitSpec>,
    #[serde(default)]
    pub custom_pii: Vec<PiiPatternSpec>,
    /// Tool names declared to be non-existent; any call is anomalous
    #[serde(default)]
    pub honeypots: Vec<String>,
    #[serde(default)]
    pub sanitizer: SanitizerSpec,
    #[serde(default)]
    pub approval: ApprovalSpec,
}

impl Default for RuleSetSource {
    fn default() -> Self {
        Self {
            mode: None,
            rules: Vec::new(),
            default_verdict: Verdict::Allow,
            rate_limits: Vec::new(),
            custom_pii: Vec::new(),
            honeypots: Vec::new(),
            sanitizer: SanitizerSpec::default(),
            approval: ApprovalSpec::default(),
        }
    }
}

/// The engine's answer to a single pre-call check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShieldResult {
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_args: Option<serde_json::Value>,
    #[serde(default)]
    pub pii_types: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval_id: Option<String>,
    pub request_id: String,
    pub latency_ms: f64,
}

/// Approval request lifecycle state. Once out of `Pending` it is immutable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
    Timeout,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApprovalStatus::Pending => "pending",
            ApprovalStatus::Approved => "approved",
            ApprovalStatus::Denied => "denied",
            ApprovalStatus::Timeout => "timeout",
        }
    }
}

/// A pending (or resolved) human-approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: String,
    pub tool: String,
    /// Snapshot of the call arguments, already sanitized for exposure
    pub args: serde_json::Value,
    pub rule_id: String,
    pub message: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
}

/// A recorded human response to an approval request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalResponse {
    pub approved: bool,
    pub responder: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub responded_at: DateTime<Utc>,
}

/// Point-in-time view of an approval, as returned by `get_status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalSnapshot {
    pub approval_id: String,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    /// Terminal verdict applied when status is `timeout`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_verdict: Option<Verdict>,
}

/// Approval resolution details attached to a trace entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApprovalTraceInfo {
    pub approval_id: String,
    pub status: ApprovalStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub responded_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_time_ms: Option<f64>,
}

/// One append-only audit record, serialized as a JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceEntry {
    pub timestamp: f64,
    pub session_id: String,
    pub tool: String,
    pub verdict: Verdict,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_id: Option<String>,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pii_types: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approval: Option<ApprovalTraceInfo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// Set when the verdict shown is a shadow verdict (audit mode)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<Mode>,
    /// Exception type tag when the pipeline failed and the fail mode applied
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Pre-call check request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

/// Post-call check request body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCheckRequest {
    pub tool_name: String,
    #[serde(default)]
    pub args: serde_json::Value,
    pub result: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Post-call check outcome: detected kinds plus the redacted result body.
/// Which of the two the caller applies is a client contract choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostCheckOutcome {
    pub pii_types: Vec<String>,
    pub redacted_result: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verdict_wire_encoding_is_uppercase() {
        assert_eq!(serde_json::to_string(&Verdict::Allow).unwrap(), "\"ALLOW\"");
        assert_eq!(
            serde_json::from_str::<Verdict>("\"REDACT\"").unwrap(),
            Verdict::Redact
        );
    }

    #[test]
    fn test_count_predicate_requires_a_bound() {
        let empty = CountPredicate::default();
        assert!(!empty.holds(0));
        let gt = CountPredicate {
            gt: Some(2),
            ..Default::default()
        };
        assert!(!gt.holds(2));
        assert!(gt.holds(3));
    }

    #[test]
    fn test_tool_selector_untagged_forms() {
        let one: ToolSelector = serde_json::from_str("\"delete_file\"").unwrap();
        assert_eq!(one, ToolSelector::One("delete_file".to_string()));
        let many: ToolSelector = serde_json::from_str("[\"a\",\"b\"]").unwrap();
        assert_eq!(
            many,
            ToolSelector::Many(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn test_arg_predicate_external_tag() {
        let p: ArgPredicate = serde_json::from_str(r#"{"contains": "/etc"}"#).unwrap();
        assert_eq!(p, ArgPredicate::Contains("/etc".to_string()));
        let p: ArgPredicate = serde_json::from_str(r#"{"gt": 5.0}"#).unwrap();
        assert_eq!(p, ArgPredicate::Gt(5.0));
    }

    #[test]
    fn test_rule_set_source_minimal_yaml() {
        let doc = r#"
rules:
  - id: no-deletes
    tool: "delete_*"
    then: BLOCK
    message: "no deletes"
default_verdict: ALLOW
honeypots: [export_all_data]
"#;
        let src: RuleSetSource = crate::utils::loader::parse_rule_set(doc).unwrap();
        assert_eq!(src.rules.len(), 1);
        assert_eq!(src.rules[0].then, Verdict::Block);
        assert_eq!(src.honeypots, vec!["export_all_data".to_string()]);
        assert_eq!(src.default_verdict, Verdict::Allow);
    }
}
