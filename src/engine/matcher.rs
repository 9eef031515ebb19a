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

//! Rule compilation and matching.
//!
//! Rules are compiled once at load time into regex-compiled, predicate-closed
//! form; a rule that fails to compile rejects the whole load. At evaluation
//! time rules are tried in source order and the first rule whose every
//! specified clause is satisfied wins. A runtime error on a single rule is
//! logged and that rule skipped; the pipeline never crashes on one rule.

use crate::engine::sanitizer::Sanitizer;
use crate::engine_core::constants::limits;
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{
    ChainStep, ContextMatch, CountPredicate, Mode, RateLimitSpec, Rule, RuleSetSource, ToolSelector,
    Verdict,
};
use crate::engine_core::pii::PiiDetector;
use crate::engine_core::session::{SessionEvent, SessionSnapshot};
use crate::utils::rule_validator::RuleValidator;
use chrono::{Datelike, NaiveTime, Weekday};
use regex::Regex;
use serde_json::Value;
use std::collections::{HashSet, HashMap};
use std::time::{Duration, Instant};
use tracing::warn;

/// Caller-supplied ambient context for one check.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    pub sender: Option<String>,
    pub environment: Option<String>,
}

#[derive(Debug, Clone)]
enum CompiledToolSelector {
    Exact(String),
    Set(HashSet<String>),
    Glob(String),
}

impl CompiledToolSelector {
    fn compile(selector: &ToolSelector) -> Self {
        match selector {
            ToolSelector::One(name) if name.contains('*') => Self::Glob(name.clone()),
            ToolSelector::One(name) => Self::Exact(name.clone()),
            ToolSelector::Many(names) => Self::Set(names.iter().cloned().collect()),
        }
    }

    fn matches(&self, tool: &str) -> bool {
        match self {
            Self::Exact(name) => name == tool,
            Self::Set(names) => names.contains(tool),
            Self::Glob(pattern) => glob_match(pattern, tool),
        }
    }
}

/// Case-sensitive wildcard match; `*` spans any run of characters.
fn glob_match(pattern: &str, name: &str) -> bool {
    let parts: Vec<&str> = pattern.split('*').collect();
    if parts.len() == 1 {
        return pattern == name;
    }
    let mut rest = name;
    if !rest.starts_with(parts[0]) {
        return false;
    }
    rest = &rest[parts[0].len()..];
    let last = parts[parts.len() - 1];
    if !rest.ends_with(last) {
        return false;
    }
    rest = &rest[..rest.len() - last.len()];
    for part in &parts[1..parts.len() - 1] {
        if part.is_empty() {
            continue;
        }
        match rest.find(part) {
            Some(at) => rest = &rest[at + part.len()..],
            None => return false,
        }
    }
    true
}

#[derive(Debug, Clone)]
enum CompiledPredicate {
    Eq(Value),
    Contains(String),
    NotContains(String),
    Regex(Regex),
    NotRegex(Regex),
    Gt(f64),
    Lt(f64),
}

impl CompiledPredicate {
    /// Absent keys satisfy only the negative predicates.
    fn holds(&self, value: Option<&Value>) -> bool {
        match (self, value) {
            (Self::Eq(expected), Some(v)) => v == expected,
            (Self::Eq(_), None) => false,
            (Self::Contains(needle), Some(v)) => stringify(v).contains(needle),
            (Self::Contains(_), None) => false,
            (Self::NotContains(needle), Some(v)) => !stringify(v).contains(needle),
            (Self::NotContains(_), None) => true,
            (Self::Regex(re), Some(v)) => re.is_match(&stringify(v)),
            (Self::Regex(_), None) => false,
            (Self::NotRegex(re), Some(v)) => !re.is_match(&stringify(v)),
            (Self::NotRegex(_), None) => true,
            (Self::Gt(bound), Some(v)) => as_number(v).map(|n| n > *bound).unwrap_or(false),
            (Self::Lt(bound), Some(v)) => as_number(v).map(|n| n < *bound).unwrap_or(false),
            (Self::Gt(_) | Self::Lt(_), None) => false,
        }
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    value
        .as_f64()
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

#[derive(Debug, Clone)]
struct CompiledContext {
    window: Option<(NaiveTime, NaiveTime)>,
    days: Option<HashSet<Weekday>>,
    user_role: Option<String>,
    environment: Option<String>,
}

impl CompiledContext {
    fn compile(ctx: &ContextMatch) -> Result<Self, String> {
        let window = match &ctx.time_window {
            Some(spec) => Some(parse_time_window(spec)?),
            None => None,
        };
        let days = match &ctx.days {
            Some(names) => {
                let mut set = HashSet::new();
                for name in names {
                    set.insert(parse_weekday(name)?);
                }
                Some(set)
            }
            None => None,
        };
        Ok(Self {
            window,
            days,
            user_role: ctx.user_role.clone(),
            environment: ctx.environment.clone(),
        })
    }

    fn matches(&self, ctx: &CheckContext) -> bool {
        let now = chrono::Local::now();
        if let Some((start, end)) = self.window {
            let t = now.time();
            let in_window = if start <= end {
                t >= start && t <= end
            } else {
                // Overnight window, e.g. 22:00-06:00
                t >= start || t <= end
            };
            if !in_window {
                return false;
            }
        }
        if let Some(days) = &self.days {
            if !days.contains(&now.weekday()) {
                return false;
            }
        }
        if let Some(role) = &self.user_role {
            if ctx.sender.as_deref() != Some(role.as_str()) {
                return false;
            }
        }
        if let Some(env) = &self.environment {
            if ctx.environment.as_deref() != Some(env.as_str()) {
                return false;
            }
        }
        true
    }
}

pub(crate) fn parse_time_window(spec: &str) -> Result<(NaiveTime, NaiveTime), String> {
    let (start, end) = spec
        .split_once('-')
        .ok_or_else(|| format!("time window '{spec}' must be HH:MM-HH:MM"))?;
    let parse = |s: &str| {
        NaiveTime::parse_from_str(s.trim(), "%H:%M")
            .map_err(|e| format!("time window '{spec}': {e}"))
    };
    Ok((parse(start)?, parse(end)?))
}

pub(crate) fn parse_weekday(name: &str) -> Result<Weekday, String> {
    match name.to_lowercase().as_str() {
        "mon" | "monday" => Ok(Weekday::Mon),
        "tue" | "tuesday" => Ok(Weekday::Tue),
        "wed" | "wednesday" => Ok(Weekday::Wed),
        "thu" | "thursday" => Ok(Weekday::Thu),
        "fri" | "friday" => Ok(Weekday::Fri),
        "sat" | "saturday" => Ok(Weekday::Sat),
        "sun" | "sunday" => Ok(Weekday::Sun),
        other => Err(format!("unknown weekday '{other}'")),
    }
}

/// One rule, compiled: regexes built, tool lists expanded, predicates closed.
pub struct CompiledRule {
    pub source: Rule,
    tool: Option<CompiledToolSelector>,
    args: Vec<(String, CompiledPredicate)>,
    /// (tool name, predicate) pairs extracted from `tool_count.<tool>` keys
    session: Vec<(String, CountPredicate)>,
    context: Option<CompiledContext>,
    chain: Vec<ChainStep>,
}

impl CompiledRule {
    fn compile(rule: &Rule) -> Result<Self, ShieldError> {
        let compile_err =
            |field: &str, detail: String| ShieldError::RuleCompile(format!("rule '{}', {}: {}", rule.id, field, detail));

        let tool = rule.tool.as_ref().map(CompiledToolSelector::compile);

        let mut args = Vec::new();
        if let Some(arg_match) = &rule.args_match {
            for (key, pred) in arg_match {
                let compiled = match pred {
                    crate::engine_core::models::ArgPredicate::Eq(v) => CompiledPredicate::Eq(v.clone()),
                    crate::engine_core::models::ArgPredicate::Contains(s) => {
                        CompiledPredicate::Contains(s.clone())
                    }
                    crate::engine_core::models::ArgPredicate::NotContains(s) => {
                        CompiledPredicate::NotContains(s.clone())
                    }
                    crate::engine_core::models::ArgPredicate::Regex(src) => {
                        CompiledPredicate::Regex(compile_search_regex(src).map_err(|e| compile_err(key, e))?)
                    }
                    crate::engine_core::models::ArgPredicate::NotRegex(src) => {
                        CompiledPredicate::NotRegex(compile_search_regex(src).map_err(|e| compile_err(key, e))?)
                    }
                    crate::engine_core::models::ArgPredicate::Gt(n) => CompiledPredicate::Gt(*n),
                    crate::engine_core::models::ArgPredicate::Lt(n) => CompiledPredicate::Lt(*n),
                };
                args.push((key.clone(), compiled));
            }
        }
        // Deterministic clause order regardless of map iteration
        args.sort_by(|a, b| a.0.cmp(&b.0));

        let mut session = Vec::new();
        if let Some(preds) = &rule.session {
            for (key, pred) in preds {
                let tool_name = key
                    .strip_prefix("tool_count.")
                    .ok_or_else(|| compile_err("session", format!("unknown predicate key '{key}'")))?;
                session.push((tool_name.to_string(), *pred));
            }
            session.sort_by(|a, b| a.0.cmp(&b.0));
        }

        let context = match &rule.context {
            Some(ctx) => Some(CompiledContext::compile(ctx).map_err(|e| compile_err("context", e))?),
            None => None,
        };

        Ok(Self {
            source: rule.clone(),
            tool,
            args,
            session,
            context,
            chain: rule.chain.clone().unwrap_or_default(),
        })
    }

    /// All specified clauses must hold.
    fn matches(
        &self,
        tool: &str,
        args: &Value,
        snapshot: &SessionSnapshot,
        ctx: &CheckContext,
        now: Instant,
    ) -> bool {
        if let Some(selector) = &self.tool {
            if !selector.matches(tool) {
                return false;
            }
        }
        for (key, pred) in &self.args {
            if !pred.holds(args.get(key)) {
                return false;
            }
        }
        for (tool_name, pred) in &self.session {
            let count = snapshot.tool_counts.get(tool_name).copied().unwrap_or(0);
            if !pred.holds(count) {
                return false;
            }
        }
        if let Some(context) = &self.context {
            if !context.matches(ctx) {
                return false;
            }
        }
        if !self.chain.is_empty() && !chain_matches(&self.chain, &snapshot.events, now) {
            return false;
        }
        true
    }
}

/// Ordered backwards consumption: the last chain step must match the most
/// recent qualifying event, each earlier step an event strictly before it.
fn chain_matches(steps: &[ChainStep], events: &[SessionEvent], now: Instant) -> bool {
    let mut cursor = events.len();
    for step in steps.iter().rev() {
        let within = Duration::from_secs(step.within_seconds);
        let mut found = None;
        for idx in (0..cursor).rev() {
            let event = &events[idx];
            if event.tool == step.tool && now.duration_since(event.at) <= within {
                found = Some(idx);
                break;
            }
        }
        match found {
            Some(idx) => cursor = idx,
            None => return false,
        }
    }
    true
}

/// Search semantics, case-insensitive, capped source length.
fn compile_search_regex(source: &str) -> Result<Regex, String> {
    if source.chars().count() > limits::MAX_REGEX_SOURCE_LEN {
        return Err(format!(
            "regex exceeds {} chars",
            limits::MAX_REGEX_SOURCE_LEN
        ));
    }
    Regex::new(&format!("(?i){source}")).map_err(|e| e.to_string())
}

/// A rate limit compiled against its tool scope.
pub struct CompiledRateLimit {
    pub id: String,
    tool: Option<CompiledToolSelector>,
    pub max_calls: u32,
    pub window: Duration,
    pub message: String,
}

impl CompiledRateLimit {
    fn compile(spec: &RateLimitSpec) -> Self {
        Self {
            id: spec.id.clone(),
            tool: spec.tool.as_ref().map(CompiledToolSelector::compile),
            max_calls: spec.max_calls,
            window: Duration::from_secs(spec.window_seconds),
            message: spec
                .message
                .clone()
                .unwrap_or_else(|| format!("Rate limit '{}' exceeded", spec.id)),
        }
    }

    pub fn applies_to(&self, tool: &str) -> bool {
        self.tool.as_ref().map(|t| t.matches(tool)).unwrap_or(true)
    }
}

/// A complete, immutable policy snapshot. Hot reload replaces it whole.
pub struct CompiledRuleSet {
    pub rules: Vec<CompiledRule>,
    pub default_verdict: Verdict,
    pub mode: Mode,
    pub honeypots: HashSet<String>,
    pub rate_limits: Vec<CompiledRateLimit>,
    pub pii: PiiDetector,
    pub sanitizer: Sanitizer,
    pub approval_timeout: Duration,
    pub approval_auto_verdict: Verdict,
}

impl CompiledRuleSet {
    /// Compile a full source document. All-or-nothing: any bad rule, regex,
    /// or pattern rejects the load and leaves the previous set untouched.
    pub fn compile(source: &RuleSetSource, mode_override: Option<Mode>) -> Result<Self, ShieldError> {
        RuleValidator::validate(source)?;

        let mut rules = Vec::with_capacity(source.rules.len());
        for rule in &source.rules {
            rules.push(CompiledRule::compile(rule)?);
        }

        let rate_limits = source
            .rate_limits
            .iter()
            .map(CompiledRateLimit::compile)
            .collect();

        let pii = PiiDetector::with_custom(&source.custom_pii)?;
        let sanitizer = Sanitizer::compile(&source.sanitizer)?;

        Ok(Self {
            rules,
            default_verdict: source.default_verdict,
            mode: mode_override.or(source.mode).unwrap_or(Mode::Enforce),
            honeypots: source.honeypots.iter().cloned().collect(),
            rate_limits,
            pii,
            sanitizer,
            approval_timeout: Duration::from_secs(source.approval.timeout_seconds),
            approval_auto_verdict: source.approval.auto_verdict,
        })
    }

    /// An empty permissive set, used before any rules are loaded.
    pub fn empty() -> Self {
        Self::compile(&RuleSetSource::default(), None).expect("empty rule set compiles")
    }

    pub fn rules_count(&self) -> usize {
        self.rules.len()
    }

    pub fn is_honeypot(&self, tool: &str) -> bool {
        self.honeypots.contains(tool)
    }

    /// First matching rule in source order. A panic while evaluating one
    /// rule is caught here and that rule skipped; the build must keep the
    /// unwinding panic runtime for this to hold.
    pub fn find_match(
        &self,
        tool: &str,
        args: &Value,
        snapshot: &SessionSnapshot,
        ctx: &CheckContext,
    ) -> Option<&CompiledRule> {
        let now = Instant::now();
        for rule in &self.rules {
            let matched = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                rule.matches(tool, args, snapshot, ctx, now)
            }));
            match matched {
                Ok(true) => return Some(rule),
                Ok(false) => continue,
                Err(_) => {
                    warn!(rule_id = %rule.source.id, "rule evaluation failed; skipping rule");
                    continue;
                }
            }
        }
        None
    }

    /// Ids of every configured rate limit, for window retention on reload.
    pub fn rate_limit_ids(&self) -> HashSet<String> {
        self.rate_limits.iter().map(|l| l.id.clone()).collect()
    }

    /// Human-readable constraint digest for prompt embedding.
    pub fn summary(&self) -> String {
        let mut per_verdict: HashMap<Verdict, usize> = HashMap::new();
        for rule in &self.rules {
            *per_verdict.entry(rule.source.then).or_insert(0) += 1;
        }
        let mut out = String::new();
        out.push_str(&format!(
            "mode={}; default_verdict={}; rules={}",
            self.mode.as_str(),
            self.default_verdict,
            self.rules.len()
        ));
        for verdict in [Verdict::Block, Verdict::Redact, Verdict::Approve, Verdict::Allow] {
            if let Some(n) = per_verdict.get(&verdict) {
                out.push_str(&format!("; {}={}", verdict.as_str().to_lowercase(), n));
            }
        }
        if !self.rate_limits.is_empty() {
            out.push_str(&format!("; rate_limits={}", self.rate_limits.len()));
        }
        if !self.honeypots.is_empty() {
            let mut names: Vec<&str> = self.honeypots.iter().map(String::as_str).collect();
            names.sort_unstable();
            out.push_str(&format!("; honeypots=[{}]", names.join(", ")));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine_core::models::ArgPredicate;
    use serde_json::json;

    fn rule_src(yaml: &str) -> RuleSetSource {
        crate::utils::loader::parse_rule_set(yaml).unwrap()
    }

    fn compiled(yaml: &str) -> CompiledRuleSet {
        CompiledRuleSet::compile(&rule_src(yaml), None).unwrap()
    }

    fn no_session() -> SessionSnapshot {
        SessionSnapshot::default()
    }

    #[test]
    fn test_glob_match() {
        assert!(glob_match("delete_*", "delete_file"));
        assert!(glob_match("*_file", "delete_file"));
        assert!(glob_match("d*_f*e", "delete_file"));
        assert!(!glob_match("delete_*", "read_file"));
        assert!(!glob_match("Delete_*", "delete_file"));
    }

    #[test]
    fn test_exact_and_list_tool_match() {
        let set = compiled(
            r#"
rules:
  - id: exact
    tool: send_email
    then: BLOCK
  - id: list
    tool: [send_msg, post_chat]
    then: REDACT
"#,
        );
        let ctx = CheckContext::default();
        let hit = set
            .find_match("send_msg", &json!({}), &no_session(), &ctx)
            .unwrap();
        assert_eq!(hit.source.id, "list");
        assert!(set
            .find_match("other_tool", &json!({}), &no_session(), &ctx)
            .is_none());
    }

    #[test]
    fn test_first_match_wins_in_source_order() {
        let set = compiled(
            r#"
rules:
  - id: first
    tool: "delete_*"
    then: BLOCK
  - id: second
    tool: delete_file
    then: ALLOW
"#,
        );
        let hit = set
            .find_match("delete_file", &json!({}), &no_session(), &CheckContext::default())
            .unwrap();
        assert_eq!(hit.source.id, "first");
    }

    #[test]
    fn test_args_predicates() {
        let set = compiled(
            r#"
rules:
  - id: path-guard
    tool: read_file
    args_match:
      path: { contains: "/etc" }
    then: BLOCK
  - id: big-amount
    tool: transfer
    args_match:
      amount: { gt: 1000 }
    then: APPROVE
  - id: url-regex
    tool: fetch
    args_match:
      url: { regex: "^https?://internal\\." }
    then: BLOCK
"#,
        );
        let ctx = CheckContext::default();
        assert!(set
            .find_match("read_file", &json!({"path": "/etc/passwd"}), &no_session(), &ctx)
            .is_some());
        assert!(set
            .find_match("read_file", &json!({"path": "/tmp/x"}), &no_session(), &ctx)
            .is_none());
        // Numeric coercion from string
        assert!(set
            .find_match("transfer", &json!({"amount": "2000"}), &no_session(), &ctx)
            .is_some());
        // Non-numeric never satisfies gt
        assert!(set
            .find_match("transfer", &json!({"amount": "lots"}), &no_session(), &ctx)
            .is_none());
        // Case-insensitive regex search
        assert!(set
            .find_match("fetch", &json!({"url": "HTTPS://INTERNAL.corp"}), &no_session(), &ctx)
            .is_some());
    }

    #[test]
    fn test_absent_key_satisfies_only_negative_predicates() {
        let pred = CompiledPredicate::NotContains("x".to_string());
        assert!(pred.holds(None));
        let pred = CompiledPredicate::Contains("x".to_string());
        assert!(!pred.holds(None));
    }

    #[test]
    fn test_session_count_predicate() {
        let set = compiled(
            r#"
rules:
  - id: too-many-reads
    tool: read_db
    session:
      tool_count.read_db: { gt: 2 }
    then: BLOCK
"#,
        );
        let ctx = CheckContext::default();
        let mut snap = SessionSnapshot::default();
        assert!(set
            .find_match("read_db", &json!({}), &snap, &ctx)
            .is_none());
        snap.tool_counts.insert("read_db".to_string(), 3);
        assert!(set.find_match("read_db", &json!({}), &snap, &ctx).is_some());
    }

    #[test]
    fn test_chain_matching_within_window() {
        let set = compiled(
            r#"
rules:
  - id: exfil-chain
    tool: web_fetch
    chain:
      - { tool: read_db, within_seconds: 120 }
    then: BLOCK
"#,
        );
        let ctx = CheckContext::default();
        let mut snap = SessionSnapshot::default();
        assert!(set
            .find_match("web_fetch", &json!({}), &snap, &ctx)
            .is_none());
        snap.events.push(SessionEvent {
            tool: "read_db".to_string(),
            verdict: Verdict::Allow,
            at: Instant::now(),
        });
        assert!(set.find_match("web_fetch", &json!({}), &snap, &ctx).is_some());
    }

    #[test]
    fn test_chain_ordered_steps() {
        let steps = vec![
            ChainStep { tool: "a".to_string(), within_seconds: 300 },
            ChainStep { tool: "b".to_string(), within_seconds: 300 },
        ];
        let now = Instant::now();
        let ev = |tool: &str| SessionEvent {
            tool: tool.to_string(),
            verdict: Verdict::Allow,
            at: now,
        };
        // a then b: matches
        assert!(chain_matches(&steps, &[ev("a"), ev("b")], now));
        // b then a: step order violated
        assert!(!chain_matches(&steps, &[ev("b"), ev("a")], now));
    }

    #[test]
    fn test_context_role_match() {
        let set = compiled(
            r#"
rules:
  - id: interns-cannot-deploy
    tool: deploy
    context: { user_role: intern }
    then: BLOCK
"#,
        );
        let snap = SessionSnapshot::default();
        let intern = CheckContext {
            sender: Some("intern".to_string()),
            environment: None,
        };
        let admin = CheckContext {
            sender: Some("admin".to_string()),
            environment: None,
        };
        assert!(set.find_match("deploy", &json!({}), &snap, &intern).is_some());
        assert!(set.find_match("deploy", &json!({}), &snap, &admin).is_none());
    }

    #[test]
    fn test_bad_regex_rejects_load() {
        let src = rule_src(
            r#"
rules:
  - id: broken
    tool: x
    args_match:
      a: { regex: "([unclosed" }
    then: BLOCK
"#,
        );
        assert!(matches!(
            CompiledRuleSet::compile(&src, None),
            Err(ShieldError::RuleCompile(_))
        ));
    }

    #[test]
    fn test_regex_source_cap() {
        let long = "a".repeat(501);
        let rule = Rule {
            id: "long".to_string(),
            tool: Some(ToolSelector::One("x".to_string())),
            args_match: Some(
                [("a".to_string(), ArgPredicate::Regex(long))]
                    .into_iter()
                    .collect(),
            ),
            session: None,
            context: None,
            chain: None,
            then: Verdict::Block,
            message: None,
            severity: Default::default(),
            approval_strategy: Default::default(),
            pii_action: None,
        };
        let src = RuleSetSource {
            rules: vec![rule],
            ..Default::default()
        };
        assert!(CompiledRuleSet::compile(&src, None).is_err());
    }

    #[test]
    fn test_time_window_parsing() {
        assert!(parse_time_window("09:00-17:30").is_ok());
        assert!(parse_time_window("9am-5pm").is_err());
        assert!(parse_time_window("09:00").is_err());
    }

    #[test]
    fn test_rate_limit_scope() {
        let set = compiled(
            r#"
rate_limits:
  - { id: global, max_calls: 10, window_seconds: 60 }
  - { id: deletes, tool: "delete_*", max_calls: 1, window_seconds: 60 }
"#,
        );
        let global = &set.rate_limits[0];
        let deletes = &set.rate_limits[1];
        assert!(global.applies_to("anything"));
        assert!(deletes.applies_to("delete_file"));
        assert!(!deletes.applies_to("read_file"));
    }

    #[test]
    fn test_summary_mentions_honeypots() {
        let set = compiled(
            r#"
rules:
  - { id: r1, tool: x, then: BLOCK }
honeypots: [export_all_data]
"#,
        );
        let summary = set.summary();
        assert!(summary.contains("rules=1"));
        assert!(summary.contains("export_all_data"));
    }
}
