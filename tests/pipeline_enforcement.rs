//! Integration tests for the check pipeline.
//! Covers:
//! - Rule verdicts (block, redact, chain)
//! - Kill switch and honeypot domination
//! - Audit-mode shadowing with trace visibility
//! - Counter advancement policy and fail modes

use policyshield::approval::{ApprovalConfig, InMemoryApprovalBackend};
use policyshield::config::Config;
use policyshield::engine::matcher::CompiledRuleSet;
use policyshield::engine::shield::ShieldEngine;
use policyshield::engine_core::models::{TraceEntry, Verdict};
use policyshield::engine_core::trace::TraceRecorder;
use policyshield::utils::loader::parse_rule_set;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

// --- Helpers ---

fn engine_with(yaml: &str) -> ShieldEngine {
    engine_with_config(yaml, Config::default())
}

fn engine_with_config(yaml: &str, config: Config) -> ShieldEngine {
    let source = parse_rule_set(yaml).expect("test rules parse");
    let ruleset =
        CompiledRuleSet::compile(&source, config.mode_override).expect("test rules compile");
    ShieldEngine::new(
        Arc::new(config),
        ruleset,
        Arc::new(InMemoryApprovalBackend::new(ApprovalConfig::default())),
        TraceRecorder::disabled(),
    )
}

fn engine_with_trace(yaml: &str, path: &std::path::Path) -> ShieldEngine {
    let source = parse_rule_set(yaml).expect("test rules parse");
    let ruleset = CompiledRuleSet::compile(&source, None).expect("test rules compile");
    ShieldEngine::new(
        Arc::new(Config::default()),
        ruleset,
        Arc::new(InMemoryApprovalBackend::new(ApprovalConfig::default())),
        TraceRecorder::open(Some(path)).expect("trace opens"),
    )
}

fn read_trace(path: &std::path::Path) -> Vec<TraceEntry> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("trace line parses"))
        .collect()
}

// --- Tests ---

#[tokio::test]
async fn test_block_rule_and_counter_stays_zero() {
    let engine = engine_with(
        r#"
rules:
  - id: no-deletes
    tool: delete_file
    then: BLOCK
    message: no deletes
"#,
    );
    let result = engine
        .check("delete_file", &json!({"path": "/x"}), Some("s"), None, None)
        .await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("no-deletes"));
    assert_eq!(result.message, "no deletes");
    // Counters advance only on success
    assert_eq!(engine.sessions().tool_count("s", "delete_file"), 0);
}

#[tokio::test]
async fn test_redact_rule_rewrites_args() {
    let engine = engine_with(
        r#"
rules:
  - id: redact-messages
    tool: [send_msg, send_email]
    then: REDACT
"#,
    );
    let result = engine
        .check(
            "send_msg",
            &json!({"text": "mail me john@corp.com"}),
            Some("s"),
            None,
            None,
        )
        .await;
    assert_eq!(result.verdict, Verdict::Redact);
    assert_eq!(
        result.modified_args,
        Some(json!({"text": "mail me [EMAIL]"}))
    );
    assert_eq!(result.pii_types, vec!["EMAIL".to_string()]);
    // REDACT advances the counter
    assert_eq!(engine.sessions().tool_count("s", "send_msg"), 1);
}

#[tokio::test]
async fn test_chain_rule_blocks_fetch_after_db_read() {
    let engine = engine_with(
        r#"
rules:
  - id: exfil-chain
    tool: web_fetch
    chain:
      - { tool: read_db, within_seconds: 120 }
    then: BLOCK
"#,
    );
    let first = engine.check("read_db", &json!({}), Some("s"), None, None).await;
    assert_eq!(first.verdict, Verdict::Allow);

    let second = engine
        .check("web_fetch", &json!({"url": "https://x"}), Some("s"), None, None)
        .await;
    assert_eq!(second.verdict, Verdict::Block);
    assert_eq!(second.rule_id.as_deref(), Some("exfil-chain"));

    // Other sessions have no such history
    let other = engine
        .check("web_fetch", &json!({"url": "https://x"}), Some("t"), None, None)
        .await;
    assert_eq!(other.verdict, Verdict::Allow);
}

#[tokio::test]
async fn test_kill_switch_dominates_allow_rules() {
    let engine = engine_with(
        r#"
rules:
  - id: reads-ok
    tool: read_file
    then: ALLOW
"#,
    );
    engine.kill(Some("incident".to_string()));
    let result = engine
        .check("read_file", &json!({"path": "/tmp/a"}), Some("s"), None, None)
        .await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("__kill_switch__"));
    assert_eq!(result.message, "incident");

    engine.resume();
    let result = engine
        .check("read_file", &json!({"path": "/tmp/a"}), Some("s"), None, None)
        .await;
    assert_eq!(result.verdict, Verdict::Allow);
}

#[tokio::test]
async fn test_honeypot_blocks_and_traces_critical() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let engine = engine_with_trace(
        r#"
honeypots: [export_all_data]
"#,
        &path,
    );
    let result = engine
        .check("export_all_data", &json!({}), Some("s"), None, None)
        .await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("__honeypot__"));

    engine.shutdown();
    let entries = read_trace(&path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].verdict, Verdict::Block);
    assert_eq!(
        entries[0].severity,
        Some(policyshield::engine_core::models::Severity::Critical)
    );
}

#[tokio::test]
async fn test_audit_mode_returns_allow_but_traces_shadow_verdict() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.jsonl");
    let engine = engine_with_trace(
        r#"
mode: audit
rules:
  - id: no-deletes
    tool: delete_file
    then: BLOCK
"#,
        &path,
    );
    let result = engine
        .check("delete_file", &json!({}), Some("s"), None, None)
        .await;
    // Caller sees ALLOW
    assert_eq!(result.verdict, Verdict::Allow);
    // Counter did not advance: the computed verdict was BLOCK
    assert_eq!(engine.sessions().tool_count("s", "delete_file"), 0);

    engine.shutdown();
    let entries = read_trace(&path);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].verdict, Verdict::Block);
    assert_eq!(
        entries[0].mode,
        Some(policyshield::engine_core::models::Mode::Audit)
    );
}

#[tokio::test]
async fn test_audit_mode_does_not_shadow_kill() {
    let engine = engine_with("mode: audit\n");
    engine.kill(None);
    let result = engine.check("anything", &json!({}), Some("s"), None, None).await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("__kill_switch__"));
}

#[tokio::test]
async fn test_disabled_mode_short_circuits() {
    let engine = engine_with(
        r#"
mode: disabled
rules:
  - id: no-deletes
    tool: delete_file
    then: BLOCK
"#,
    );
    let result = engine
        .check("delete_file", &json!({}), Some("s"), None, None)
        .await;
    assert_eq!(result.verdict, Verdict::Allow);
}

#[tokio::test]
async fn test_sanitizer_rejection_blocks_with_sentinel_rule_id() {
    let engine = engine_with("{}");
    let result = engine
        .check(
            "read_file",
            &json!({"path": "../../etc/passwd"}),
            Some("s"),
            None,
            None,
        )
        .await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("__sanitizer__"));
    assert!(result.message.contains("path_traversal"));
}

#[tokio::test]
async fn test_rate_limit_blocks_third_call() {
    let engine = engine_with(
        r#"
rate_limits:
  - { id: read-burst, tool: read_file, max_calls: 2, window_seconds: 60 }
"#,
    );
    for _ in 0..2 {
        let ok = engine
            .check("read_file", &json!({}), Some("s"), None, None)
            .await;
        assert_eq!(ok.verdict, Verdict::Allow);
    }
    let third = engine
        .check("read_file", &json!({}), Some("s"), None, None)
        .await;
    assert_eq!(third.verdict, Verdict::Block);
    assert_eq!(third.rule_id.as_deref(), Some("read-burst"));
    // Session isolation: another session still admitted
    let other = engine
        .check("read_file", &json!({}), Some("t"), None, None)
        .await;
    assert_eq!(other.verdict, Verdict::Allow);
}

#[tokio::test]
async fn test_pii_action_escalates_allow_to_block() {
    let engine = engine_with(
        r#"
rules:
  - id: emails-ok-unless-pii
    tool: send_email
    then: ALLOW
    pii_action: BLOCK
"#,
    );
    let clean = engine
        .check("send_email", &json!({"body": "hello"}), Some("s"), None, None)
        .await;
    assert_eq!(clean.verdict, Verdict::Allow);

    let tainted = engine
        .check(
            "send_email",
            &json!({"body": "ssn 123-45-6789"}),
            Some("s"),
            None,
            None,
        )
        .await;
    assert_eq!(tainted.verdict, Verdict::Block);
}

#[tokio::test]
async fn test_default_verdict_applies_without_match() {
    let engine = engine_with(
        r#"
default_verdict: BLOCK
rules:
  - id: reads-ok
    tool: read_file
    then: ALLOW
"#,
    );
    let allowed = engine.check("read_file", &json!({}), Some("s"), None, None).await;
    assert_eq!(allowed.verdict, Verdict::Allow);
    let denied = engine.check("anything_else", &json!({}), Some("s"), None, None).await;
    assert_eq!(denied.verdict, Verdict::Block);
    assert_eq!(denied.rule_id, None);
}

#[tokio::test]
async fn test_engine_timeout_fails_closed_by_default() {
    let config = Config {
        engine_timeout: Duration::from_nanos(1),
        ..Default::default()
    };
    let engine = engine_with_config("{}", config);
    let result = engine.check("read_file", &json!({}), Some("s"), None, None).await;
    assert_eq!(result.verdict, Verdict::Block);
    assert_eq!(result.rule_id.as_deref(), Some("__error__"));
}

#[tokio::test]
async fn test_engine_timeout_fails_open_when_configured() {
    let config = Config {
        engine_timeout: Duration::from_nanos(1),
        fail_open: true,
        ..Default::default()
    };
    let engine = engine_with_config("{}", config);
    let result = engine.check("read_file", &json!({}), Some("s"), None, None).await;
    assert_eq!(result.verdict, Verdict::Allow);
}

#[tokio::test]
async fn test_kill_is_unaffected_by_fail_open() {
    let config = Config {
        fail_open: true,
        ..Default::default()
    };
    let engine = engine_with_config("{}", config);
    engine.kill(Some("incident".to_string()));
    let result = engine.check("x", &json!({}), Some("s"), None, None).await;
    assert_eq!(result.verdict, Verdict::Block);
}

#[tokio::test]
async fn test_post_check_taints_session_and_redacts() {
    let engine = engine_with("{}");
    let outcome = engine.post_check(
        "read_db",
        "row: john@corp.com, card 4111 1111 1111 1111",
        Some("s"),
    );
    assert!(outcome.pii_types.contains(&"EMAIL".to_string()));
    assert!(outcome.pii_types.contains(&"CREDIT_CARD".to_string()));
    assert!(outcome.redacted_result.contains("[EMAIL]"));
    assert!(outcome.redacted_result.contains("[CREDIT_CARD]"));
    assert_eq!(
        engine.sessions().taints("s"),
        vec!["CREDIT_CARD".to_string(), "EMAIL".to_string()]
    );
}

#[tokio::test]
async fn test_post_check_feeds_chain_rules() {
    let engine = engine_with(
        r#"
rules:
  - id: after-read
    tool: send_email
    chain:
      - { tool: read_db, within_seconds: 60 }
    then: BLOCK
"#,
    );
    // The pre-check for read_db is blocked from the ring? No: post_check records it.
    engine.post_check("read_db", "data", Some("s"));
    let result = engine.check("send_email", &json!({}), Some("s"), None, None).await;
    assert_eq!(result.verdict, Verdict::Block);
}

#[tokio::test]
async fn test_session_isolation_for_counters() {
    let engine = engine_with("{}");
    for _ in 0..3 {
        engine.check("tool_a", &json!({}), Some("a"), None, None).await;
    }
    engine.check("tool_a", &json!({}), Some("b"), None, None).await;
    assert_eq!(engine.sessions().tool_count("a", "tool_a"), 3);
    assert_eq!(engine.sessions().tool_count("b", "tool_a"), 1);
}

#[tokio::test]
async fn test_request_id_passthrough_and_generation() {
    let engine = engine_with("{}");
    let given = engine
        .check("t", &json!({}), Some("s"), None, Some("req-42".to_string()))
        .await;
    assert_eq!(given.request_id, "req-42");
    let generated = engine.check("t", &json!({}), Some("s"), None, None).await;
    assert!(!generated.request_id.is_empty());
}
