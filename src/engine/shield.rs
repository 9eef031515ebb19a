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

//! Shield engine.
//!
//! The central brain of PolicyShield. It owns the current rule set, the
//! kill switch, session state, the approval caches, and the trace recorder,
//! and runs the full check pipeline in strict order: mode gate, kill
//! switch, honeypot, sanitizer, rate limits, matcher, verdict shaping,
//! session update, audit override, trace. It is pure enforcement logic and
//! does not know about HTTP.

use crate::approval::{sanitize_args_for_exposure, ApprovalBackend};
use crate::config::Config;
use crate::engine::matcher::{CheckContext, CompiledRuleSet};
use crate::engine_core::constants::{defaults, rule_ids, session as session_consts};
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{
    ApprovalRequest, ApprovalResponse, ApprovalSnapshot, ApprovalStatus, ApprovalStrategy,
    ApprovalTraceInfo, Mode, PostCheckOutcome, RuleSetSource, Severity, ShieldResult, TraceEntry,
    Verdict,
};
use crate::engine_core::session::SessionManager;
use crate::engine_core::trace::TraceRecorder;
use crate::utils::time;
use chrono::{DateTime, Utc};
use lru::LruCache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

/// Metadata mirror for an in-flight approval, used to resolve it into the
/// strategy-keyed verdict cache once a response (or timeout) lands.
#[derive(Clone)]
struct ApprovalMeta {
    rule_id: Option<String>,
    strategy_key: String,
    tool: String,
    session_id: String,
    severity: Severity,
    submitted_at: DateTime<Utc>,
    created: Instant,
}

#[derive(Clone, Copy)]
struct ResolvedApproval {
    verdict: Verdict,
    created: Instant,
}

/// Outcome of pipeline stages 4-7 before result shaping.
enum PipelineDecision {
    Allow {
        rule_id: Option<String>,
        message: String,
    },
    Block {
        rule_id: Option<String>,
        message: String,
        severity: Option<Severity>,
    },
    Redact {
        rule_id: Option<String>,
        message: String,
        modified_args: Value,
        pii_types: Vec<String>,
    },
    NeedsApproval {
        rule_id: Option<String>,
        message: String,
        strategy: ApprovalStrategy,
        severity: Severity,
    },
    PendingApproval {
        rule_id: Option<String>,
        message: String,
        approval_id: String,
        severity: Severity,
    },
}

pub struct ShieldEngine {
    config: Arc<Config>,
    rules: RwLock<Arc<CompiledRuleSet>>,
    killed: AtomicBool,
    kill_reason: Mutex<String>,
    sessions: Arc<SessionManager>,
    approvals: Arc<dyn ApprovalBackend>,
    approval_meta: Mutex<LruCache<String, ApprovalMeta>>,
    resolved_approvals: Mutex<LruCache<String, ResolvedApproval>>,
    trace: Arc<TraceRecorder>,
    reload_lock: tokio::sync::Mutex<()>,
}

impl ShieldEngine {
    pub fn new(
        config: Arc<Config>,
        ruleset: CompiledRuleSet,
        approvals: Arc<dyn ApprovalBackend>,
        trace: TraceRecorder,
    ) -> Self {
        let sessions = Arc::new(SessionManager::new(config.max_sessions, config.session_ttl));
        let meta_cap = NonZeroUsize::new(defaults::MAX_APPROVAL_META).expect("nonzero");
        let resolved_cap = NonZeroUsize::new(defaults::MAX_RESOLVED_APPROVALS).expect("nonzero");
        Self {
            config,
            rules: RwLock::new(Arc::new(ruleset)),
            killed: AtomicBool::new(false),
            kill_reason: Mutex::new(String::new()),
            sessions,
            approvals,
            approval_meta: Mutex::new(LruCache::new(meta_cap)),
            resolved_approvals: Mutex::new(LruCache::new(resolved_cap)),
            trace: Arc::new(trace),
            reload_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Stable reference to the current rule set; a reload never tears a
    /// check that already holds one.
    fn current_rules(&self) -> Arc<CompiledRuleSet> {
        match self.rules.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    pub fn rules_count(&self) -> usize {
        self.current_rules().rules_count()
    }

    pub fn mode(&self) -> Mode {
        self.current_rules().mode
    }

    pub fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Acquire)
    }

    pub fn kill_reason(&self) -> String {
        match self.kill_reason.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn policy_summary(&self) -> String {
        self.current_rules().summary()
    }

    /// Activate the kill switch. Every subsequent check blocks until
    /// `resume`, regardless of mode or rules.
    pub fn kill(&self, reason: Option<String>) {
        let reason = reason.unwrap_or_else(|| "Kill switch activated".to_string());
        match self.kill_reason.lock() {
            Ok(mut guard) => *guard = reason.clone(),
            Err(poisoned) => *poisoned.into_inner() = reason.clone(),
        }
        self.killed.store(true, Ordering::Release);
        error!(%reason, "kill switch activated");
    }

    pub fn resume(&self) {
        self.killed.store(false, Ordering::Release);
        match self.kill_reason.lock() {
            Ok(mut guard) => guard.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
        info!("kill switch cleared");
    }

    /// Two-phase hot reload: compile fully outside the lock, then swap the
    /// pointer atomically. On compile failure the old set stays active.
    /// Returns (old_count, new_count).
    pub async fn reload(&self, source: &RuleSetSource) -> Result<(usize, usize), ShieldError> {
        let new_set = Arc::new(CompiledRuleSet::compile(source, self.config.mode_override)?);
        let new_count = new_set.rules_count();
        let valid_limits = new_set.rate_limit_ids();

        let _serialized = self.reload_lock.lock().await;
        let old_count = {
            let mut guard = match self.rules.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            let old_count = guard.rules_count();
            *guard = new_set;
            old_count
        };
        // Windows keyed by surviving limit ids keep their history
        self.sessions.retain_rate_limits(&valid_limits);
        info!(old_count, new_count, "rule set reloaded");
        Ok((old_count, new_count))
    }

    /// Flush trace buffers and stop approval background work.
    pub fn shutdown(&self) {
        self.approvals.stop();
        self.trace.flush();
    }

    /// Pre-call check: the full pipeline.
    pub async fn check(
        &self,
        tool: &str,
        args: &Value,
        session_id: Option<&str>,
        sender: Option<&str>,
        request_id: Option<String>,
    ) -> ShieldResult {
        let start = Instant::now();
        let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        let session_id = session_id
            .unwrap_or(session_consts::DEFAULT_SESSION_ID)
            .to_string();
        let ruleset = self.current_rules();

        // 1. Mode gate: DISABLED short-circuits before any check
        if ruleset.mode == Mode::Disabled {
            return ShieldResult {
                verdict: Verdict::Allow,
                rule_id: None,
                message: "Policy enforcement disabled".to_string(),
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms: elapsed_ms(start),
            };
        }

        // 2. Kill switch: overrides audit, unaffected by fail mode
        if self.is_killed() {
            let message = self.kill_reason();
            let result = ShieldResult {
                verdict: Verdict::Block,
                rule_id: Some(rule_ids::KILL_SWITCH.to_string()),
                message,
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms: elapsed_ms(start),
            };
            self.record_trace(
                &session_id,
                tool,
                &result,
                None,
                None,
                Some(Severity::Critical),
                None,
            );
            return result;
        }

        // 3. Honeypot: calling a declared-nonexistent tool is anomalous
        if ruleset.is_honeypot(tool) {
            error!(tool, session_id = %session_id, "honeypot tool invoked");
            let result = ShieldResult {
                verdict: Verdict::Block,
                rule_id: Some(rule_ids::HONEYPOT.to_string()),
                message: format!("Tool '{tool}' does not exist"),
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms: elapsed_ms(start),
            };
            self.record_trace(
                &session_id,
                tool,
                &result,
                None,
                None,
                Some(Severity::Critical),
                None,
            );
            return result;
        }

        // 4-7. Sanitizer, rate limits, matcher, verdict shaping, bounded by
        // the engine timeout. Any failure maps to the configured fail mode.
        let engine_timeout = self.config.engine_timeout;
        let evaluated = match tokio::time::timeout(
            engine_timeout,
            self.evaluate(Arc::clone(&ruleset), tool, args, &session_id, sender),
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(ShieldError::Timeout(engine_timeout)),
        };

        match evaluated {
            Ok(decision) => {
                let (mut result, severity, approval_info) =
                    shape_result(decision, request_id, elapsed_ms(start));

                // 8. Counters advance only for ALLOW/REDACT
                if matches!(result.verdict, Verdict::Allow | Verdict::Redact) {
                    self.sessions
                        .record_outcome(&session_id, tool, result.verdict);
                }

                // 9. Audit override: server-side only, shadow verdict traced
                let shadowed = ruleset.mode == Mode::Audit && result.verdict != Verdict::Allow;

                // 10. Trace the computed verdict
                self.record_trace(
                    &session_id,
                    tool,
                    &result,
                    approval_info,
                    shadowed.then_some(Mode::Audit),
                    severity,
                    None,
                );

                if shadowed {
                    result.verdict = Verdict::Allow;
                }
                result.latency_ms = elapsed_ms(start);
                result
            }
            Err(e) => {
                let verdict = if self.config.fail_open {
                    Verdict::Allow
                } else {
                    Verdict::Block
                };
                warn!(error = %e, tool, fail_open = self.config.fail_open, "check pipeline failed");
                let result = ShieldResult {
                    verdict,
                    rule_id: Some(rule_ids::PIPELINE_ERROR.to_string()),
                    message: "Policy check failed".to_string(),
                    modified_args: None,
                    pii_types: Vec::new(),
                    approval_id: None,
                    request_id,
                    latency_ms: elapsed_ms(start),
                };
                self.record_trace(
                    &session_id,
                    tool,
                    &result,
                    None,
                    None,
                    None,
                    Some(e.kind().to_string()),
                );
                result
            }
        }
    }

    /// Stages 4-6 plus the synchronous half of verdict shaping run on the
    /// blocking pool; approval submission happens afterwards on the async
    /// side.
    async fn evaluate(
        &self,
        ruleset: Arc<CompiledRuleSet>,
        tool: &str,
        args: &Value,
        session_id: &str,
        sender: Option<&str>,
    ) -> Result<PipelineDecision, ShieldError> {
        let sessions = Arc::clone(&self.sessions);
        let ctx = CheckContext {
            sender: sender.map(str::to_string),
            environment: self.config.environment.clone(),
        };
        let tool_owned = tool.to_string();
        let args_owned = args.clone();
        let sid = session_id.to_string();
        let cpu_ruleset = Arc::clone(&ruleset);

        let decision = tokio::task::spawn_blocking(move || -> Result<PipelineDecision, ShieldError> {
            // 4. Sanitizer
            let cleaned = match cpu_ruleset.sanitizer.sanitize(&args_owned) {
                Ok(value) => value,
                Err(rejection) => {
                    return Ok(PipelineDecision::Block {
                        rule_id: Some(rule_ids::SANITIZER.to_string()),
                        message: rejection.reason,
                        severity: rejection.severity,
                    })
                }
            };

            // 5. Rate limits scoped to this tool
            for limit in &cpu_ruleset.rate_limits {
                if limit.applies_to(&tool_owned)
                    && !sessions.admit_rate(&sid, &limit.id, limit.max_calls, limit.window)
                {
                    return Ok(PipelineDecision::Block {
                        rule_id: Some(limit.id.clone()),
                        message: limit.message.clone(),
                        severity: None,
                    });
                }
            }

            // 6. Matcher: first rule in source order wins
            let snapshot = sessions.snapshot(&sid);
            let matched = cpu_ruleset.find_match(&tool_owned, &cleaned, &snapshot, &ctx);

            let (mut verdict, rule_id, message, severity, strategy, pii_action) = match matched {
                Some(rule) => (
                    rule.source.then,
                    Some(rule.source.id.clone()),
                    rule.source
                        .message
                        .clone()
                        .unwrap_or_else(|| default_message(rule.source.then, &rule.source.id)),
                    rule.source.severity,
                    rule.source.approval_strategy,
                    rule.source.pii_action,
                ),
                None => (
                    cpu_ruleset.default_verdict,
                    None,
                    default_message(cpu_ruleset.default_verdict, "default"),
                    Severity::default(),
                    ApprovalStrategy::default(),
                    None,
                ),
            };

            // 7. Verdict shaping, including PII escalation
            let mut pii_types = Vec::new();
            if let Some(stronger) = pii_action {
                let detected = cpu_ruleset.pii.detect(&cleaned.to_string());
                if !detected.is_empty() {
                    verdict = stronger;
                    pii_types = detected;
                }
            }

            match verdict {
                Verdict::Allow => Ok(PipelineDecision::Allow { rule_id, message }),
                Verdict::Block => Ok(PipelineDecision::Block {
                    rule_id,
                    message,
                    severity: Some(severity),
                }),
                Verdict::Redact => {
                    let (modified_args, kinds) = cpu_ruleset.pii.redact_value(&cleaned);
                    for kind in kinds {
                        if !pii_types.contains(&kind) {
                            pii_types.push(kind);
                        }
                    }
                    Ok(PipelineDecision::Redact {
                        rule_id,
                        message,
                        modified_args,
                        pii_types,
                    })
                }
                Verdict::Approve => Ok(PipelineDecision::NeedsApproval {
                    rule_id,
                    message,
                    strategy,
                    severity,
                }),
            }
        })
        .await
        .map_err(|e| ShieldError::Internal(format!("evaluation task failed: {e}")))??;

        // 7b. Approval cache lookup / submission (async)
        match decision {
            PipelineDecision::NeedsApproval {
                rule_id,
                message,
                strategy,
                severity,
            } => {
                self.resolve_or_submit_approval(
                    ruleset, tool, args, session_id, rule_id, message, strategy, severity,
                )
                .await
            }
            other => Ok(other),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn resolve_or_submit_approval(
        &self,
        ruleset: Arc<CompiledRuleSet>,
        tool: &str,
        args: &Value,
        session_id: &str,
        rule_id: Option<String>,
        message: String,
        strategy: ApprovalStrategy,
        severity: Severity,
    ) -> Result<PipelineDecision, ShieldError> {
        let key = strategy_key(
            strategy,
            rule_id.as_deref().unwrap_or("default"),
            tool,
            session_id,
            args,
        );

        if let Some(prior) = self.lookup_resolved(&key) {
            return Ok(match prior.verdict {
                Verdict::Allow => PipelineDecision::Allow {
                    rule_id,
                    message: "Previously approved".to_string(),
                },
                _ => PipelineDecision::Block {
                    rule_id,
                    message: "Previously denied".to_string(),
                    severity: Some(severity),
                },
            });
        }

        let approval_id = Uuid::new_v4().to_string();
        let submitted_at = Utc::now();
        let request = ApprovalRequest {
            id: approval_id.clone(),
            tool: tool.to_string(),
            args: sanitize_args_for_exposure(&ruleset.pii, args),
            rule_id: rule_id.clone().unwrap_or_else(|| "default".to_string()),
            message: message.clone(),
            session_id: session_id.to_string(),
            created_at: submitted_at,
            status: ApprovalStatus::Pending,
            responder: None,
            responded_at: None,
            comment: None,
        };
        self.approvals.submit(request).await?;
        self.remember_meta(
            &approval_id,
            ApprovalMeta {
                rule_id: rule_id.clone(),
                strategy_key: key,
                tool: tool.to_string(),
                session_id: session_id.to_string(),
                severity,
                submitted_at,
                created: Instant::now(),
            },
        );
        Ok(PipelineDecision::PendingApproval {
            rule_id,
            message,
            approval_id,
            severity,
        })
    }

    /// Post-call check: PII scan over the stringified result. Updates the
    /// session taint set and pushes a post-verdict event for chain rules.
    pub fn post_check(&self, tool: &str, result: &str, session_id: Option<&str>) -> PostCheckOutcome {
        let start = Instant::now();
        let session_id = session_id
            .unwrap_or(session_consts::DEFAULT_SESSION_ID)
            .to_string();
        let ruleset = self.current_rules();
        if ruleset.mode == Mode::Disabled {
            return PostCheckOutcome {
                pii_types: Vec::new(),
                redacted_result: result.to_string(),
            };
        }

        let (redacted_result, pii_types) = ruleset.pii.redact(result);
        if !pii_types.is_empty() {
            self.sessions.add_taints(&session_id, &pii_types);
        }
        self.sessions.record_event(&session_id, tool, Verdict::Allow);

        self.trace.record(&TraceEntry {
            timestamp: time::now(),
            session_id,
            tool: tool.to_string(),
            verdict: Verdict::Allow,
            rule_id: None,
            latency_ms: elapsed_ms(start),
            pii_types: (!pii_types.is_empty()).then(|| pii_types.clone()),
            approval: None,
            severity: None,
            mode: None,
            error: None,
        });

        PostCheckOutcome {
            pii_types,
            redacted_result,
        }
    }

    /// Status poll for one approval. Terminal states are folded into the
    /// strategy-keyed cache so equivalent later calls skip the prompt.
    pub async fn get_approval_status(
        &self,
        approval_id: &str,
    ) -> Result<Option<ApprovalSnapshot>, ShieldError> {
        let snapshot = self.approvals.get_status(approval_id).await?;
        if let Some(snapshot) = &snapshot {
            if snapshot.status != ApprovalStatus::Pending {
                self.finalize_approval(approval_id, snapshot);
            }
        }
        Ok(snapshot)
    }

    /// Record a human response. Duplicates are ignored (first response
    /// wins); the terminal state is cached immediately.
    pub async fn respond_approval(
        &self,
        approval_id: &str,
        approved: bool,
        responder: &str,
        comment: Option<String>,
    ) -> Result<bool, ShieldError> {
        let accepted = self
            .approvals
            .respond(approval_id, approved, responder, comment)
            .await?;
        if let Some(snapshot) = self.approvals.get_status(approval_id).await? {
            if snapshot.status != ApprovalStatus::Pending {
                self.finalize_approval(approval_id, &snapshot);
            }
        }
        Ok(accepted)
    }

    /// Block until the approval resolves or `timeout` elapses. Interruptible:
    /// dropping the future abandons the wait without losing the response.
    pub async fn wait_for_approval(
        &self,
        approval_id: &str,
        timeout: Duration,
    ) -> Result<Option<ApprovalResponse>, ShieldError> {
        let response = self.approvals.wait_for_response(approval_id, timeout).await?;
        if response.is_some() {
            if let Some(snapshot) = self.approvals.get_status(approval_id).await? {
                self.finalize_approval(approval_id, &snapshot);
            }
        }
        Ok(response)
    }

    pub async fn pending_approvals(&self) -> Result<Vec<ApprovalRequest>, ShieldError> {
        self.approvals.pending().await
    }

    fn finalize_approval(&self, approval_id: &str, snapshot: &ApprovalSnapshot) {
        let meta = {
            let mut guard = lock_lru(&self.approval_meta);
            guard.pop(approval_id)
        };
        let Some(meta) = meta else {
            return;
        };

        let ruleset = self.current_rules();
        let verdict = match snapshot.status {
            ApprovalStatus::Approved => Verdict::Allow,
            ApprovalStatus::Denied => Verdict::Block,
            ApprovalStatus::Timeout => snapshot
                .auto_verdict
                .unwrap_or(ruleset.approval_auto_verdict),
            ApprovalStatus::Pending => return,
        };
        {
            let mut guard = lock_lru(&self.resolved_approvals);
            guard.put(
                meta.strategy_key.clone(),
                ResolvedApproval {
                    verdict,
                    created: Instant::now(),
                },
            );
        }

        let response_time_ms = snapshot
            .responded_at
            .map(|at| (at - meta.submitted_at).num_milliseconds() as f64);
        self.trace.record(&TraceEntry {
            timestamp: time::now(),
            session_id: meta.session_id.clone(),
            tool: meta.tool.clone(),
            verdict,
            rule_id: meta.rule_id.clone(),
            latency_ms: 0.0,
            pii_types: None,
            approval: Some(ApprovalTraceInfo {
                approval_id: approval_id.to_string(),
                status: snapshot.status,
                responder: snapshot.responder.clone(),
                responded_at: snapshot.responded_at,
                response_time_ms,
            }),
            severity: Some(meta.severity),
            mode: None,
            error: None,
        });
        info!(
            approval_id,
            status = snapshot.status.as_str(),
            verdict = verdict.as_str(),
            "approval resolved"
        );
    }

    fn lookup_resolved(&self, key: &str) -> Option<ResolvedApproval> {
        let ttl = self.config.approval_ttl;
        let mut guard = lock_lru(&self.resolved_approvals);
        match guard.get(key) {
            Some(entry) if entry.created.elapsed() <= ttl => Some(*entry),
            Some(_) => {
                guard.pop(key);
                None
            }
            None => None,
        }
    }

    fn remember_meta(&self, approval_id: &str, meta: ApprovalMeta) {
        let ttl = self.config.approval_ttl;
        let mut guard = lock_lru(&self.approval_meta);
        // Amortized TTL cleanup: drop the stalest entry if expired
        if let Some((key, entry)) = guard.peek_lru() {
            if entry.created.elapsed() > ttl {
                let key = key.clone();
                guard.pop(&key);
            }
        }
        guard.put(approval_id.to_string(), meta);
    }

    #[allow(clippy::too_many_arguments)]
    fn record_trace(
        &self,
        session_id: &str,
        tool: &str,
        result: &ShieldResult,
        approval: Option<ApprovalTraceInfo>,
        mode: Option<Mode>,
        severity: Option<Severity>,
        error: Option<String>,
    ) {
        self.trace.record(&TraceEntry {
            timestamp: time::now(),
            session_id: session_id.to_string(),
            tool: tool.to_string(),
            verdict: result.verdict,
            rule_id: result.rule_id.clone(),
            latency_ms: result.latency_ms,
            pii_types: (!result.pii_types.is_empty()).then(|| result.pii_types.clone()),
            approval,
            severity,
            mode,
            error,
        });
    }
}

fn lock_lru<K: std::hash::Hash + Eq, V>(
    cache: &Mutex<LruCache<K, V>>,
) -> std::sync::MutexGuard<'_, LruCache<K, V>> {
    match cache.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn default_message(verdict: Verdict, rule_id: &str) -> String {
    match verdict {
        Verdict::Allow => "Allowed by policy".to_string(),
        Verdict::Block => format!("Blocked by rule '{rule_id}'"),
        Verdict::Redact => format!("Redacted by rule '{rule_id}'"),
        Verdict::Approve => format!("Approval required by rule '{rule_id}'"),
    }
}

fn shape_result(
    decision: PipelineDecision,
    request_id: String,
    latency_ms: f64,
) -> (ShieldResult, Option<Severity>, Option<ApprovalTraceInfo>) {
    match decision {
        PipelineDecision::Allow { rule_id, message } => (
            ShieldResult {
                verdict: Verdict::Allow,
                rule_id,
                message,
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms,
            },
            None,
            None,
        ),
        PipelineDecision::Block {
            rule_id,
            message,
            severity,
        } => (
            ShieldResult {
                verdict: Verdict::Block,
                rule_id,
                message,
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms,
            },
            severity,
            None,
        ),
        PipelineDecision::Redact {
            rule_id,
            message,
            modified_args,
            pii_types,
        } => (
            ShieldResult {
                verdict: Verdict::Redact,
                rule_id,
                message,
                modified_args: Some(modified_args),
                pii_types,
                approval_id: None,
                request_id,
                latency_ms,
            },
            None,
            None,
        ),
        PipelineDecision::PendingApproval {
            rule_id,
            message,
            approval_id,
            severity,
        } => {
            let info = ApprovalTraceInfo {
                approval_id: approval_id.clone(),
                status: ApprovalStatus::Pending,
                responder: None,
                responded_at: None,
                response_time_ms: None,
            };
            (
                ShieldResult {
                    verdict: Verdict::Approve,
                    rule_id,
                    message,
                    modified_args: None,
                    pii_types: Vec::new(),
                    approval_id: Some(approval_id),
                    request_id,
                    latency_ms,
                },
                Some(severity),
                Some(info),
            )
        }
        // NeedsApproval is resolved before shaping
        PipelineDecision::NeedsApproval {
            rule_id, message, ..
        } => (
            ShieldResult {
                verdict: Verdict::Approve,
                rule_id,
                message,
                modified_args: None,
                pii_types: Vec::new(),
                approval_id: None,
                request_id,
                latency_ms,
            },
            None,
            None,
        ),
    }
}

/// Cache key for a resolved approval under the rule's strategy.
fn strategy_key(
    strategy: ApprovalStrategy,
    rule_id: &str,
    tool: &str,
    session_id: &str,
    args: &Value,
) -> String {
    match strategy {
        ApprovalStrategy::Once => {
            let mut hasher = Sha256::new();
            hasher.update(tool.as_bytes());
            hasher.update(b"\0");
            hasher.update(canonical_json(args).as_bytes());
            format!("once:{}", hex::encode(hasher.finalize()))
        }
        ApprovalStrategy::PerSession => format!("session:{session_id}:{rule_id}"),
        ApprovalStrategy::PerRule => format!("rule:{rule_id}"),
        ApprovalStrategy::PerTool => format!("tool:{tool}"),
    }
}

/// Key-sorted JSON serialization so argument order does not split the
/// `once` cache.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => other.to_string(),
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorts_keys() {
        let a = json!({"b": 1, "a": {"z": 2, "y": 3}});
        let b = json!({"a": {"y": 3, "z": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
    }

    #[test]
    fn test_strategy_keys_differ_by_scope() {
        let args = json!({"env": "prod"});
        let once = strategy_key(ApprovalStrategy::Once, "r", "deploy", "s1", &args);
        let per_tool = strategy_key(ApprovalStrategy::PerTool, "r", "deploy", "s1", &args);
        let per_rule = strategy_key(ApprovalStrategy::PerRule, "r", "deploy", "s1", &args);
        let per_session = strategy_key(ApprovalStrategy::PerSession, "r", "deploy", "s1", &args);
        assert!(once.starts_with("once:"));
        assert_eq!(per_tool, "tool:deploy");
        assert_eq!(per_rule, "rule:r");
        assert_eq!(per_session, "session:s1:r");
        // Same call in another session shares the `once` key
        assert_eq!(
            once,
            strategy_key(ApprovalStrategy::Once, "r", "deploy", "s2", &args)
        );
    }
}
