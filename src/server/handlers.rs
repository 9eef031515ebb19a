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

// Request handlers for API endpoints

use axum::{
    extract::rejection::JsonRejection,
    extract::State,
    http::HeaderMap,
    response::Json,
};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Instant;
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::engine_core::constants::limits;
use crate::engine_core::models::{CheckRequest, PostCheckRequest, Verdict};
use crate::server::responses::ApiError;
use crate::server::AppState;
use crate::utils::loader;

static TOOL_NAME_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[\w.\-:]+$").expect("tool name pattern compiles"));

fn fail_verdict(state: &AppState) -> Verdict {
    if state.config.fail_open {
        Verdict::Allow
    } else {
        Verdict::Block
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

fn token_matches(provided: &str, expected: &str) -> bool {
    provided.as_bytes().ct_eq(expected.as_bytes()).into()
}

fn client_ip(headers: &HeaderMap) -> String {
    headers
        .get("x-forwarded-for")
        .or_else(|| headers.get("x-real-ip"))
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn require_api_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = &state.config.api_token else {
        return Ok(());
    };
    match bearer_token(headers) {
        Some(token) if token_matches(token, expected) => Ok(()),
        _ => Err(ApiError::unauthorized()),
    }
}

/// Admin auth: dedicated admin token when configured, primary token as
/// fallback. Repeated failures lock the client IP out exponentially.
fn require_admin_auth(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let ip = client_ip(headers);
    if state.is_locked_out(&ip) {
        warn!(%ip, "admin request during lockout window");
        return Err(ApiError::forbidden("Too many failed attempts"));
    }
    let expected = state
        .config
        .admin_token
        .as_ref()
        .or(state.config.api_token.as_ref());
    let Some(expected) = expected else {
        return Ok(());
    };
    match bearer_token(headers) {
        Some(token) if token_matches(token, expected) => {
            state.clear_auth_failures(&ip);
            Ok(())
        }
        _ => {
            state.record_auth_failure(&ip);
            Err(ApiError::unauthorized())
        }
    }
}

fn json_rejection(state: &AppState, rejection: JsonRejection) -> ApiError {
    match rejection {
        JsonRejection::MissingJsonContentType(_) => ApiError::unsupported_media_type(),
        JsonRejection::BytesRejection(_) => ApiError::payload_too_large(),
        other => ApiError::invalid_input(other.to_string(), state.config.debug),
    }
}

fn value_depth(value: &Value) -> usize {
    match value {
        Value::Array(items) => 1 + items.iter().map(value_depth).max().unwrap_or(0),
        Value::Object(map) => 1 + map.values().map(value_depth).max().unwrap_or(0),
        _ => 0,
    }
}

fn check_id_field(name: &str, value: Option<&str>) -> Result<(), String> {
    if let Some(v) = value {
        if v.len() > limits::ID_FIELD_MAX_LEN {
            return Err(format!("{name} exceeds {} chars", limits::ID_FIELD_MAX_LEN));
        }
    }
    Ok(())
}

fn validate_tool_name(tool_name: &str) -> Result<(), String> {
    if tool_name.is_empty() || tool_name.len() > limits::TOOL_NAME_MAX_LEN {
        return Err(format!(
            "tool_name length must be 1..{}",
            limits::TOOL_NAME_MAX_LEN
        ));
    }
    if !TOOL_NAME_RE.is_match(tool_name) {
        return Err("tool_name contains invalid characters".to_string());
    }
    Ok(())
}

fn validate_check_request(req: &CheckRequest) -> Result<(), String> {
    validate_tool_name(&req.tool_name)?;
    if value_depth(&req.args) > limits::MAX_ARGS_DEPTH {
        return Err(format!(
            "args nesting exceeds depth {}",
            limits::MAX_ARGS_DEPTH
        ));
    }
    check_id_field("session_id", req.session_id.as_deref())?;
    check_id_field("sender", req.sender.as_deref())?;
    check_id_field("request_id", req.request_id.as_deref())?;
    Ok(())
}

/// POST /api/v1/check — the pre-call verdict.
pub async fn check_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CheckRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    let Json(request) = payload.map_err(|r| json_rejection(&state, r))?;
    validate_check_request(&request)
        .map_err(|detail| ApiError::invalid_input(detail, state.config.debug))?;

    // Duplicate suppression via client-supplied idempotency key
    let idempotency_key = headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    if let Some(key) = &idempotency_key {
        if let Some(cached) = state.idempotent_lookup(key) {
            return Ok(Json(cached));
        }
    }

    // Back-pressure: bounded in-flight checks
    let _permit = state
        .check_permits
        .clone()
        .try_acquire_owned()
        .map_err(|_| ApiError::overloaded("Too many concurrent checks"))?;

    let started = Instant::now();
    let result = tokio::time::timeout(
        state.config.request_timeout,
        state.engine.check(
            &request.tool_name,
            &request.args,
            request.session_id.as_deref(),
            request.sender.as_deref(),
            request.request_id.clone(),
        ),
    )
    .await
    .map_err(|_| ApiError::request_timeout(fail_verdict(&state)))?;

    state
        .metrics
        .observe_check(result.verdict, started.elapsed().as_secs_f64());

    let body = serde_json::to_value(&result).map_err(|e| {
        ApiError::from_shield_error(
            &crate::engine_core::errors::ShieldError::Internal(e.to_string()),
            state.config.debug,
            fail_verdict(&state),
        )
    })?;
    if let Some(key) = idempotency_key {
        state.idempotent_store(key, body.clone());
    }
    Ok(Json(body))
}

/// POST /api/v1/post-check — PII scan over a tool result.
pub async fn post_check_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<PostCheckRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    let Json(request) = payload.map_err(|r| json_rejection(&state, r))?;
    validate_tool_name(&request.tool_name)
        .and_then(|()| check_id_field("session_id", request.session_id.as_deref()))
        .map_err(|detail| ApiError::invalid_input(detail, state.config.debug))?;

    let _permit = state
        .check_permits
        .clone()
        .try_acquire_owned()
        .map_err(|_| ApiError::overloaded("Too many concurrent checks"))?;

    let outcome = state.engine.post_check(
        &request.tool_name,
        &request.result,
        request.session_id.as_deref(),
    );
    Ok(Json(json!({
        "pii_types": outcome.pii_types,
        "redacted_result": outcome.redacted_result,
    })))
}

/// GET /api/v1/health
pub async fn health_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "rules_count": state.engine.rules_count(),
        "mode": state.engine.mode().as_str(),
    }))
}

/// GET /api/v1/constraints — policy digest for prompt embedding.
pub async fn constraints_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(json!({ "summary": state.engine.policy_summary() })))
}

/// POST /api/v1/reload — re-read the configured rule file and swap.
pub async fn reload_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin_auth(&state, &headers)?;
    let Some(path) = &state.config.rules_path else {
        return Err(ApiError::invalid_input(
            "no rule file configured".to_string(),
            state.config.debug,
        ));
    };
    let source = loader::load_rule_file(path)
        .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?;
    let (old_count, new_count) = state
        .engine
        .reload(&source)
        .await
        .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?;
    state.metrics.set_rules(new_count as i64);
    Ok(Json(json!({ "old_count": old_count, "new_count": new_count })))
}

#[derive(Debug, Deserialize, Default)]
pub struct KillRequest {
    #[serde(default)]
    reason: Option<String>,
}

/// POST /api/v1/kill
pub async fn kill_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Option<Json<KillRequest>>,
) -> Result<Json<Value>, ApiError> {
    require_admin_auth(&state, &headers)?;
    let reason = payload.and_then(|Json(r)| r.reason);
    state.engine.kill(reason);
    state.metrics.set_killed(true);
    Ok(Json(json!({
        "status": "killed",
        "reason": state.engine.kill_reason(),
    })))
}

/// POST /api/v1/resume
pub async fn resume_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin_auth(&state, &headers)?;
    state.engine.resume();
    state.metrics.set_killed(false);
    Ok(Json(json!({ "status": "resumed" })))
}

/// GET /api/v1/status
pub async fn status_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    Ok(Json(json!({
        "status": "ok",
        "killed": state.engine.is_killed(),
        "mode": state.engine.mode().as_str(),
        "rules_count": state.engine.rules_count(),
        "version": env!("CARGO_PKG_VERSION"),
    })))
}

#[derive(Debug, Deserialize)]
pub struct CheckApprovalRequest {
    approval_id: String,
    /// Block up to the configured poll timeout waiting for a response
    #[serde(default)]
    wait: bool,
}

/// POST /api/v1/check-approval — poll one approval's status, optionally
/// blocking until a response lands or the poll timeout elapses.
pub async fn check_approval_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<CheckApprovalRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_api_auth(&state, &headers)?;
    let Json(request) = payload.map_err(|r| json_rejection(&state, r))?;
    check_id_field("approval_id", Some(request.approval_id.as_str()))
        .map_err(|detail| ApiError::invalid_input(detail, state.config.debug))?;

    let mut snapshot = state
        .engine
        .get_approval_status(&request.approval_id)
        .await
        .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?
        .ok_or_else(|| ApiError::not_found("Unknown approval id"))?;

    if request.wait && snapshot.status == crate::engine_core::models::ApprovalStatus::Pending {
        state
            .engine
            .wait_for_approval(&request.approval_id, state.config.approval_poll_timeout)
            .await
            .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?;
        snapshot = state
            .engine
            .get_approval_status(&request.approval_id)
            .await
            .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?
            .ok_or_else(|| ApiError::not_found("Unknown approval id"))?;
    }
    Ok(Json(serde_json::to_value(&snapshot).unwrap_or_default()))
}

#[derive(Debug, Deserialize)]
pub struct RespondApprovalRequest {
    approval_id: String,
    approved: bool,
    #[serde(default)]
    responder: Option<String>,
    #[serde(default)]
    comment: Option<String>,
}

/// POST /api/v1/respond-approval — record a human decision.
pub async fn respond_approval_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<RespondApprovalRequest>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    require_admin_auth(&state, &headers)?;
    let Json(request) = payload.map_err(|r| json_rejection(&state, r))?;
    let responder = request.responder.as_deref().unwrap_or("admin");
    state
        .engine
        .respond_approval(
            &request.approval_id,
            request.approved,
            responder,
            request.comment.clone(),
        )
        .await
        .map_err(|_| ApiError::not_found("Unknown approval id"))?;
    let status = state
        .engine
        .get_approval_status(&request.approval_id)
        .await
        .ok()
        .flatten()
        .map(|s| s.status.as_str().to_string())
        .unwrap_or_else(|| "unknown".to_string());
    Ok(Json(json!({ "status": status })))
}

/// GET /api/v1/pending-approvals
pub async fn pending_approvals_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    require_admin_auth(&state, &headers)?;
    let items = state
        .engine
        .pending_approvals()
        .await
        .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))?;
    Ok(Json(json!({ "items": items })))
}

/// GET /healthz — liveness.
pub async fn healthz_handler() -> Json<Value> {
    Json(json!({ "status": "alive" }))
}

/// GET /readyz — readiness: 503 while draining or with zero rules loaded.
pub async fn readyz_handler(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    if state.is_draining() || state.engine.rules_count() == 0 {
        return Err(ApiError::overloaded("Not ready"));
    }
    Ok(Json(json!({ "status": "ready" })))
}

/// GET /metrics — Prometheus text exposition.
pub async fn metrics_handler(State(state): State<AppState>) -> Result<String, ApiError> {
    state.metrics.set_rules(state.engine.rules_count() as i64);
    state.metrics.set_killed(state.engine.is_killed());
    state
        .metrics
        .render()
        .map_err(|e| ApiError::from_shield_error(&e, state.config.debug, fail_verdict(&state)))
}
