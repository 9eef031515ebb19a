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

//! PolicyShield constants - single source of truth for all configuration values.
//!
//! This module centralizes magic numbers, sentinel rule ids, and environment
//! variable names to ensure consistency and maintainability.

/// Synthetic rule ids surfaced in verdicts produced outside the rule matcher.
pub mod rule_ids {
    /// Verdict produced while the kill switch is active
    pub const KILL_SWITCH: &str = "__kill_switch__";
    /// Verdict produced for a call to a honeypot tool
    pub const HONEYPOT: &str = "__honeypot__";
    /// Verdict produced by a sanitizer rejection
    pub const SANITIZER: &str = "__sanitizer__";
    /// Verdict produced by an internal pipeline failure (fail-closed)
    pub const PIPELINE_ERROR: &str = "__error__";
}

/// Session handling.
pub mod session {
    /// Session id applied when the caller supplies none
    pub const DEFAULT_SESSION_ID: &str = "default";
}

/// Configuration environment variables (names authoritative).
pub mod env {
    pub const API_TOKEN: &str = "POLICYSHIELD_API_TOKEN";
    pub const ADMIN_TOKEN: &str = "POLICYSHIELD_ADMIN_TOKEN";
    pub const CORS_ORIGINS: &str = "POLICYSHIELD_CORS_ORIGINS";
    pub const MAX_REQUEST_SIZE: &str = "POLICYSHIELD_MAX_REQUEST_SIZE";
    pub const MAX_CONCURRENT_CHECKS: &str = "POLICYSHIELD_MAX_CONCURRENT_CHECKS";
    pub const REQUEST_TIMEOUT: &str = "POLICYSHIELD_REQUEST_TIMEOUT";
    pub const ENGINE_TIMEOUT: &str = "POLICYSHIELD_ENGINE_TIMEOUT";
    pub const FAIL_MODE: &str = "POLICYSHIELD_FAIL_MODE";
    pub const LOG_FORMAT: &str = "POLICYSHIELD_LOG_FORMAT";
    pub const LOG_LEVEL: &str = "POLICYSHIELD_LOG_LEVEL";
    pub const APPROVAL_POLL_TIMEOUT: &str = "POLICYSHIELD_APPROVAL_POLL_TIMEOUT";
    pub const APPROVAL_TIMEOUT: &str = "POLICYSHIELD_APPROVAL_TIMEOUT";
    pub const APPROVAL_TTL: &str = "POLICYSHIELD_APPROVAL_TTL";
    pub const APPROVAL_WEBHOOK_URL: &str = "POLICYSHIELD_APPROVAL_WEBHOOK_URL";
    pub const DEBUG: &str = "POLICYSHIELD_DEBUG";
    pub const BIND: &str = "POLICYSHIELD_BIND";
    pub const PORT: &str = "POLICYSHIELD_PORT";
    pub const RULES_PATH: &str = "POLICYSHIELD_RULES_PATH";
    pub const TRACE_PATH: &str = "POLICYSHIELD_TRACE_PATH";
    pub const MODE: &str = "POLICYSHIELD_MODE";
    pub const ENVIRONMENT: &str = "POLICYSHIELD_ENVIRONMENT";
    pub const SESSION_TTL: &str = "POLICYSHIELD_SESSION_TTL";
    pub const MAX_SESSIONS: &str = "POLICYSHIELD_MAX_SESSIONS";
}

/// Default values for tunables, applied when the environment is silent.
pub mod defaults {
    /// Maximum request payload size in bytes (1 MiB)
    pub const MAX_REQUEST_SIZE: usize = 1_048_576;
    /// Maximum in-flight check/post-check requests
    pub const MAX_CONCURRENT_CHECKS: usize = 100;
    /// Per-request lifecycle timeout in seconds
    pub const REQUEST_TIMEOUT_SECS: u64 = 30;
    /// Engine check timeout in seconds
    pub const ENGINE_TIMEOUT_SECS: u64 = 5;
    /// Blocking approval-poll timeout in seconds
    pub const APPROVAL_POLL_TIMEOUT_SECS: u64 = 30;
    /// Age at which a pending approval resolves to `timeout`
    pub const APPROVAL_TIMEOUT_SECS: u64 = 300;
    /// Retention for approval records
    pub const APPROVAL_TTL_SECS: u64 = 3600;
    /// Approval garbage-collection sweep period
    pub const APPROVAL_SWEEP_SECS: u64 = 60;
    /// Hard cap on stored approval records
    pub const MAX_APPROVALS: usize = 10_000;
    /// Hard cap on the engine's approval metadata mirror
    pub const MAX_APPROVAL_META: usize = 10_000;
    /// Hard cap on the resolved-approval verdict cache
    pub const MAX_RESOLVED_APPROVALS: usize = 10_000;
    /// Idle session retention in seconds
    pub const SESSION_TTL_SECS: u64 = 3600;
    /// Hard cap on tracked sessions
    pub const MAX_SESSIONS: usize = 10_000;
    /// Capacity of the per-session event ring buffer
    pub const EVENT_RING_CAPACITY: usize = 128;
    /// Idempotency cache capacity
    pub const IDEMPOTENCY_CAPACITY: usize = 10_000;
    /// Idempotency cache entry TTL in seconds
    pub const IDEMPOTENCY_TTL_SECS: u64 = 300;
    /// Trace buffer flush threshold in entries
    pub const TRACE_FLUSH_THRESHOLD: usize = 64;
    /// Server bind address
    pub const BIND: &str = "127.0.0.1";
    /// Server port
    pub const PORT: u16 = 8787;
}

/// Structural and compilation limits (DoS protection).
pub mod limits {
    /// Maximum source length of any user-supplied regex
    pub const MAX_REGEX_SOURCE_LEN: usize = 500;
    /// Maximum tool name length accepted at the HTTP boundary
    pub const TOOL_NAME_MAX_LEN: usize = 256;
    /// Maximum length for session_id / sender / request_id fields
    pub const ID_FIELD_MAX_LEN: usize = 256;
    /// Maximum argument nesting depth accepted at the HTTP boundary
    pub const MAX_ARGS_DEPTH: usize = 10;
    /// String truncation applied before an approval request leaves the process
    pub const APPROVAL_SNIPPET_MAX_LEN: usize = 200;
    /// Matched-substring truncation in sanitizer rejection reasons
    pub const DETECTOR_SNIPPET_MAX_LEN: usize = 100;
}
