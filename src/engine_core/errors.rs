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

// Domain error types - secure error handling with no information disclosure

use thiserror::Error;

/// Main error type for the shield.
#[derive(Error, Debug)]
pub enum ShieldError {
    /// Rule set failed to compile (HTTP 400 from /reload, fatal at startup)
    #[error("Rule compile error: {0}")]
    RuleCompile(String),

    /// Client payload failed validation (HTTP 422)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Missing or invalid bearer token (HTTP 401)
    #[error("Unauthorized")]
    Unauthorized,

    /// Valid token without admin rights, or locked out (HTTP 403)
    #[error("Forbidden")]
    Forbidden,

    /// Request body exceeds the configured limit (HTTP 413)
    #[error("Payload too large")]
    PayloadTooLarge,

    /// Mutating request without application/json (HTTP 415)
    #[error("Unsupported media type")]
    UnsupportedMediaType,

    /// Concurrency limit reached or server draining (HTTP 503)
    #[error("Overloaded: {0}")]
    Overloaded(String),

    /// Engine or request deadline exceeded (HTTP 504)
    #[error("Timeout after {0:?}")]
    Timeout(std::time::Duration),

    /// Approval backend failure (mapped to fail mode)
    #[error("Approval error: {0}")]
    Approval(String),

    /// Trace recorder I/O failure (logged, never blocks a check)
    #[error("Trace I/O error: {0}")]
    TraceIo(#[from] std::io::Error),

    /// Configuration error (HTTP 500, fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal pipeline failure (mapped to fail mode)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ShieldError {
    /// Machine-readable error kind for the wire envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            ShieldError::RuleCompile(_) => "rule_compile_error",
            ShieldError::InvalidInput(_) => "invalid_input",
            ShieldError::Unauthorized => "unauthorized",
            ShieldError::Forbidden => "forbidden",
            ShieldError::PayloadTooLarge => "payload_too_large",
            ShieldError::UnsupportedMediaType => "unsupported_media_type",
            ShieldError::Overloaded(_) => "overloaded",
            ShieldError::Timeout(_) => "timeout",
            ShieldError::Approval(_) => "approval_error",
            ShieldError::TraceIo(_) => "trace_io_error",
            ShieldError::Config(_) => "configuration_error",
            ShieldError::Internal(_) => "internal_error",
        }
    }

    /// HTTP status code this error maps to at the boundary.
    pub fn status_code(&self) -> u16 {
        match self {
            ShieldError::RuleCompile(_) => 400,
            ShieldError::InvalidInput(_) => 422,
            ShieldError::Unauthorized => 401,
            ShieldError::Forbidden => 403,
            ShieldError::PayloadTooLarge => 413,
            ShieldError::UnsupportedMediaType => 415,
            ShieldError::Overloaded(_) => 503,
            ShieldError::Timeout(_) => 504,
            ShieldError::Approval(_) => 503,
            ShieldError::TraceIo(_) => 500,
            ShieldError::Config(_) => 500,
            ShieldError::Internal(_) => 500,
        }
    }

    /// User-facing message. Internals are hidden unless `debug` is set.
    pub fn user_message(&self, debug: bool) -> String {
        if debug {
            return self.to_string();
        }
        match self {
            ShieldError::RuleCompile(_) => "Rule set failed to compile".to_string(),
            ShieldError::InvalidInput(_) => "Request failed validation".to_string(),
            ShieldError::Unauthorized => "Unauthorized".to_string(),
            ShieldError::Forbidden => "Forbidden".to_string(),
            ShieldError::PayloadTooLarge => "Payload too large".to_string(),
            ShieldError::UnsupportedMediaType => "Unsupported media type".to_string(),
            ShieldError::Overloaded(_) => "Service overloaded".to_string(),
            ShieldError::Timeout(_) => "Request timed out".to_string(),
            ShieldError::Approval(_) => "Approval service unavailable".to_string(),
            ShieldError::TraceIo(_) => "Internal error".to_string(),
            ShieldError::Config(_) => "Internal error".to_string(),
            ShieldError::Internal(_) => "Internal error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ShieldError::Unauthorized.status_code(), 401);
        assert_eq!(ShieldError::PayloadTooLarge.status_code(), 413);
        assert_eq!(
            ShieldError::Timeout(std::time::Duration::from_secs(5)).status_code(),
            504
        );
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = ShieldError::Internal("lock poisoned at session.rs:42".to_string());
        assert_eq!(err.user_message(false), "Internal error");
        assert!(err.user_message(true).contains("lock poisoned"));
    }
}
