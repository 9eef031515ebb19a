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

use crate::engine_core::constants::{defaults, env as env_names};
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::Mode;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Process configuration, constructed once at startup from the
/// POLICYSHIELD_* environment (CLI flags may override individual fields).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub bind: String,
    pub port: u16,
    pub rules_path: Option<PathBuf>,
    pub trace_path: Option<PathBuf>,
    pub api_token: Option<String>,
    pub admin_token: Option<String>,
    pub cors_origins: Vec<String>,
    pub max_request_size: usize,
    pub max_concurrent_checks: usize,
    #[serde(with = "secs")]
    pub request_timeout: Duration,
    #[serde(with = "secs")]
    pub engine_timeout: Duration,
    /// true: internal failures return ALLOW; false (default): BLOCK
    pub fail_open: bool,
    pub log_level: String,
    pub log_format: String, // "json" or "text"
    #[serde(with = "secs")]
    pub approval_poll_timeout: Duration,
    #[serde(with = "secs")]
    pub approval_timeout: Duration,
    #[serde(with = "secs")]
    pub approval_ttl: Duration,
    pub approval_webhook_url: Option<String>,
    /// Overrides the mode carried in the rule file
    pub mode_override: Option<Mode>,
    /// Deployment environment name matched by rule context clauses
    pub environment: Option<String>,
    #[serde(with = "secs")]
    pub session_ttl: Duration,
    pub max_sessions: usize,
    pub debug: bool,
}

mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ShieldError> {
        Ok(Self {
            bind: env::var(env_names::BIND).unwrap_or_else(|_| defaults::BIND.to_string()),
            port: parse_or_default(env_names::PORT, defaults::PORT)?,
            rules_path: env::var(env_names::RULES_PATH).ok().map(PathBuf::from),
            trace_path: env::var(env_names::TRACE_PATH).ok().map(PathBuf::from),
            api_token: non_empty(env::var(env_names::API_TOKEN).ok()),
            admin_token: non_empty(env::var(env_names::ADMIN_TOKEN).ok()),
            cors_origins: env::var(env_names::CORS_ORIGINS)
                .ok()
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_default(),
            max_request_size: parse_or_default(
                env_names::MAX_REQUEST_SIZE,
                defaults::MAX_REQUEST_SIZE,
            )?,
            max_concurrent_checks: parse_or_default(
                env_names::MAX_CONCURRENT_CHECKS,
                defaults::MAX_CONCURRENT_CHECKS,
            )?,
            request_timeout: Duration::from_secs(parse_or_default(
                env_names::REQUEST_TIMEOUT,
                defaults::REQUEST_TIMEOUT_SECS,
            )?),
            engine_timeout: Duration::from_secs(parse_or_default(
                env_names::ENGINE_TIMEOUT,
                defaults::ENGINE_TIMEOUT_SECS,
            )?),
            fail_open: match env::var(env_names::FAIL_MODE) {
                Ok(value) => match value.to_lowercase().as_str() {
                    "open" => true,
                    "closed" => false,
                    other => {
                        return Err(ShieldError::Config(format!(
                            "{} must be 'open' or 'closed', got '{}'",
                            env_names::FAIL_MODE,
                            other
                        )))
                    }
                },
                Err(_) => false,
            },
            log_level: env::var(env_names::LOG_LEVEL).unwrap_or_else(|_| "info".to_string()),
            log_format: env::var(env_names::LOG_FORMAT).unwrap_or_else(|_| "text".to_string()),
            approval_poll_timeout: Duration::from_secs(parse_or_default(
                env_names::APPROVAL_POLL_TIMEOUT,
                defaults::APPROVAL_POLL_TIMEOUT_SECS,
            )?),
            approval_timeout: Duration::from_secs(parse_or_default(
                env_names::APPROVAL_TIMEOUT,
                defaults::APPROVAL_TIMEOUT_SECS,
            )?),
            approval_ttl: Duration::from_secs(parse_or_default(
                env_names::APPROVAL_TTL,
                defaults::APPROVAL_TTL_SECS,
            )?),
            approval_webhook_url: non_empty(env::var(env_names::APPROVAL_WEBHOOK_URL).ok()),
            mode_override: env::var(env_names::MODE).ok().map(|s| Mode::parse_safe(&s)),
            environment: non_empty(env::var(env_names::ENVIRONMENT).ok()),
            session_ttl: Duration::from_secs(parse_or_default(
                env_names::SESSION_TTL,
                defaults::SESSION_TTL_SECS,
            )?),
            max_sessions: parse_or_default(env_names::MAX_SESSIONS, defaults::MAX_SESSIONS)?,
            debug: env::var(env_names::DEBUG)
                .map(|v| v == "1" || v.to_lowercase() == "true")
                .unwrap_or(false),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: defaults::BIND.to_string(),
            port: defaults::PORT,
            rules_path: None,
            trace_path: None,
            api_token: None,
            admin_token: None,
            cors_origins: Vec::new(),
            max_request_size: defaults::MAX_REQUEST_SIZE,
            max_concurrent_checks: defaults::MAX_CONCURRENT_CHECKS,
            request_timeout: Duration::from_secs(defaults::REQUEST_TIMEOUT_SECS),
            engine_timeout: Duration::from_secs(defaults::ENGINE_TIMEOUT_SECS),
            fail_open: false,
            log_level: "info".to_string(),
            log_format: "text".to_string(),
            approval_poll_timeout: Duration::from_secs(defaults::APPROVAL_POLL_TIMEOUT_SECS),
            approval_timeout: Duration::from_secs(defaults::APPROVAL_TIMEOUT_SECS),
            approval_ttl: Duration::from_secs(defaults::APPROVAL_TTL_SECS),
            approval_webhook_url: None,
            mode_override: None,
            environment: None,
            session_ttl: Duration::from_secs(defaults::SESSION_TTL_SECS),
            max_sessions: defaults::MAX_SESSIONS,
            debug: false,
        }
    }
}

fn parse_or_default<T: std::str::FromStr>(name: &str, default: T) -> Result<T, ShieldError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ShieldError::Config(format!("{name} has invalid value '{raw}'"))),
        Err(_) => Ok(default),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_spec() {
        let config = Config::default();
        assert_eq!(config.max_request_size, 1_048_576);
        assert_eq!(config.max_concurrent_checks, 100);
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.engine_timeout, Duration::from_secs(5));
        assert!(!config.fail_open, "fail mode defaults to closed");
        assert_eq!(config.log_format, "text");
        assert_eq!(config.approval_poll_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_non_empty_filters_blank() {
        assert_eq!(non_empty(Some("  ".to_string())), None);
        assert_eq!(non_empty(Some("tok".to_string())), Some("tok".to_string()));
        assert_eq!(non_empty(None), None);
    }
}
