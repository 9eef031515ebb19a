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

//! Argument sanitizer: the pre-rule stage.
//!
//! Applied in order: security detectors over the flattened argument string,
//! user-configured blocked patterns, NFKC normalization with control-char
//! stripping, then structural limits. Any rejection surfaces as BLOCK with
//! the `__sanitizer__` rule id.

use crate::engine_core::constants::limits;
use crate::engine_core::detectors::{builtin_pack, builtin_packs, DetectorPack};
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::{SanitizerSpec, Severity};
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

/// Why the sanitizer rejected a call.
#[derive(Debug, Clone)]
pub struct SanitizeRejection {
    pub reason: String,
    pub detector: Option<String>,
    pub severity: Option<Severity>,
}

/// Compiled sanitizer pipeline.
#[derive(Clone)]
pub struct Sanitizer {
    enabled: bool,
    packs: Vec<DetectorPack>,
    blocked: Vec<(String, Regex)>,
    max_string_length: usize,
    max_args_depth: usize,
    max_total_keys: usize,
    trim_whitespace: bool,
}

impl Sanitizer {
    pub fn compile(spec: &SanitizerSpec) -> Result<Self, ShieldError> {
        let packs = match &spec.detectors {
            Some(names) => {
                let mut selected = Vec::with_capacity(names.len());
                for name in names {
                    let pack = builtin_pack(name).ok_or_else(|| {
                        ShieldError::RuleCompile(format!("unknown detector pack '{name}'"))
                    })?;
                    selected.push(pack.clone());
                }
                selected
            }
            None => builtin_packs().to_vec(),
        };

        let mut blocked = Vec::with_capacity(spec.blocked_patterns.len());
        for pattern in &spec.blocked_patterns {
            if pattern.pattern.chars().count() > limits::MAX_REGEX_SOURCE_LEN {
                return Err(ShieldError::RuleCompile(format!(
                    "blocked pattern '{}' exceeds {} chars",
                    pattern.name,
                    limits::MAX_REGEX_SOURCE_LEN
                )));
            }
            let regex = Regex::new(&pattern.pattern).map_err(|e| {
                ShieldError::RuleCompile(format!("blocked pattern '{}': {}", pattern.name, e))
            })?;
            blocked.push((pattern.name.clone(), regex));
        }

        Ok(Self {
            enabled: spec.enabled,
            packs,
            blocked,
            max_string_length: spec.max_string_length,
            max_args_depth: spec.max_args_depth,
            max_total_keys: spec.max_total_keys,
            trim_whitespace: spec.trim_whitespace,
        })
    }

    /// Run the full pipeline. Returns the normalized argument value, or the
    /// structured rejection.
    pub fn sanitize(&self, args: &Value) -> Result<Value, SanitizeRejection> {
        if !self.enabled {
            return Ok(args.clone());
        }

        let flat = args.to_string();

        for pack in &self.packs {
            if let Some(hit) = pack.scan(&flat) {
                return Err(SanitizeRejection {
                    reason: format!(
                        "Detector '{}' matched: {}",
                        hit.detector,
                        truncate(&hit.matched, limits::DETECTOR_SNIPPET_MAX_LEN)
                    ),
                    detector: Some(hit.detector),
                    severity: Some(hit.severity),
                });
            }
        }

        for (name, regex) in &self.blocked {
            if regex.is_match(&flat) {
                return Err(SanitizeRejection {
                    reason: format!("Blocked pattern '{name}' matched"),
                    detector: Some(name.clone()),
                    severity: None,
                });
            }
        }

        let normalized = self.normalize_value(args);
        self.check_limits(&normalized)?;
        Ok(normalized)
    }

    fn normalize_value(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => Value::String(self.normalize_string(s)),
            Value::Array(items) => {
                Value::Array(items.iter().map(|v| self.normalize_value(v)).collect())
            }
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.normalize_value(v)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    fn normalize_string(&self, s: &str) -> String {
        let normalized: String = s
            .nfkc()
            .filter(|c| *c != '\0' && (!c.is_control() || matches!(c, '\n' | '\t' | '\r')))
            .collect();
        if self.trim_whitespace {
            normalized.trim().to_string()
        } else {
            normalized
        }
    }

    fn check_limits(&self, value: &Value) -> Result<(), SanitizeRejection> {
        let mut total_keys = 0usize;
        self.walk_limits(value, 0, &mut total_keys)
    }

    fn walk_limits(
        &self,
        value: &Value,
        depth: usize,
        total_keys: &mut usize,
    ) -> Result<(), SanitizeRejection> {
        if depth > self.max_args_depth {
            return Err(SanitizeRejection {
                reason: format!("Argument nesting exceeds depth {}", self.max_args_depth),
                detector: None,
                severity: None,
            });
        }
        match value {
            Value::String(s) => {
                if s.len() > self.max_string_length {
                    return Err(SanitizeRejection {
                        reason: format!(
                            "String value exceeds {} bytes",
                            self.max_string_length
                        ),
                        detector: None,
                        severity: None,
                    });
                }
            }
            Value::Array(items) => {
                for item in items {
                    self.walk_limits(item, depth + 1, total_keys)?;
                }
            }
            Value::Object(map) => {
                *total_keys += map.len();
                if *total_keys > self.max_total_keys {
                    return Err(SanitizeRejection {
                        reason: format!("Argument key count exceeds {}", self.max_total_keys),
                        detector: None,
                        severity: None,
                    });
                }
                for item in map.values() {
                    self.walk_limits(item, depth + 1, total_keys)?;
                }
            }
            _ => {}
        }
        Ok(())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sanitizer() -> Sanitizer {
        Sanitizer::compile(&SanitizerSpec::default()).unwrap()
    }

    #[test]
    fn test_clean_args_pass_through() {
        let s = sanitizer();
        let out = s.sanitize(&json!({"path": "/tmp/data.csv"})).unwrap();
        assert_eq!(out["path"], "/tmp/data.csv");
    }

    #[test]
    fn test_detector_rejection_names_detector() {
        let s = sanitizer();
        let err = s
            .sanitize(&json!({"path": "../../etc/passwd"}))
            .unwrap_err();
        assert_eq!(err.detector.as_deref(), Some("path_traversal"));
        assert!(err.reason.contains("path_traversal"));
    }

    #[test]
    fn test_matched_substring_truncated() {
        let s = sanitizer();
        let long_cmd = format!("x; rm {}", "a".repeat(300));
        let err = s.sanitize(&json!({ "cmd": long_cmd })).unwrap_err();
        // reason carries at most the snippet cap of matched text
        assert!(err.reason.len() < 200);
    }

    #[test]
    fn test_blocked_pattern_rejection() {
        let spec = SanitizerSpec {
            blocked_patterns: vec![crate::engine_core::models::NamedPattern {
                name: "internal-host".to_string(),
                pattern: r"corp\.internal".to_string(),
            }],
            ..Default::default()
        };
        let s = Sanitizer::compile(&spec).unwrap();
        let err = s
            .sanitize(&json!({"url": "https://api.corp.internal/x"}))
            .unwrap_err();
        assert_eq!(err.detector.as_deref(), Some("internal-host"));
    }

    #[test]
    fn test_normalization_strips_controls_and_trims() {
        let s = sanitizer();
        let out = s
            .sanitize(&json!({"text": "  hello\u{0000}\u{0007} world\t\n  "}))
            .unwrap();
        assert_eq!(out["text"], "hello world");
    }

    #[test]
    fn test_nfkc_normalization() {
        let s = sanitizer();
        // Fullwidth latin normalizes to ASCII
        let out = s.sanitize(&json!({"text": "ｈｅｌｌｏ"})).unwrap();
        assert_eq!(out["text"], "hello");
    }

    #[test]
    fn test_depth_limit_rejects() {
        let spec = SanitizerSpec {
            max_args_depth: 2,
            ..Default::default()
        };
        let s = Sanitizer::compile(&spec).unwrap();
        let deep = json!({"a": {"b": {"c": {"d": 1}}}});
        assert!(s.sanitize(&deep).is_err());
    }

    #[test]
    fn test_string_length_limit_rejects() {
        let spec = SanitizerSpec {
            max_string_length: 8,
            ..Default::default()
        };
        let s = Sanitizer::compile(&spec).unwrap();
        assert!(s.sanitize(&json!({"x": "short"})).is_ok());
        assert!(s.sanitize(&json!({"x": "way too long for this"})).is_err());
    }

    #[test]
    fn test_disabled_sanitizer_passes_everything() {
        let spec = SanitizerSpec {
            enabled: false,
            ..Default::default()
        };
        let s = Sanitizer::compile(&spec).unwrap();
        assert!(s.sanitize(&json!({"path": "../../etc/passwd"})).is_ok());
    }

    #[test]
    fn test_unknown_detector_pack_rejects_compile() {
        let spec = SanitizerSpec {
            detectors: Some(vec!["no_such_pack".to_string()]),
            ..Default::default()
        };
        assert!(Sanitizer::compile(&spec).is_err());
    }
}
