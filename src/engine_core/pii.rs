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

//! PII detection and redaction.
//!
//! Named, extensible kind registry. Detection is first-match-wins per kind;
//! redaction replaces matches with `[KIND]` tokens and recurses over nested
//! mappings and sequences. Kinds with checksum or length validators only
//! fire when the validator accepts the matched text.

use crate::engine_core::constants::limits;
use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::PiiPatternSpec;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeSet;

/// Post-match validation applied before a kind is considered detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Validator {
    None,
    /// Total digit count must fall in the inclusive range
    DigitCount { min: usize, max: usize },
    /// Luhn mod-10 over the digits
    Luhn,
    /// Russian tax id checksum (10 or 12 digits)
    Inn,
    /// Russian pension id checksum
    Snils,
}

impl Validator {
    fn accepts(&self, text: &str) -> bool {
        match self {
            Validator::None => true,
            Validator::DigitCount { min, max } => {
                let n = text.chars().filter(|c| c.is_ascii_digit()).count();
                n >= *min && n <= *max
            }
            Validator::Luhn => luhn_valid(text),
            Validator::Inn => inn_valid(text),
            Validator::Snils => snils_valid(text),
        }
    }
}

#[derive(Clone)]
struct PiiKind {
    name: String,
    regex: Regex,
    validator: Validator,
}

fn kind(name: &str, pattern: &str, validator: Validator) -> PiiKind {
    PiiKind {
        name: name.to_string(),
        // Built-in patterns are static and must compile
        regex: Regex::new(pattern).unwrap_or_else(|e| panic!("bad built-in PII pattern {name}: {e}")),
        validator,
    }
}

// Kind order is also redaction order: specific formats before the loose
// numeric ones, so a credit card is never half-eaten by the phone pattern.
static BUILTIN_KINDS: Lazy<Vec<PiiKind>> = Lazy::new(|| {
    vec![
        kind(
            "EMAIL",
            r"[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}",
            Validator::None,
        ),
        kind(
            "CREDIT_CARD",
            r"\b[0-9]{4}[ -]?[0-9]{4}[ -]?[0-9]{4}[ -]?[0-9]{4}\b",
            Validator::Luhn,
        ),
        kind(
            "IBAN",
            r"\b[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}\b",
            Validator::None,
        ),
        kind("SSN", r"\b[0-9]{3}-[0-9]{2}-[0-9]{4}\b", Validator::None),
        kind(
            "SNILS",
            r"\b[0-9]{3}-[0-9]{3}-[0-9]{3}[- ][0-9]{2}\b",
            Validator::Snils,
        ),
        kind("INN", r"\b(?:[0-9]{12}|[0-9]{10})\b", Validator::Inn),
        kind(
            "PHONE",
            r"\+?[0-9][0-9()\-\s.]{7,18}[0-9]",
            // Phone matches must be length-validated: 10..15 digits
            Validator::DigitCount { min: 10, max: 15 },
        ),
        // 7-9 digits; 6-digit ids are too common to treat as passports
        kind("PASSPORT", r"\b[0-9]{7,9}\b", Validator::None),
        kind(
            "DOB",
            r"\b(?:19|20)[0-9]{2}[-/.](?:0[1-9]|1[0-2])[-/.](?:0[1-9]|[12][0-9]|3[01])\b",
            Validator::None,
        ),
        kind(
            "IP",
            // Octet range 0-255 enforced in the pattern itself
            r"\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b",
            Validator::None,
        ),
    ]
});

fn luhn_valid(text: &str) -> bool {
    let digits: Vec<u32> = text.chars().filter_map(|c| c.to_digit(10)).collect();
    if digits.len() < 13 || digits.len() > 19 {
        return false;
    }
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 1 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    sum % 10 == 0
}

fn inn_valid(text: &str) -> bool {
    let digits: Vec<u64> = text
        .chars()
        .filter_map(|c| c.to_digit(10).map(u64::from))
        .collect();
    let weighted = |coeffs: &[u64]| -> u64 {
        let sum: u64 = coeffs.iter().zip(&digits).map(|(c, d)| c * d).sum();
        sum % 11 % 10
    };
    match digits.len() {
        10 => weighted(&[2, 4, 10, 3, 5, 9, 4, 6, 8]) == digits[9],
        12 => {
            weighted(&[7, 2, 4, 10, 3, 5, 9, 4, 6, 8]) == digits[10]
                && weighted(&[3, 7, 2, 4, 10, 3, 5, 9, 4, 6, 8]) == digits[11]
        }
        _ => false,
    }
}

fn snils_valid(text: &str) -> bool {
    let digits: Vec<u64> = text
        .chars()
        .filter_map(|c| c.to_digit(10).map(u64::from))
        .collect();
    if digits.len() != 11 {
        return false;
    }
    let sum: u64 = digits[..9]
        .iter()
        .enumerate()
        .map(|(i, &d)| d * (9 - i as u64))
        .sum();
    let control = match sum {
        s if s < 100 => s,
        100 | 101 => 0,
        s => {
            let r = s % 101;
            if r == 100 {
                0
            } else {
                r
            }
        }
    };
    control == digits[9] * 10 + digits[10]
}

/// Named PII classifier and redactor.
#[derive(Clone)]
pub struct PiiDetector {
    kinds: Vec<PiiKind>,
}

impl Default for PiiDetector {
    fn default() -> Self {
        Self {
            kinds: BUILTIN_KINDS.clone(),
        }
    }
}

impl PiiDetector {
    /// Build a detector from the built-in kinds plus configured custom
    /// patterns. Custom pattern sources are capped at the same length as
    /// every other user-supplied regex.
    pub fn with_custom(custom: &[PiiPatternSpec]) -> Result<Self, ShieldError> {
        let mut kinds = BUILTIN_KINDS.clone();
        for spec in custom {
            if spec.pattern.chars().count() > limits::MAX_REGEX_SOURCE_LEN {
                return Err(ShieldError::RuleCompile(format!(
                    "custom PII pattern '{}' exceeds {} chars",
                    spec.name,
                    limits::MAX_REGEX_SOURCE_LEN
                )));
            }
            let regex = Regex::new(&spec.pattern).map_err(|e| {
                ShieldError::RuleCompile(format!("custom PII pattern '{}': {}", spec.name, e))
            })?;
            kinds.push(PiiKind {
                name: spec.name.to_uppercase(),
                regex,
                validator: Validator::None,
            });
        }
        Ok(Self { kinds })
    }

    /// Classify `text` into the set of detected kinds. First match wins per
    /// kind; detection stops scanning a kind at its first validated hit.
    pub fn detect(&self, text: &str) -> Vec<String> {
        let mut found = Vec::new();
        for kind in &self.kinds {
            for m in kind.regex.find_iter(text) {
                if kind.validator.accepts(m.as_str()) {
                    found.push(kind.name.clone());
                    break;
                }
            }
        }
        found
    }

    /// Replace every validated match with a `[KIND]` token.
    /// Deterministic: kinds are applied in registry order.
    pub fn redact(&self, text: &str) -> (String, Vec<String>) {
        let mut current = text.to_string();
        let mut kinds_hit = Vec::new();
        for kind in &self.kinds {
            let mut hit = false;
            let replaced = kind
                .regex
                .replace_all(&current, |caps: &regex::Captures<'_>| {
                    let m = &caps[0];
                    if kind.validator.accepts(m) {
                        hit = true;
                        format!("[{}]", kind.name)
                    } else {
                        m.to_string()
                    }
                })
                .into_owned();
            if hit {
                kinds_hit.push(kind.name.clone());
                current = replaced;
            }
        }
        (current, kinds_hit)
    }

    /// Redact string leaves recursively over nested mappings and sequences.
    pub fn redact_value(&self, value: &Value) -> (Value, Vec<String>) {
        let mut kinds = BTreeSet::new();
        let redacted = self.redact_value_inner(value, &mut kinds);
        (redacted, kinds.into_iter().collect())
    }

    fn redact_value_inner(&self, value: &Value, kinds: &mut BTreeSet<String>) -> Value {
        match value {
            Value::String(s) => {
                let (out, hit) = self.redact(s);
                kinds.extend(hit);
                Value::String(out)
            }
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|v| self.redact_value_inner(v, kinds))
                    .collect(),
            ),
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), self.redact_value_inner(v, kinds)))
                    .collect(),
            ),
            other => other.clone(),
        }
    }

    /// Redaction variant for data leaving the process (approval channels,
    /// pending listings): tokens carry an explicit REDACTED prefix.
    pub fn redact_for_exposure(&self, text: &str) -> String {
        let mut current = text.to_string();
        for kind in &self.kinds {
            current = kind
                .regex
                .replace_all(&current, |caps: &regex::Captures<'_>| {
                    let m = &caps[0];
                    if kind.validator.accepts(m) {
                        format!("[REDACTED_{}]", kind.name)
                    } else {
                        m.to_string()
                    }
                })
                .into_owned();
        }
        current
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_email() {
        let det = PiiDetector::default();
        assert_eq!(det.detect("mail me john@corp.com"), vec!["EMAIL"]);
        assert!(det.detect("no pii here").is_empty());
    }

    #[test]
    fn test_ip_octet_range_validation() {
        let det = PiiDetector::default();
        assert_eq!(det.detect("host is 10.0.0.255"), vec!["IP"]);
        assert!(det.detect("bogus 999.999.999.999").is_empty());
    }

    #[test]
    fn test_passport_requires_seven_digits() {
        let det = PiiDetector::default();
        assert!(det.detect("code 123456").is_empty());
        assert_eq!(det.detect("passport 4509123"), vec!["PASSPORT"]);
    }

    #[test]
    fn test_credit_card_luhn() {
        let det = PiiDetector::default();
        // Valid Luhn test number
        assert!(det
            .detect("card 4111 1111 1111 1111")
            .contains(&"CREDIT_CARD".to_string()));
        // Same shape, broken checksum
        assert!(!det
            .detect("card 4111 1111 1111 1112")
            .contains(&"CREDIT_CARD".to_string()));
    }

    #[test]
    fn test_phone_length_validated() {
        let det = PiiDetector::default();
        assert!(det
            .detect("call +1 (415) 555-0100 now")
            .contains(&"PHONE".to_string()));
        // 9 digits: matches the shape, fails the length validator
        assert!(!det.detect("x 123-456-789 y").contains(&"PHONE".to_string()));
    }

    #[test]
    fn test_redact_replaces_with_kind_token() {
        let det = PiiDetector::default();
        let (out, kinds) = det.redact("mail me john@corp.com");
        assert_eq!(out, "mail me [EMAIL]");
        assert_eq!(kinds, vec!["EMAIL"]);
    }

    #[test]
    fn test_redact_is_idempotent() {
        let det = PiiDetector::default();
        let input = "john@corp.com ssn 123-45-6789 ip 8.8.8.8 card 4111 1111 1111 1111";
        let (once, _) = det.redact(input);
        let (twice, again) = det.redact(&once);
        assert_eq!(once, twice);
        assert!(again.is_empty());
    }

    #[test]
    fn test_redact_value_recurses() {
        let det = PiiDetector::default();
        let args = json!({
            "to": "john@corp.com",
            "nested": {"list": ["call 415-555-0100 x11", 42]}
        });
        let (out, kinds) = det.redact_value(&args);
        assert_eq!(out["to"], "[EMAIL]");
        assert!(kinds.contains(&"EMAIL".to_string()));
        assert_eq!(out["nested"]["list"][1], 42);
    }

    #[test]
    fn test_custom_pattern_participates() {
        let det = PiiDetector::with_custom(&[PiiPatternSpec {
            name: "employee_id".to_string(),
            pattern: r"EMP-[0-9]{5}".to_string(),
        }])
        .unwrap();
        assert_eq!(det.detect("badge EMP-00421"), vec!["EMPLOYEE_ID"]);
        let (out, _) = det.redact("badge EMP-00421");
        assert_eq!(out, "badge [EMPLOYEE_ID]");
    }

    #[test]
    fn test_custom_pattern_length_cap_enforced() {
        let long = "a".repeat(501);
        let err = PiiDetector::with_custom(&[PiiPatternSpec {
            name: "x".to_string(),
            pattern: long,
        }]);
        assert!(err.is_err());
    }
}
