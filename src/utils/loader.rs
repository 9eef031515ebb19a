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

//! Rule file loading.
//!
//! Deserializes a YAML policy document into the typed rule tree. Unknown
//! keys are reported as warnings, not errors, so a file written for a newer
//! release still loads on an older one.

use crate::engine_core::errors::ShieldError;
use crate::engine_core::models::RuleSetSource;
use std::path::Path;
use tracing::warn;

const KNOWN_TOP_KEYS: &[&str] = &[
    "mode",
    "rules",
    "default_verdict",
    "rate_limits",
    "custom_pii",
    "honeypots",
    "sanitizer",
    "approval",
];

const KNOWN_RULE_KEYS: &[&str] = &[
    "id",
    "tool",
    "args_match",
    "session",
    "context",
    "chain",
    "then",
    "message",
    "severity",
    "approval_strategy",
    "pii_action",
];

/// Load and parse a rule file from disk.
pub fn load_rule_file(path: &Path) -> Result<RuleSetSource, ShieldError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        ShieldError::Config(format!("cannot read rule file {}: {e}", path.display()))
    })?;
    parse_rule_set(&raw)
}

/// Parse a YAML policy document, warning on unknown keys.
///
/// Values are transcoded through `serde_json::Value` before landing on the
/// typed tree: `serde_yaml_ng`'s enum deserialization only accepts YAML's
/// native `!tag` form, while the rule grammar (and its docs) use the
/// JSON-style externally tagged map form (e.g. `{ contains: "/etc" }`).
pub fn parse_rule_set(raw: &str) -> Result<RuleSetSource, ShieldError> {
    let value: serde_yaml_ng::Value = serde_yaml_ng::from_str(raw)
        .map_err(|e| ShieldError::RuleCompile(format!("rule file is not valid YAML: {e}")))?;
    warn_unknown_keys(&value);
    let json_value = serde_json::to_value(&value)
        .map_err(|e| ShieldError::RuleCompile(format!("rule file structure: {e}")))?;
    serde_json::from_value(json_value)
        .map_err(|e| ShieldError::RuleCompile(format!("rule file structure: {e}")))
}

fn warn_unknown_keys(value: &serde_yaml_ng::Value) {
    let Some(top) = value.as_mapping() else {
        return;
    };
    for key in top.keys() {
        if let Some(name) = key.as_str() {
            if !KNOWN_TOP_KEYS.contains(&name) {
                warn!(key = name, "unknown top-level key in rule file; ignored");
            }
        }
    }
    let Some(rules) = top.get("rules").and_then(|r| r.as_sequence()) else {
        return;
    };
    for rule in rules {
        let Some(mapping) = rule.as_mapping() else {
            continue;
        };
        for key in mapping.keys() {
            if let Some(name) = key.as_str() {
                if !KNOWN_RULE_KEYS.contains(&name) {
                    warn!(key = name, "unknown rule key in rule file; ignored");
                }
            }
        }
    }
}
