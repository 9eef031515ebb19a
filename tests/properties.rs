use policyshield::engine::matcher::CompiledRuleSet;
use policyshield::engine::sanitizer::Sanitizer;
use policyshield::engine_core::models::{CountPredicate, RuleSetSource, SanitizerSpec};
use policyshield::engine_core::pii::PiiDetector;
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #[test]
    fn test_redaction_is_idempotent(input in "\\PC{0,200}") {
        let detector = PiiDetector::default();
        let (once, _) = detector.redact(&input);
        let (twice, kinds_again) = detector.redact(&once);
        prop_assert_eq!(&once, &twice);
        prop_assert!(kinds_again.is_empty());
    }

    #[test]
    fn test_detect_never_panics(input in "\\PC{0,500}") {
        let detector = PiiDetector::default();
        let _ = detector.detect(&input);
    }

    #[test]
    fn test_sanitizer_never_panics_and_output_is_clean(input in "\\PC{0,200}") {
        let sanitizer = Sanitizer::compile(&SanitizerSpec::default()).unwrap();
        if let Ok(out) = sanitizer.sanitize(&json!({ "text": input })) {
            let text = out["text"].as_str().unwrap();
            let nul = '\u{0000}';
            let has_nul = text.contains(nul);
            prop_assert!(!has_nul);
            prop_assert!(!text.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\t' | '\r')));
        }
    }

    #[test]
    fn test_contains_rules_compile_for_arbitrary_needles(needle in "[a-zA-Z0-9 /._-]{1,40}") {
        let source: RuleSetSource = policyshield::utils::loader::parse_rule_set(&format!(
            "rules:\n  - id: r\n    tool: x\n    args_match:\n      a: {{ contains: \"{needle}\" }}\n    then: BLOCK\n"
        )).unwrap();
        prop_assert!(CompiledRuleSet::compile(&source, None).is_ok());
    }

    #[test]
    fn test_count_predicates_are_consistent(count in 0u64..100, bound in 0u64..100) {
        let gt = CountPredicate { gt: Some(bound), ..Default::default() };
        let lt = CountPredicate { lt: Some(bound), ..Default::default() };
        // gt and lt over the same bound never both hold
        prop_assert!(!(gt.holds(count) && lt.holds(count)));
        let eq = CountPredicate { eq: Some(bound), ..Default::default() };
        prop_assert_eq!(eq.holds(count), count == bound);
    }
}
