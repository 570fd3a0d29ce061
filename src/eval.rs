use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::flag::Flag;

/// The decision handed back to callers: whether the feature is on and the value that comes with
/// it. Also the response body of the remote query endpoint.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub enabled: bool,
    #[serde(default)]
    pub value: Option<String>,
}

impl EvaluationResult {
    pub fn new(enabled: bool, value: Option<String>) -> Self {
        EvaluationResult { enabled, value }
    }

    /// The conservative result used whenever a flag cannot be evaluated.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Parses the opaque value, e.g. a discount percentage. Returns None if there is no value or
    /// it does not parse as `T`.
    pub fn value_as<T: FromStr>(&self) -> Option<T> {
        self.value.as_deref().and_then(|v| v.trim().parse().ok())
    }
}

/// A Detail is returned from [evaluate], combining the result of a flag evaluation with an
/// explanation of how it was calculated.
#[derive(Clone, Debug, PartialEq)]
pub struct Detail {
    pub result: EvaluationResult,
    pub reason: Reason,
}

impl Detail {
    /// Returns the conservative disabled result, explained by `error`.
    pub fn err(error: ErrorKind) -> Detail {
        Detail {
            result: EvaluationResult::disabled(),
            reason: Reason::Error { error },
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.reason, Reason::Error { .. })
    }
}

/// Reason describes why an evaluation produced a particular result.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "kind")]
pub enum Reason {
    /// RuleMatch indicates that one of the flag's geo rules applied to the country.
    #[serde(rename_all = "camelCase")]
    RuleMatch {
        /// Zero-based index of the [crate::GeoRule] that matched.
        rule_index: usize,
        /// The country code as written in the matching rule.
        country_code: String,
    },
    /// Default indicates that no rule applied and the flag's default status was used.
    Default,
    /// Remote indicates that the flag service evaluated the flag. The service applies the same
    /// matching semantics as [evaluate], but does not report which branch it took.
    Remote,
    /// Error indicates that the flag could not be evaluated and the conservative default was
    /// returned.
    Error {
        #[serde(rename = "errorKind")]
        error: ErrorKind,
    },
}

/// ErrorKind explains a [Reason::Error].
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    /// The flag service does not know the requested feature.
    FlagNotFound,
    /// The flag service could not be reached or answered with an error.
    Unavailable,
}

/// Evaluate a flag for a country.
///
/// The first geo rule whose country code equals `country_code`, ignoring case, decides the
/// result. Without one the flag's default status applies and there is no value. Malformed
/// country codes never match a rule. This function performs no I/O and always returns the same
/// result for the same inputs.
pub fn evaluate(flag: &Flag, country_code: &str) -> Detail {
    match flag.rule_for(country_code) {
        Some((rule_index, rule)) => Detail {
            result: EvaluationResult {
                enabled: rule.status.is_enabled(),
                value: rule.value.clone(),
            },
            reason: Reason::RuleMatch {
                rule_index,
                country_code: rule.country_code.clone(),
            },
        },
        None => Detail {
            result: EvaluationResult {
                enabled: flag.default_status,
                value: None,
            },
            reason: Reason::Default,
        },
    }
}

/// Shorthand for [evaluate] without the explanation.
pub fn matches(flag: &Flag, country_code: &str) -> EvaluationResult {
    evaluate(flag, country_code).result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::{GeoRule, RuleStatus};
    use crate::test_common::TestFlags;
    use proptest::prelude::*;
    use serde_json::json;
    use spectral::prelude::*;
    use test_case::test_case;

    #[test]
    fn black_friday_scenario() {
        let flags = TestFlags::new();
        let flag = flags.flag("black_friday_discount");

        let detail = evaluate(&flag, "US");
        assert_that!(detail.result).is_equal_to(EvaluationResult::new(true, Some("20".into())));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch {
            rule_index: 0,
            country_code: "US".into(),
        });

        let detail = evaluate(&flag, "IL");
        assert_that!(detail.result).is_equal_to(EvaluationResult::new(false, None));
        assert_that!(detail.reason).is_equal_to(Reason::Default);
    }

    #[test_case("il"; "lower case")]
    #[test_case("IL"; "upper case")]
    #[test_case("Il"; "mixed case")]
    #[test_case(" il "; "padded")]
    fn country_match_ignores_case(country: &str) {
        let flag = TestFlags::new().flag("dark_mode");
        assert_that!(matches(&flag, country)).is_equal_to(EvaluationResult::new(false, None));
        assert_that!(evaluate(&flag, country).reason).is_equal_to(Reason::RuleMatch {
            rule_index: 1,
            country_code: "IL".into(),
        });
    }

    #[test]
    fn disabled_rule_overrides_enabled_default() {
        let flag = TestFlags::new().flag("dark_mode");
        assert_that!(matches(&flag, "IL").enabled).is_false();
        assert_that!(matches(&flag, "FR").enabled).is_true();
    }

    #[test]
    fn rule_value_is_returned_even_when_disabled() {
        let flag = Flag::new("banner", true).with_rule(GeoRule::disabled("DE").with_value("hidden"));
        assert_that!(matches(&flag, "de"))
            .is_equal_to(EvaluationResult::new(false, Some("hidden".into())));
    }

    #[test]
    fn first_duplicate_rule_wins() {
        let flag = TestFlags::new().flag("duplicate_rules");
        let detail = evaluate(&flag, "FR");
        assert_that!(detail.result).is_equal_to(EvaluationResult::new(true, Some("first".into())));
        assert_that!(detail.reason).is_equal_to(Reason::RuleMatch {
            rule_index: 0,
            country_code: "FR".into(),
        });
    }

    #[test]
    fn unknown_status_is_not_enabled() {
        let flag = Flag::new("beta", true).with_rule(GeoRule::new("JP", RuleStatus::from("beta")));
        assert_that!(matches(&flag, "JP")).is_equal_to(EvaluationResult::new(false, None));
    }

    #[test_case(""; "empty")]
    #[test_case("USA"; "alpha-3")]
    #[test_case("??"; "punctuation")]
    #[test_case("United States"; "name")]
    fn malformed_country_falls_to_default(country: &str) {
        let flag = TestFlags::new().flag("black_friday_discount");
        let detail = evaluate(&flag, country);
        assert_that!(detail.result).is_equal_to(EvaluationResult::new(false, None));
        assert_that!(detail.reason).is_equal_to(Reason::Default);
    }

    #[test]
    fn malformed_rule_never_matches() {
        let flag = Flag::new("promo", false).with_rule(GeoRule::enabled("USA").with_value("x"));
        assert_that!(evaluate(&flag, "USA").reason).is_equal_to(Reason::Default);
    }

    #[test_case(Some("20"), Some(20); "number")]
    #[test_case(Some(" 15 "), Some(15); "padded number")]
    #[test_case(Some("twenty"), None; "not a number")]
    #[test_case(None, None; "no value")]
    fn parses_value(value: Option<&str>, expected: Option<u32>) {
        let result = EvaluationResult::new(true, value.map(String::from));
        assert_that!(result.value_as::<u32>()).is_equal_to(expected);
    }

    #[test]
    fn query_response_accepts_null_or_missing_value() {
        let with_null: EvaluationResult =
            serde_json::from_value(json!({"enabled": true, "value": null})).unwrap();
        let without: EvaluationResult = serde_json::from_value(json!({"enabled": true})).unwrap();
        assert_that!(with_null).is_equal_to(&without);
        assert_that!(without.value).is_none();
    }

    #[test]
    fn error_detail_is_disabled() {
        let detail = Detail::err(ErrorKind::FlagNotFound);
        assert!(detail.is_error());
        assert_that!(detail.result).is_equal_to(EvaluationResult::disabled());
        assert!(!evaluate(&Flag::new("x", true), "US").is_error());
    }

    #[test]
    fn reason_serialization() {
        assert_eq!(
            serde_json::to_value(Reason::RuleMatch {
                rule_index: 2,
                country_code: "IL".into()
            })
            .unwrap(),
            json!({"kind": "RULE_MATCH", "ruleIndex": 2, "countryCode": "IL"})
        );
        assert_eq!(
            serde_json::to_value(Reason::Default).unwrap(),
            json!({"kind": "DEFAULT"})
        );
        assert_eq!(
            serde_json::to_value(Reason::Error {
                error: ErrorKind::FlagNotFound
            })
            .unwrap(),
            json!({"kind": "ERROR", "errorKind": "FLAG_NOT_FOUND"})
        );
    }

    fn any_rule() -> impl Strategy<Value = GeoRule> {
        (
            "[A-Za-z]{2}",
            prop::bool::ANY,
            prop::option::of("[a-z0-9]{1,8}"),
        )
            .prop_map(|(code, enabled, value)| GeoRule {
                country_code: code,
                status: RuleStatus::from(enabled),
                value,
            })
    }

    fn any_flag() -> impl Strategy<Value = Flag> {
        (
            prop::bool::ANY,
            prop::collection::vec(any_rule(), 0..8),
        )
            .prop_map(|(default_status, geo_rules)| Flag {
                geo_rules,
                ..Flag::new("generated", default_status)
            })
    }

    proptest! {
        #[test]
        fn evaluation_is_deterministic(flag in any_flag(), country in "[A-Za-z]{2}") {
            let snapshot = flag.clone();
            let first = evaluate(&flag, &country);
            let second = evaluate(&flag, &country);
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(&flag, &snapshot);
        }
    }

    proptest! {
        #[test]
        fn empty_rules_use_default(default_status in prop::bool::ANY, country in ".{0,4}") {
            let flag = Flag::new("generated", default_status);
            prop_assert_eq!(matches(&flag, &country), EvaluationResult::new(default_status, None));
        }
    }

    proptest! {
        #[test]
        fn case_does_not_change_result(flag in any_flag(), country in "[A-Za-z]{2}") {
            prop_assert_eq!(
                matches(&flag, &country.to_ascii_lowercase()),
                matches(&flag, &country.to_ascii_uppercase())
            );
        }
    }

    proptest! {
        #[test]
        fn first_rule_for_country_decides(
            flag in any_flag(),
            country in "[A-Z]{2}",
            value in "[a-z]{1,8}"
        ) {
            let mut flag = flag;
            flag.geo_rules.retain(|rule| !rule.applies_to(&country));
            let insert_at = flag.geo_rules.len() / 2;
            flag.geo_rules.insert(insert_at, GeoRule::enabled(country.clone()).with_value(value.clone()));
            flag.geo_rules.push(GeoRule::disabled(country.clone()));

            prop_assert_eq!(matches(&flag, &country), EvaluationResult::new(true, Some(value)));
        }
    }
}
