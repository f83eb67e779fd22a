//! Matching rule engine.
//!
//! A pure function from a country code and the allow/deny policy to a
//! decision. An unresolved code (`ZZ`) is never decided here beyond the
//! "no restriction configured" case; callers choose how to treat `unknown`.

use crate::config::{MatchingRule, Settings, UNKNOWN_COUNTRY};
use crate::pipeline::ValidationResult;

/// Applies the matching rule to `country_code`.
///
/// Membership is exact on normalized two-letter codes.
pub fn decide<S: AsRef<str>>(
    country_code: &str,
    rule: MatchingRule,
    allow_list: &[S],
    deny_list: &[S],
) -> ValidationResult {
    let contains = |list: &[S]| list.iter().any(|c| c.as_ref().eq_ignore_ascii_case(country_code));
    let unresolved = country_code == UNKNOWN_COUNTRY;

    match rule {
        MatchingRule::Allow => {
            if allow_list.is_empty() || contains(allow_list) {
                ValidationResult::Passed
            } else if unresolved {
                ValidationResult::Unknown
            } else {
                ValidationResult::Blocked
            }
        }
        MatchingRule::Deny => {
            if unresolved {
                ValidationResult::Unknown
            } else if contains(deny_list) {
                ValidationResult::Blocked
            } else {
                ValidationResult::Passed
            }
        }
    }
}

/// [`decide`] with the policy taken from `settings`.
pub fn decide_for(country_code: &str, settings: &Settings) -> ValidationResult {
    decide(
        country_code,
        settings.matching_rule,
        &settings.allow_list,
        &settings.deny_list,
    )
}
