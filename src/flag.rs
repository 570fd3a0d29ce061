use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;

use crate::country::is_valid_country_code;
use crate::rule::{GeoRule, RuleStatus};

/// Flag is a named feature toggle with a default status and per-country overrides.
///
/// `geo_rules` keeps the order it was received in. Order does not influence which rule wins
/// except when the same country appears more than once, in which case the first one does.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Flag {
    pub id: Option<String>,
    #[serde(rename = "featureName")]
    pub name: String,
    pub default_status: bool,
    #[serde(default)]
    pub geo_rules: Vec<GeoRule>,

    // Opaque, server-assigned.
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

/// A data-quality problem found by [Flag::validate]. None of these stop a flag from being
/// evaluated.
#[derive(Clone, Debug, PartialEq)]
pub enum FlagProblem {
    EmptyName,
    MalformedCountryCode {
        rule_index: usize,
        country_code: String,
    },
    DuplicateCountryCode {
        rule_index: usize,
        country_code: String,
    },
    UnknownStatus {
        rule_index: usize,
        status: String,
    },
}

impl fmt::Display for FlagProblem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlagProblem::EmptyName => write!(f, "feature name is empty"),
            FlagProblem::MalformedCountryCode {
                rule_index,
                country_code,
            } => write!(
                f,
                "rule {} has malformed country code {:?} and will never match",
                rule_index, country_code
            ),
            FlagProblem::DuplicateCountryCode {
                rule_index,
                country_code,
            } => write!(
                f,
                "rule {} repeats country {} and is shadowed by an earlier rule",
                rule_index, country_code
            ),
            FlagProblem::UnknownStatus { rule_index, status } => write!(
                f,
                "rule {} has unknown status {:?} and is treated as disabled",
                rule_index, status
            ),
        }
    }
}

impl Flag {
    pub fn new(name: impl Into<String>, default_status: bool) -> Self {
        Flag {
            id: None,
            name: name.into(),
            default_status,
            geo_rules: Vec::new(),
            created_at: None,
            updated_at: None,
        }
    }

    pub fn with_rule(mut self, rule: GeoRule) -> Self {
        self.geo_rules.push(rule);
        self
    }

    /// The first rule that applies to `country_code`, with its position in the rule list.
    pub fn rule_for(&self, country_code: &str) -> Option<(usize, &GeoRule)> {
        self.geo_rules
            .iter()
            .enumerate()
            .find(|(_, rule)| rule.applies_to(country_code))
    }

    pub fn has_rule_for(&self, country_code: &str) -> bool {
        self.rule_for(country_code).is_some()
    }

    /// Country codes that have a rule, in rule order, without case-insensitive duplicates.
    pub fn countries(&self) -> Vec<String> {
        self.geo_rules
            .iter()
            .map(|rule| rule.country_code.clone())
            .unique_by(|code| code.trim().to_ascii_uppercase())
            .collect()
    }

    /// When the flag was last modified according to the server, if it sent a parseable RFC 3339
    /// timestamp. Falls back to the creation time.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.updated_at
            .as_deref()
            .and_then(parse_timestamp)
            .or_else(|| self.created_at.as_deref().and_then(parse_timestamp))
    }

    /// Returns true only if both flags carry timestamps and this one is strictly later.
    pub fn is_newer_than(&self, flag: &Flag) -> bool {
        match (self.last_modified(), flag.last_modified()) {
            (Some(ours), Some(theirs)) => ours > theirs,
            _ => false,
        }
    }

    pub fn validate(&self) -> Vec<FlagProblem> {
        let mut problems = Vec::new();
        if self.name.trim().is_empty() {
            problems.push(FlagProblem::EmptyName);
        }

        let mut seen = HashSet::new();
        for (rule_index, rule) in self.geo_rules.iter().enumerate() {
            if !is_valid_country_code(&rule.country_code) {
                problems.push(FlagProblem::MalformedCountryCode {
                    rule_index,
                    country_code: rule.country_code.clone(),
                });
            } else if !seen.insert(rule.country_code.trim().to_ascii_uppercase()) {
                problems.push(FlagProblem::DuplicateCountryCode {
                    rule_index,
                    country_code: rule.country_code.clone(),
                });
            }
            if let RuleStatus::Unknown(status) = &rule.status {
                problems.push(FlagProblem::UnknownStatus {
                    rule_index,
                    status: status.clone(),
                });
            }
        }
        problems
    }

    pub(crate) fn is_same_feature(&self, flag: &Flag) -> bool {
        match (&self.id, &flag.id) {
            (Some(ours), Some(theirs)) => ours == theirs,
            _ => self.name == flag.name,
        }
    }
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
