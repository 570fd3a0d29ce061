use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_with::skip_serializing_none;

use crate::country::same_country;

/// RuleStatus is the state a [GeoRule] forces on its flag when the rule matches.
///
/// The wire format is a plain string. Anything other than `"enabled"` or `"disabled"` is kept
/// verbatim as [RuleStatus::Unknown] so that it survives a read-modify-write cycle, and is
/// treated as not enabled.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum RuleStatus {
    Enabled,
    Disabled,
    Unknown(String),
}

impl RuleStatus {
    pub fn is_enabled(&self) -> bool {
        *self == RuleStatus::Enabled
    }

    pub fn as_str(&self) -> &str {
        match self {
            RuleStatus::Enabled => "enabled",
            RuleStatus::Disabled => "disabled",
            RuleStatus::Unknown(s) => s,
        }
    }
}

impl From<&str> for RuleStatus {
    fn from(s: &str) -> Self {
        match s {
            "enabled" => RuleStatus::Enabled,
            "disabled" => RuleStatus::Disabled,
            _ => RuleStatus::Unknown(s.to_owned()),
        }
    }
}

impl From<bool> for RuleStatus {
    fn from(enabled: bool) -> Self {
        if enabled {
            RuleStatus::Enabled
        } else {
            RuleStatus::Disabled
        }
    }
}

impl PartialEq<&str> for RuleStatus {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl fmt::Display for RuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for RuleStatus {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for RuleStatus {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(RuleStatus::from(s.as_str()))
    }
}

/// GeoRule overrides a flag's state for a single country.
#[skip_serializing_none]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeoRule {
    pub country_code: String,
    pub status: RuleStatus,
    pub value: Option<String>,
}

impl GeoRule {
    pub fn new(country_code: impl Into<String>, status: impl Into<RuleStatus>) -> Self {
        GeoRule {
            country_code: country_code.into(),
            status: status.into(),
            value: None,
        }
    }

    pub fn enabled(country_code: impl Into<String>) -> Self {
        Self::new(country_code, RuleStatus::Enabled)
    }

    pub fn disabled(country_code: impl Into<String>) -> Self {
        Self::new(country_code, RuleStatus::Disabled)
    }

    pub fn with_value(mut self, value: impl Into<String>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// A rule applies to a country when both codes are well-formed and equal ignoring case.
    pub fn applies_to(&self, country_code: &str) -> bool {
        same_country(&self.country_code, country_code)
    }
}
