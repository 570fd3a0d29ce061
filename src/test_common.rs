#![cfg(test)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use maplit::hashmap;

use crate::client::FlagSource;
use crate::error::{Error, Result};
use crate::eval::{matches, EvaluationResult};
use crate::flag::Flag;
use crate::location::{Coordinates, LocaleSource, LocationCapability, LocationPermission, LocationProvider};

pub struct TestFlags {
    flags: HashMap<String, Flag>,
}

impl TestFlags {
    pub fn new() -> Self {
        Self {
            flags: hashmap! {
                "black_friday_discount".to_string() => serde_json::from_str(r#"{
                        "id": "bf-2024",
                        "featureName": "black_friday_discount",
                        "defaultStatus": false,
                        "geoRules": [
                            {"countryCode": "US", "status": "enabled", "value": "20"},
                            {"countryCode": "GB", "status": "disabled"}
                        ],
                        "createdAt": "2024-11-01T10:00:00Z",
                        "updatedAt": "2024-11-20T08:30:00Z"
                    }"#).unwrap(),
                "dark_mode".to_string() => serde_json::from_str(r#"{
                        "id": "dm-1",
                        "featureName": "dark_mode",
                        "defaultStatus": true,
                        "geoRules": [
                            {"countryCode": "DE", "status": "enabled", "value": "night"},
                            {"countryCode": "IL", "status": "disabled"}
                        ]
                    }"#).unwrap(),
                "duplicate_rules".to_string() => serde_json::from_str(r#"{
                        "id": "dup-1",
                        "featureName": "duplicate_rules",
                        "defaultStatus": false,
                        "geoRules": [
                            {"countryCode": "FR", "status": "enabled", "value": "first"},
                            {"countryCode": "fr", "status": "disabled", "value": "second"}
                        ]
                    }"#).unwrap(),
            },
        }
    }

    pub fn flag(&self, name: &str) -> Flag {
        self.flags.get(name).cloned().unwrap()
    }

    pub fn all(&self) -> Vec<Flag> {
        let mut flags: Vec<Flag> = self.flags.values().cloned().collect();
        flags.sort_by(|a, b| a.name.cmp(&b.name));
        flags
    }
}

pub struct FixedLocale(pub Option<String>);

impl LocaleSource for FixedLocale {
    fn system_locale(&self) -> Option<String> {
        self.0.clone()
    }
}

/// A scripted device: one fix, one geocoder answer, optional latency.
pub struct FakeLocation {
    permission: LocationPermission,
    coordinates: Option<Coordinates>,
    country: std::result::Result<Option<String>, String>,
    delay: Option<Duration>,
    gps_only: bool,
    calls: Arc<AtomicUsize>,
}

impl FakeLocation {
    pub fn in_country(code: &str) -> Self {
        FakeLocation {
            permission: LocationPermission::Fine,
            coordinates: Some(Coordinates {
                latitude: 52.52,
                longitude: 13.405,
            }),
            country: Ok(Some(code.to_string())),
            delay: None,
            gps_only: false,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn without_fix() -> Self {
        FakeLocation {
            coordinates: None,
            ..Self::in_country("DE")
        }
    }

    pub fn geocoder_error() -> Self {
        FakeLocation {
            country: Err("geocoder offline".to_string()),
            ..Self::in_country("DE")
        }
    }

    pub fn with_permission(mut self, permission: LocationPermission) -> Self {
        self.permission = permission;
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Only the satellite provider has a fix.
    pub fn gps_only(mut self) -> Self {
        self.gps_only = true;
        self
    }

    pub fn calls(&self) -> Arc<AtomicUsize> {
        self.calls.clone()
    }
}

#[async_trait]
impl LocationCapability for FakeLocation {
    fn permission(&self) -> LocationPermission {
        self.permission
    }

    async fn last_known_location(
        &self,
        provider: LocationProvider,
    ) -> Result<Option<Coordinates>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.gps_only && provider != LocationProvider::Gps {
            return Ok(None);
        }
        Ok(self.coordinates)
    }

    async fn reverse_geocode(&self, _coordinates: Coordinates) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.country.clone().map_err(Error::LocationUnavailable)
    }
}

/// An in-process flag service that evaluates queries with the local matcher.
pub struct FakeSource {
    flags: Mutex<Vec<Flag>>,
    failing: bool,
    queries: Arc<AtomicUsize>,
    next_id: AtomicUsize,
}

impl FakeSource {
    pub fn new(flags: Vec<Flag>) -> Self {
        FakeSource {
            flags: Mutex::new(flags),
            failing: false,
            queries: Arc::new(AtomicUsize::new(0)),
            next_id: AtomicUsize::new(1),
        }
    }

    /// A service that answers every request with a 503.
    pub fn failing() -> Self {
        FakeSource {
            failing: true,
            ..Self::new(Vec::new())
        }
    }

    pub fn queries(&self) -> Arc<AtomicUsize> {
        self.queries.clone()
    }

    fn check(&self) -> Result<()> {
        if self.failing {
            return Err(Error::Server {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn find(&self, predicate: impl Fn(&Flag) -> bool, what: &str) -> Result<Flag> {
        self.check()?;
        self.flags
            .lock()
            .unwrap()
            .iter()
            .find(|flag| predicate(*flag))
            .cloned()
            .ok_or_else(|| Error::NotFound(what.to_string()))
    }
}

#[async_trait]
impl FlagSource for FakeSource {
    async fn all_flags(&self) -> Result<Vec<Flag>> {
        self.check()?;
        Ok(self.flags.lock().unwrap().clone())
    }

    async fn flag_by_id(&self, id: &str) -> Result<Flag> {
        self.find(|flag| flag.id.as_deref() == Some(id), id)
    }

    async fn flag_by_name(&self, name: &str) -> Result<Flag> {
        self.find(|flag| flag.name == name, name)
    }

    async fn query(&self, name: &str, country_code: &str) -> Result<EvaluationResult> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        let flag = self.find(|flag| flag.name == name, name)?;
        Ok(matches(&flag, country_code))
    }

    async fn create(&self, flag: &Flag) -> Result<Flag> {
        self.check()?;
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let created = Flag {
            id: Some(format!("generated-{}", id)),
            ..flag.clone()
        };
        self.flags.lock().unwrap().push(created.clone());
        Ok(created)
    }

    async fn update(&self, id: &str, flag: &Flag) -> Result<Flag> {
        self.check()?;
        let mut flags = self.flags.lock().unwrap();
        let existing = flags
            .iter_mut()
            .find(|existing| existing.id.as_deref() == Some(id))
            .ok_or_else(|| Error::NotFound(id.to_string()))?;
        *existing = Flag {
            id: Some(id.to_string()),
            ..flag.clone()
        };
        Ok(existing.clone())
    }

    async fn delete(&self, id: &str) -> Result<()> {
        self.check()?;
        let mut flags = self.flags.lock().unwrap();
        let before = flags.len();
        flags.retain(|flag| flag.id.as_deref() != Some(id));
        if flags.len() == before {
            return Err(Error::NotFound(id.to_string()));
        }
        Ok(())
    }
}
