use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, warn};
use serde::Serialize;

use crate::config::DEFAULT_GEOCODE_TIMEOUT;
use crate::country::{country_from_locale, normalize_country_code, DEFAULT_COUNTRY};
use crate::error::Result;
use crate::settings::{SettingsStore, USER_COUNTRY_KEY};

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct Coordinates {
    pub latitude: f64,
    pub longitude: f64,
}

impl fmt::Display for Coordinates {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.latitude, self.longitude)
    }
}

/// What the user allowed the application to know about its position.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocationPermission {
    /// Precise location: satellite and network providers.
    Fine,
    /// Approximate location: network provider only.
    Coarse,
    Denied,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LocationProvider {
    Gps,
    Network,
}

impl LocationPermission {
    /// Providers worth asking for a last known location, most precise first.
    pub fn providers(self) -> &'static [LocationProvider] {
        match self {
            LocationPermission::Fine => &[LocationProvider::Gps, LocationProvider::Network],
            LocationPermission::Coarse => &[LocationProvider::Network],
            LocationPermission::Denied => &[],
        }
    }
}

/// LocationCapability is the device's positioning and geocoding service.
///
/// Errors and empty answers are both treated as "no result" by [CountryResolver].
#[async_trait]
pub trait LocationCapability: Send + Sync {
    fn permission(&self) -> LocationPermission;

    async fn last_known_location(&self, provider: LocationProvider)
        -> Result<Option<Coordinates>>;

    /// Returns the ISO 3166-1 alpha-2 code of the country containing `coordinates`.
    async fn reverse_geocode(&self, coordinates: Coordinates) -> Result<Option<String>>;
}

/// LocaleSource provides the system locale identifier, e.g. `en_US` or `he-IL`.
pub trait LocaleSource: Send + Sync {
    fn system_locale(&self) -> Option<String>;
}

/// The operating system's locale, read through `sys-locale`.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLocale;

impl LocaleSource for SystemLocale {
    fn system_locale(&self) -> Option<String> {
        sys_locale::get_locale()
    }
}

/// Where a resolved country code came from.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Provenance {
    Gps,
    ManualOverride,
    LocaleFallback,
}

#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountryResolution {
    pub country_code: String,
    pub provenance: Provenance,
}

impl CountryResolution {
    pub fn new(country_code: impl Into<String>, provenance: Provenance) -> Self {
        CountryResolution {
            country_code: country_code.into(),
            provenance,
        }
    }
}

/// CountryResolver picks the country that governs flag evaluation.
///
/// Sources are tried in a fixed order, each only when the previous one produced nothing:
/// 1. the device location, reverse-geocoded, when a capability is bound and permission granted;
/// 2. the manual override in the settings store;
/// 3. the system locale, or [crate::DEFAULT_LOCALE] when it has no region.
///
/// Resolution never fails.
#[derive(Clone)]
pub struct CountryResolver {
    location: Option<Arc<dyn LocationCapability>>,
    settings: Arc<dyn SettingsStore>,
    locale: Arc<dyn LocaleSource>,
    geocode_timeout: Duration,
}

impl CountryResolver {
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        CountryResolver {
            location: None,
            settings,
            locale: Arc::new(SystemLocale),
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
        }
    }

    pub fn with_location(mut self, location: Option<Arc<dyn LocationCapability>>) -> Self {
        self.location = location;
        self
    }

    pub fn with_locale(mut self, locale: Arc<dyn LocaleSource>) -> Self {
        self.locale = locale;
        self
    }

    pub fn with_geocode_timeout(mut self, timeout: Duration) -> Self {
        self.geocode_timeout = timeout;
        self
    }

    pub fn has_location_permission(&self) -> bool {
        self.location
            .as_ref()
            .map(|location| location.permission() != LocationPermission::Denied)
            .unwrap_or(false)
    }

    pub async fn resolve(&self) -> CountryResolution {
        match &self.location {
            Some(location) if location.permission() != LocationPermission::Denied => {
                if let Some(country) = self.country_from_location(&**location).await {
                    debug!("Country from location: {}", country);
                    return CountryResolution::new(country, Provenance::Gps);
                }
            }
            Some(_) => debug!("No location permission, skipping location lookup"),
            None => debug!("Location not initialized, skipping location lookup"),
        }

        if let Some(country) = self.manual_override() {
            debug!("Using manual override: {}", country);
            return CountryResolution::new(country, Provenance::ManualOverride);
        }

        let country = self.locale_country();
        debug!("No location and no manual override, using locale: {}", country);
        CountryResolution::new(country, Provenance::LocaleFallback)
    }

    /// The manual override, if one is stored and well-formed.
    pub fn manual_override(&self) -> Option<String> {
        match self.settings.get(USER_COUNTRY_KEY) {
            Ok(Some(stored)) => {
                let country = normalize_country_code(&stored);
                if country.is_none() {
                    warn!("Ignoring malformed manual country override {:?}", stored);
                }
                country
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Could not read manual country override: {}", e);
                None
            }
        }
    }

    fn locale_country(&self) -> String {
        match self.locale.system_locale() {
            Some(locale) => country_from_locale(&locale).unwrap_or_else(|| {
                warn!("Locale {:?} has no region, using {}", locale, DEFAULT_COUNTRY);
                DEFAULT_COUNTRY.to_owned()
            }),
            None => {
                warn!("Could not read system locale, using {}", DEFAULT_COUNTRY);
                DEFAULT_COUNTRY.to_owned()
            }
        }
    }

    // Bounded by the geocode timeout; on expiry the lookup future is dropped, so a late answer
    // cannot leak into a later resolution.
    async fn country_from_location(&self, location: &dyn LocationCapability) -> Option<String> {
        match tokio::time::timeout(self.geocode_timeout, locate(location)).await {
            Ok(country) => country,
            Err(_) => {
                warn!(
                    "Location lookup did not finish within {:?}",
                    self.geocode_timeout
                );
                None
            }
        }
    }
}

async fn locate(location: &dyn LocationCapability) -> Option<String> {
    let coordinates = last_known_location(location).await?;
    match location.reverse_geocode(coordinates).await {
        Ok(Some(country)) => {
            let normalized = normalize_country_code(&country);
            if normalized.is_none() {
                warn!("Geocoder returned malformed country code {:?}", country);
            }
            normalized
        }
        Ok(None) => {
            warn!("No country found for {}", coordinates);
            None
        }
        Err(e) => {
            warn!("Error geocoding {}: {}", coordinates, e);
            None
        }
    }
}

async fn last_known_location(location: &dyn LocationCapability) -> Option<Coordinates> {
    for provider in location.permission().providers() {
        match location.last_known_location(*provider).await {
            Ok(Some(coordinates)) => {
                debug!("Got location from {:?}: {}", provider, coordinates);
                return Some(coordinates);
            }
            Ok(None) => {}
            Err(e) => warn!("Error getting location from {:?}: {}", provider, e),
        }
    }
    warn!("No last known location available from any provider");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::MemorySettings;
    use crate::test_common::{FakeLocation, FixedLocale};
    use spectral::prelude::*;

    fn resolver_with(
        location: Option<FakeLocation>,
        override_country: Option<&str>,
        locale: Option<&str>,
    ) -> CountryResolver {
        let settings = Arc::new(MemorySettings::new());
        if let Some(country) = override_country {
            settings.set(USER_COUNTRY_KEY, country).unwrap();
        }
        CountryResolver::new(settings)
            .with_location(location.map(|l| Arc::new(l) as Arc<dyn LocationCapability>))
            .with_locale(Arc::new(FixedLocale(locale.map(String::from))))
            .with_geocode_timeout(Duration::from_millis(200))
    }

    #[tokio::test]
    async fn gps_wins_over_manual_override() {
        let resolver = resolver_with(Some(FakeLocation::in_country("DE")), Some("FR"), Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("DE", Provenance::Gps));
    }

    #[tokio::test]
    async fn override_used_when_gps_unavailable() {
        let resolver = resolver_with(Some(FakeLocation::without_fix()), Some("FR"), Some("he_IL"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("FR", Provenance::ManualOverride));
    }

    #[tokio::test]
    async fn override_used_without_location_capability() {
        let resolver = resolver_with(None, Some("fr"), Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("FR", Provenance::ManualOverride));
    }

    #[tokio::test]
    async fn denied_permission_skips_location() {
        let location = FakeLocation::in_country("DE").with_permission(LocationPermission::Denied);
        let calls = location.calls();
        let resolver = resolver_with(Some(location), Some("FR"), Some("en_US"));

        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("FR", Provenance::ManualOverride));
        assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 0);
        assert!(!resolver.has_location_permission());
    }

    #[tokio::test]
    async fn degrades_to_locale() {
        let resolver = resolver_with(None, None, Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("US", Provenance::LocaleFallback));
    }

    #[tokio::test]
    async fn missing_locale_falls_back_to_default() {
        let resolver = resolver_with(None, None, None);
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new(DEFAULT_COUNTRY, Provenance::LocaleFallback));
    }

    #[tokio::test]
    async fn locale_without_region_falls_back_to_default() {
        let resolver = resolver_with(None, None, Some("C"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new(DEFAULT_COUNTRY, Provenance::LocaleFallback));
    }

    #[tokio::test]
    async fn geocoding_failure_falls_through() {
        let resolver = resolver_with(Some(FakeLocation::geocoder_error()), None, Some("he-IL"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("IL", Provenance::LocaleFallback));
    }

    #[tokio::test]
    async fn slow_geocoder_times_out() {
        let location = FakeLocation::in_country("DE").with_delay(Duration::from_secs(30));
        let resolver = resolver_with(Some(location), Some("FR"), Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("FR", Provenance::ManualOverride));
    }

    #[tokio::test]
    async fn coarse_permission_uses_network_provider_only() {
        let location = FakeLocation::in_country("JP")
            .with_permission(LocationPermission::Coarse)
            .gps_only();
        let resolver = resolver_with(Some(location), None, Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("US", Provenance::LocaleFallback));

        let location = FakeLocation::in_country("JP").gps_only();
        let resolver = resolver_with(Some(location), None, Some("en_US"));
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("JP", Provenance::Gps));
    }

    #[tokio::test]
    async fn geocoded_code_is_normalized() {
        let resolver = resolver_with(Some(FakeLocation::in_country(" gb ")), None, None);
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("GB", Provenance::Gps));
    }

    #[tokio::test]
    async fn malformed_override_is_ignored() {
        let resolver = resolver_with(None, Some("France"), Some("de_DE"));
        assert_that!(resolver.manual_override()).is_none();
        assert_that!(resolver.resolve().await)
            .is_equal_to(CountryResolution::new("DE", Provenance::LocaleFallback));
    }

    #[test]
    fn permission_providers() {
        assert_eq!(
            LocationPermission::Fine.providers(),
            &[LocationProvider::Gps, LocationProvider::Network]
        );
        assert_eq!(
            LocationPermission::Coarse.providers(),
            &[LocationProvider::Network]
        );
        assert!(LocationPermission::Denied.providers().is_empty());
    }

    #[test]
    fn provenance_serialization() {
        assert_eq!(
            serde_json::to_value(CountryResolution::new("IL", Provenance::ManualOverride))
                .unwrap(),
            serde_json::json!({"countryCode": "IL", "provenance": "MANUAL_OVERRIDE"})
        );
    }
}
