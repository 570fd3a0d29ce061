use std::time::Duration;

use envconfig::Envconfig;
use url::Url;

use crate::error::{Error, Result};

/// Endpoint used when the SDK is used before [crate::GeoFeatures::initialize].
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080/";
pub const DEFAULT_GEOCODE_TIMEOUT: Duration = Duration::from_millis(500);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Configuration of a [crate::GeoFeatures] instance, constructed once and handed to
/// [crate::GeoFeatures::initialize].
#[derive(Clone, Debug, PartialEq)]
pub struct Config {
    base_url: Url,
    geocode_timeout: Duration,
    request_timeout: Duration,
}

impl Config {
    pub fn builder(base_url: impl Into<String>) -> ConfigBuilder {
        ConfigBuilder::new(base_url)
    }

    /// The flag service root, always ending in a slash.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Upper bound on the location lookup and reverse geocoding step of country resolution.
    pub fn geocode_timeout(&self) -> Duration {
        self.geocode_timeout
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Reads `GEO_FEATURES_BASE_URL`, `GEO_FEATURES_GEOCODE_TIMEOUT_MS` and
    /// `GEO_FEATURES_REQUEST_TIMEOUT_MS`, each falling back to its default.
    pub fn from_env() -> Result<Config> {
        let env = EnvConfig::init_from_env().map_err(|e| Error::Config(e.to_string()))?;
        env.into_config()
    }

    #[cfg(test)]
    fn from_vars(vars: &std::collections::HashMap<String, String>) -> Result<Config> {
        let env = EnvConfig::init_from_hashmap(vars).map_err(|e| Error::Config(e.to_string()))?;
        env.into_config()
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_url: Url::parse(DEFAULT_BASE_URL).expect("default base url is valid"),
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

pub struct ConfigBuilder {
    base_url: String,
    geocode_timeout: Duration,
    request_timeout: Duration,
}

impl ConfigBuilder {
    pub fn new(base_url: impl Into<String>) -> Self {
        ConfigBuilder {
            base_url: base_url.into(),
            geocode_timeout: DEFAULT_GEOCODE_TIMEOUT,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }

    pub fn geocode_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.geocode_timeout = timeout;
        self
    }

    pub fn request_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.request_timeout = timeout;
        self
    }

    pub fn build(&self) -> Result<Config> {
        if self.request_timeout.is_zero() {
            return Err(Error::Config("request timeout must be positive".into()));
        }
        Ok(Config {
            base_url: normalize_base_url(&self.base_url)?,
            geocode_timeout: self.geocode_timeout,
            request_timeout: self.request_timeout,
        })
    }
}

/// Parses a flag service root, appending the trailing slash relative paths are resolved
/// against.
pub fn normalize_base_url(base_url: &str) -> Result<Url> {
    let base_url = base_url.trim();
    let with_slash = if base_url.ends_with('/') {
        base_url.to_owned()
    } else {
        format!("{}/", base_url)
    };
    let url = Url::parse(&with_slash).map_err(|e| Error::InvalidUrl(format!("{}: {}", base_url, e)))?;
    if url.cannot_be_a_base() || !matches!(url.scheme(), "http" | "https") {
        return Err(Error::InvalidUrl(format!(
            "{}: expected an http or https url",
            base_url
        )));
    }
    Ok(url)
}

#[derive(Envconfig)]
struct EnvConfig {
    #[envconfig(from = "GEO_FEATURES_BASE_URL", default = "http://localhost:8080/")]
    base_url: String,

    #[envconfig(from = "GEO_FEATURES_GEOCODE_TIMEOUT_MS", default = "500")]
    geocode_timeout_ms: u64,

    #[envconfig(from = "GEO_FEATURES_REQUEST_TIMEOUT_MS", default = "10000")]
    request_timeout_ms: u64,
}

impl EnvConfig {
    fn into_config(self) -> Result<Config> {
        Config::builder(self.base_url)
            .geocode_timeout(Duration::from_millis(self.geocode_timeout_ms))
            .request_timeout(Duration::from_millis(self.request_timeout_ms))
            .build()
    }
}
