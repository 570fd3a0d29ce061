use std::sync::{Arc, OnceLock};

use log::{debug, error, info, warn};

use crate::client::{FlagSource, HttpFlagSource};
use crate::config::{Config, DEFAULT_BASE_URL};
use crate::country::{normalize_country_code, same_country};
use crate::error::Result;
use crate::eval::{evaluate, Detail, ErrorKind, EvaluationResult, Reason};
use crate::flag::Flag;
use crate::location::{CountryResolution, CountryResolver, LocaleSource, LocationCapability, SystemLocale};
use crate::settings::{SettingsStore, USER_COUNTRY_KEY};
use crate::store::{MemoryStore, Store};

enum State {
    Uninitialized,
    Initialized {
        config: Config,
        source: Arc<dyn FlagSource>,
        location: Option<Arc<dyn LocationCapability>>,
    },
}

/// GeoFeatures answers "is this feature on here?" for the country the user is in.
///
/// Every query is total: network failures, unknown features and missing location all turn into
/// a disabled result, an empty list, `None` or `false`, and are logged. Share an instance behind
/// an `Arc`; all query methods take `&self`.
pub struct GeoFeatures {
    state: State,
    settings: Arc<dyn SettingsStore>,
    locale: Arc<dyn LocaleSource>,
    cache: MemoryStore,
    fallback_source: OnceLock<Option<Arc<dyn FlagSource>>>,
}

impl GeoFeatures {
    /// Creates an uninitialized instance. Until [GeoFeatures::initialize] is called, requests
    /// go to [DEFAULT_BASE_URL] and no location capability is bound.
    pub fn new(settings: Arc<dyn SettingsStore>) -> Self {
        GeoFeatures {
            state: State::Uninitialized,
            settings,
            locale: Arc::new(SystemLocale),
            cache: MemoryStore::new(),
            fallback_source: OnceLock::new(),
        }
    }

    pub fn with_locale_source(mut self, locale: Arc<dyn LocaleSource>) -> Self {
        self.locale = locale;
        self
    }

    /// Points the instance at the flag service in `config` and binds the optional location
    /// capability. Calling it again replaces both and drops the local flag snapshot.
    pub fn initialize(
        &mut self,
        config: Config,
        location: Option<Arc<dyn LocationCapability>>,
    ) -> Result<()> {
        let source = HttpFlagSource::new(&config)?;
        self.initialize_with_source(config, Arc::new(source), location);
        Ok(())
    }

    /// Like [GeoFeatures::initialize], with a caller supplied [FlagSource].
    pub fn initialize_with_source(
        &mut self,
        config: Config,
        source: Arc<dyn FlagSource>,
        location: Option<Arc<dyn LocationCapability>>,
    ) {
        info!(
            "Initialized with {} (location {})",
            config.base_url(),
            if location.is_some() { "bound" } else { "not bound" }
        );
        self.cache.clear();
        self.state = State::Initialized {
            config,
            source,
            location,
        };
    }

    pub fn is_initialized(&self) -> bool {
        matches!(self.state, State::Initialized { .. })
    }

    pub fn config(&self) -> Option<&Config> {
        match &self.state {
            State::Initialized { config, .. } => Some(config),
            State::Uninitialized => None,
        }
    }

    fn source(&self) -> Option<Arc<dyn FlagSource>> {
        match &self.state {
            State::Initialized { source, .. } => Some(source.clone()),
            State::Uninitialized => self
                .fallback_source
                .get_or_init(|| {
                    warn!("Not initialized, using {}", DEFAULT_BASE_URL);
                    match HttpFlagSource::new(&Config::default()) {
                        Ok(source) => Some(Arc::new(source) as Arc<dyn FlagSource>),
                        Err(e) => {
                            error!("Could not create default flag client: {}", e);
                            None
                        }
                    }
                })
                .clone(),
        }
    }

    /// The resolver for the current configuration, location binding and settings.
    pub fn resolver(&self) -> CountryResolver {
        let resolver = CountryResolver::new(self.settings.clone()).with_locale(self.locale.clone());
        match &self.state {
            State::Initialized {
                config, location, ..
            } => resolver
                .with_location(location.clone())
                .with_geocode_timeout(config.geocode_timeout()),
            State::Uninitialized => resolver,
        }
    }

    pub async fn resolve_country(&self) -> CountryResolution {
        self.resolver().resolve().await
    }

    /// The country that governs flag evaluation right now.
    pub async fn current_country(&self) -> String {
        self.resolve_country().await.country_code
    }

    pub async fn is_in_country(&self, country_code: &str) -> bool {
        same_country(&self.current_country().await, country_code)
    }

    pub fn has_location_permission(&self) -> bool {
        self.resolver().has_location_permission()
    }

    /// Evaluates `name` for `country_code`, explaining the result.
    ///
    /// Flags in the local snapshot are evaluated in process; anything else is asked of the flag
    /// service.
    pub async fn feature_detail_for_country(&self, name: &str, country_code: &str) -> Detail {
        if let Some(flag) = self.cache.flag(name) {
            debug!("Evaluating {} locally for {}", name, country_code);
            return evaluate(&flag, country_code);
        }

        let Some(source) = self.source() else {
            return Detail::err(ErrorKind::Unavailable);
        };
        match source.query(name, country_code).await {
            Ok(result) => Detail {
                result,
                reason: Reason::Remote,
            },
            Err(e) if e.is_not_found() => {
                warn!("Feature {} not found", name);
                Detail::err(ErrorKind::FlagNotFound)
            }
            Err(e) => {
                error!("Error checking feature {} for {}: {}", name, country_code, e);
                Detail::err(ErrorKind::Unavailable)
            }
        }
    }

    pub async fn is_feature_enabled_for_country(
        &self,
        name: &str,
        country_code: &str,
    ) -> EvaluationResult {
        self.feature_detail_for_country(name, country_code)
            .await
            .result
    }

    /// Evaluates `name` for the current country.
    pub async fn is_feature_enabled(&self, name: &str) -> EvaluationResult {
        let country = self.current_country().await;
        debug!("Checking feature {} for country {}", name, country);
        self.is_feature_enabled_for_country(name, &country).await
    }

    /// Like [GeoFeatures::is_feature_enabled_for_country], but None when the feature could not
    /// be evaluated, so a failure can be told apart from a disabled feature.
    pub async fn feature_config_for_country(
        &self,
        name: &str,
        country_code: &str,
    ) -> Option<EvaluationResult> {
        let detail = self.feature_detail_for_country(name, country_code).await;
        if detail.is_error() {
            None
        } else {
            Some(detail.result)
        }
    }

    /// Stores a manual country override. Returns false if `country_code` is not a two letter
    /// code or it could not be saved.
    pub fn set_user_country(&self, country_code: &str) -> bool {
        let Some(country) = normalize_country_code(country_code) else {
            warn!("Refusing malformed country override {:?}", country_code);
            return false;
        };
        match self.settings.set(USER_COUNTRY_KEY, &country) {
            Ok(()) => {
                info!("User country set to {}", country);
                true
            }
            Err(e) => {
                error!("Could not save user country: {}", e);
                false
            }
        }
    }

    pub fn user_country(&self) -> Option<String> {
        self.resolver().manual_override()
    }

    pub fn clear_user_country(&self) -> bool {
        match self.settings.remove(USER_COUNTRY_KEY) {
            Ok(()) => {
                info!("User country cleared");
                true
            }
            Err(e) => {
                error!("Could not clear user country: {}", e);
                false
            }
        }
    }

    pub async fn all_features(&self) -> Vec<Flag> {
        let Some(source) = self.source() else {
            return Vec::new();
        };
        source.all_flags().await.unwrap_or_else(|e| {
            error!("Error getting all features: {}", e);
            Vec::new()
        })
    }

    pub async fn feature_by_name(&self, name: &str) -> Option<Flag> {
        if let Some(flag) = self.cache.flag(name) {
            return Some(flag);
        }
        let source = self.source()?;
        match source.flag_by_name(name).await {
            Ok(flag) => Some(flag),
            Err(e) if e.is_not_found() => {
                warn!("Feature {} not found", name);
                None
            }
            Err(e) => {
                error!("Error getting feature {}: {}", name, e);
                None
            }
        }
    }

    /// Countries that have a rule in feature `name`, in rule order. Empty if the feature is
    /// unknown.
    pub async fn feature_countries(&self, name: &str) -> Vec<String> {
        self.feature_by_name(name)
            .await
            .map(|flag| flag.countries())
            .unwrap_or_default()
    }

    pub async fn has_rule_for_country(&self, name: &str, country_code: &str) -> bool {
        self.feature_by_name(name)
            .await
            .map(|flag| flag.has_rule_for(country_code))
            .unwrap_or(false)
    }

    pub async fn create_feature(&self, flag: &Flag) -> Option<Flag> {
        let source = self.source()?;
        match source.create(flag).await {
            Ok(created) => {
                info!("Created feature {}", created.name);
                self.remember(&created);
                Some(created)
            }
            Err(e) => {
                error!("Error creating feature {}: {}", flag.name, e);
                None
            }
        }
    }

    pub async fn update_feature(&self, id: &str, flag: &Flag) -> Option<Flag> {
        let source = self.source()?;
        match source.update(id, flag).await {
            Ok(updated) => {
                info!("Updated feature {}", updated.name);
                self.remember(&updated);
                Some(updated)
            }
            Err(e) => {
                error!("Error updating feature {}: {}", id, e);
                None
            }
        }
    }

    pub async fn delete_feature(&self, id: &str) -> bool {
        let Some(source) = self.source() else {
            return false;
        };
        match source.delete(id).await {
            Ok(()) => {
                info!("Deleted feature {}", id);
                self.cache.remove_by_id(id);
                true
            }
            Err(e) => {
                error!("Error deleting feature {}: {}", id, e);
                false
            }
        }
    }

    fn remember(&self, flag: &Flag) {
        if self.cache.is_initialized() {
            self.cache.upsert(flag.clone());
        }
    }

    /// Loads every flag into the local snapshot so later evaluations need no network. Returns
    /// false, keeping the previous snapshot, if the flag service could not be read.
    pub async fn sync_flags(&self) -> bool {
        let Some(source) = self.source() else {
            return false;
        };
        match source.all_flags().await {
            Ok(flags) => {
                for flag in &flags {
                    for problem in flag.validate() {
                        warn!("Feature {:?}: {}", flag.name, problem);
                    }
                }
                info!("Synced {} features", flags.len());
                self.cache.replace_all(flags);
                true
            }
            Err(e) => {
                error!("Error syncing features: {}", e);
                false
            }
        }
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
