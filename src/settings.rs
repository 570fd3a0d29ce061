use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};

use log::debug;

use crate::error::{Error, Result};

/// Namespace the SDK's own settings live under, separate from other application settings.
pub const SETTINGS_NAMESPACE: &str = "geo_feature_prefs";
/// Key of the manual country override.
pub const USER_COUNTRY_KEY: &str = "user_country";

/// SettingsStore is a durable string key-value store. Each operation touches a single key and
/// is atomic with respect to the others.
pub trait SettingsStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> Result<()>;
    fn remove(&self, key: &str) -> Result<()>;
}

/// In-process settings that vanish with the process.
#[derive(Debug, Default)]
pub struct MemorySettings {
    values: RwLock<HashMap<String, String>>,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.insert(key.to_owned(), value.to_owned());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        values.remove(key);
        Ok(())
    }
}

/// Settings persisted as one JSON object per namespace, in `<dir>/<namespace>.json`.
///
/// Values are loaded once when the store is opened and served from memory afterwards. Every
/// change rewrites the file through a temporary file and a rename, so a crash leaves either the
/// old or the new contents.
#[derive(Debug)]
pub struct FileSettings {
    path: PathBuf,
    values: RwLock<HashMap<String, String>>,
}

impl FileSettings {
    /// Opens the SDK namespace in `dir`, creating the directory if needed.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_namespace(dir, SETTINGS_NAMESPACE)
    }

    pub fn open_namespace(dir: impl AsRef<Path>, namespace: &str) -> Result<Self> {
        if namespace.is_empty() || namespace.contains(['/', '\\']) {
            return Err(Error::Settings(format!("invalid namespace {:?}", namespace)));
        }
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", namespace));

        let values = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => HashMap::new(),
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                Error::Settings(format!("could not read {}: {}", path.display(), e))
            })?,
            Err(e) if e.kind() == ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!("opened settings {} with {} keys", path.display(), values.len());

        Ok(FileSettings {
            path,
            values: RwLock::new(values),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn persist(&self, values: &HashMap<String, String>) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(values)?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

impl SettingsStore for FileSettings {
    fn get(&self, key: &str) -> Result<Option<String>> {
        let values = self.values.read().unwrap_or_else(PoisonError::into_inner);
        Ok(values.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let previous = values.insert(key.to_owned(), value.to_owned());
        if let Err(e) = self.persist(&values) {
            // keep memory consistent with disk
            match previous {
                Some(previous) => values.insert(key.to_owned(), previous),
                None => values.remove(key),
            };
            return Err(e);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
        let Some(previous) = values.remove(key) else {
            return Ok(());
        };
        if let Err(e) = self.persist(&values) {
            values.insert(key.to_owned(), previous);
            return Err(e);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectral::prelude::*;

    #[test]
    fn memory_settings_round_trip() {
        let settings = MemorySettings::new();
        assert_that!(settings.get(USER_COUNTRY_KEY).unwrap()).is_none();

        settings.set(USER_COUNTRY_KEY, "FR").unwrap();
        assert_that!(settings.get(USER_COUNTRY_KEY).unwrap()).contains_value("FR".to_string());

        settings.remove(USER_COUNTRY_KEY).unwrap();
        assert_that!(settings.get(USER_COUNTRY_KEY).unwrap()).is_none();
    }

    #[test]
    fn file_settings_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let settings = FileSettings::open(dir.path()).unwrap();
            settings.set(USER_COUNTRY_KEY, "IL").unwrap();
            settings.set("other", "value").unwrap();
            settings.remove("other").unwrap();
        }

        let settings = FileSettings::open(dir.path()).unwrap();
        assert_that!(settings.get(USER_COUNTRY_KEY).unwrap()).contains_value("IL".to_string());
        assert_that!(settings.get("other").unwrap()).is_none();
        assert_eq!(
            settings.path(),
            dir.path().join("geo_feature_prefs.json").as_path()
        );
    }

    #[test]
    fn namespaces_are_separate_files() {
        let dir = tempfile::tempdir().unwrap();
        let ours = FileSettings::open(dir.path()).unwrap();
        let theirs = FileSettings::open_namespace(dir.path(), "app_prefs").unwrap();

        ours.set(USER_COUNTRY_KEY, "DE").unwrap();
        assert_that!(theirs.get(USER_COUNTRY_KEY).unwrap()).is_none();
    }

    #[test]
    fn removing_missing_key_does_not_create_file() {
        let dir = tempfile::tempdir().unwrap();
        let settings = FileSettings::open(dir.path()).unwrap();
        settings.remove(USER_COUNTRY_KEY).unwrap();
        assert!(!settings.path().exists());
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("geo_feature_prefs.json"), "not json").unwrap();
        assert!(matches!(
            FileSettings::open(dir.path()),
            Err(Error::Settings(_))
        ));
    }

    #[test]
    fn rejects_path_like_namespace() {
        let dir = tempfile::tempdir().unwrap();
        assert!(FileSettings::open_namespace(dir.path(), "../escape").is_err());
        assert!(FileSettings::open_namespace(dir.path(), "").is_err());
    }
}
