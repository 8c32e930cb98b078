use std::env;

use crate::error::ConfigError;

pub const DEFAULT_DB_URL: &str = "sqlite://course.sqlite3";
pub const DEFAULT_MAX_SAVE_ATTEMPTS: u32 = 5;

const DB_URL_KEY: &str = "COURSE_DB_URL";
const MAX_SAVE_ATTEMPTS_KEY: &str = "COURSE_MAX_SAVE_ATTEMPTS";

/// Runtime settings for the enrollment services.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub db_url: String,
    /// How many read-reconcile-save cycles an update gets before reporting a conflict.
    pub max_save_attempts: u32,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            db_url: DEFAULT_DB_URL.to_owned(),
            max_save_attempts: DEFAULT_MAX_SAVE_ATTEMPTS,
        }
    }
}

impl ServiceConfig {
    /// Read `COURSE_DB_URL` and `COURSE_MAX_SAVE_ATTEMPTS`, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a variable is set to an unusable value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as `from_env`, reading values through `lookup`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when a value is set but unusable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(db_url) = lookup(DB_URL_KEY) {
            if db_url.trim().is_empty() {
                return Err(ConfigError::Empty { key: DB_URL_KEY });
            }
            config.db_url = db_url.trim().to_owned();
        }

        if let Some(raw) = lookup(MAX_SAVE_ATTEMPTS_KEY) {
            config.max_save_attempts = raw
                .trim()
                .parse::<u32>()
                .ok()
                .filter(|attempts| *attempts > 0)
                .ok_or(ConfigError::InvalidValue {
                    key: MAX_SAVE_ATTEMPTS_KEY,
                    value: raw,
                })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let config = ServiceConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ServiceConfig::default());
        assert_eq!(config.db_url, DEFAULT_DB_URL);
        assert_eq!(config.max_save_attempts, 5);
    }

    #[test]
    fn values_are_read_and_trimmed() {
        let config = ServiceConfig::from_lookup(lookup(&[
            ("COURSE_DB_URL", " sqlite::memory: "),
            ("COURSE_MAX_SAVE_ATTEMPTS", "8"),
        ]))
        .unwrap();
        assert_eq!(config.db_url, "sqlite::memory:");
        assert_eq!(config.max_save_attempts, 8);
    }

    #[test]
    fn unusable_values_are_rejected() {
        assert_eq!(
            ServiceConfig::from_lookup(lookup(&[("COURSE_DB_URL", "  ")])).unwrap_err(),
            ConfigError::Empty {
                key: "COURSE_DB_URL"
            }
        );
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&[("COURSE_MAX_SAVE_ATTEMPTS", "0")])),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            ServiceConfig::from_lookup(lookup(&[("COURSE_MAX_SAVE_ATTEMPTS", "many")])),
            Err(ConfigError::InvalidValue { .. })
        ));
    }
}
