//! Live settings store
//!
//! Holds the flattened key/value view of a [`PrinterSettings`] document behind
//! a read/write lock. The link reads through [`SettingsSource`] on every line,
//! so values changed here while printing apply to the next line written.

use crate::config::PrinterSettings;
use parking_lot::RwLock;
use printlink_core::SettingsSource;
use std::collections::HashMap;

/// Thread-safe key/value settings store
#[derive(Debug, Default)]
pub struct SettingsStore {
    values: RwLock<HashMap<String, String>>,
}

impl SettingsStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a store holding every value of a settings document
    pub fn from_settings(settings: &PrinterSettings) -> Self {
        let store = Self::new();
        store.apply(settings);
        store
    }

    /// Replace the stored values with those of a settings document
    ///
    /// Keys the document does not produce (extra macros, ad-hoc overrides)
    /// are kept.
    pub fn apply(&self, settings: &PrinterSettings) {
        let mut values = self.values.write();
        for (key, value) in settings.entries() {
            values.insert(key, value);
        }
    }

    /// Set a single value
    pub fn set(&self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        tracing::debug!("setting {} = {:?}", key, value);
        self.values.write().insert(key, value);
    }

    /// Remove a value, returning it
    pub fn remove(&self, key: &str) -> Option<String> {
        self.values.write().remove(key)
    }

    /// Number of stored values
    pub fn len(&self) -> usize {
        self.values.read().len()
    }

    /// Whether the store holds no values
    pub fn is_empty(&self) -> bool {
        self.values.read().is_empty()
    }
}

impl SettingsSource for SettingsStore {
    fn get(&self, key: &str) -> Option<String> {
        self.values.read().get(key).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use printlink_core::keys;

    #[test]
    fn test_from_settings_exposes_keys() {
        let store = SettingsStore::from_settings(&PrinterSettings::default());
        assert!(store.get_bool(keys::SEND_WITH_CHECKSUM));
        assert_eq!(store.get_u32_or(keys::BAUD_RATE, 0), 250_000);
        assert_eq!(store.get_f64_or(keys::FEED_RATE_RATIO, 0.0), 1.0);
    }

    #[test]
    fn test_set_overrides_value() {
        let store = SettingsStore::from_settings(&PrinterSettings::default());
        store.set(keys::FEED_RATE_RATIO, "0.5");
        assert_eq!(store.get_f64_or(keys::FEED_RATE_RATIO, 1.0), 0.5);

        assert!(store.remove(keys::FEED_RATE_RATIO).is_some());
        assert_eq!(store.get(keys::FEED_RATE_RATIO), None);
    }

    #[test]
    fn test_apply_keeps_extra_keys() {
        let store = SettingsStore::new();
        store.set("macro.wipe", "G1 X0");
        store.apply(&PrinterSettings::default());
        assert_eq!(store.get_string("macro.wipe"), "G1 X0");
        assert!(!store.is_empty());
    }
}
