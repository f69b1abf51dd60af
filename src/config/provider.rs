//! Runtime configuration lookups.
//!
//! Provider credentials and the default service id may change while the
//! service runs, so the worker reads them through a [`ConfigProvider`] once
//! per tick instead of caching them at startup.

use std::collections::BTreeMap;
use std::env;

use super::ProviderConfig;

pub const KEY_API_URL: &str = "provider.api_url";
pub const KEY_API_KEY: &str = "provider.api_key";
pub const KEY_DEFAULT_SERVICE_ID: &str = "provider.default_service_id";
pub const KEY_TIMEOUT_SECONDS: &str = "provider.timeout_seconds";
pub const KEY_CONNECT_TIMEOUT_SECONDS: &str = "provider.connect_timeout_seconds";

/// Key-value lookup for mutable settings.
pub trait ConfigProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
}

/// Reads `SMM_*` process environment at call time, falling back to the
/// values loaded at startup.
#[derive(Debug, Clone)]
pub struct EnvConfigProvider {
    defaults: ProviderConfig,
}

impl EnvConfigProvider {
    pub fn new(defaults: ProviderConfig) -> Self {
        Self { defaults }
    }

    fn env_key(key: &str) -> String {
        format!("SMM_{}", key.replace('.', "_").to_ascii_uppercase())
    }

    fn default_for(&self, key: &str) -> Option<String> {
        match key {
            KEY_API_URL => self.defaults.api_url.clone(),
            KEY_API_KEY => self.defaults.api_key.clone(),
            KEY_DEFAULT_SERVICE_ID => self.defaults.default_service_id.clone(),
            KEY_TIMEOUT_SECONDS => Some(self.defaults.timeout_seconds.to_string()),
            KEY_CONNECT_TIMEOUT_SECONDS => Some(self.defaults.connect_timeout_seconds.to_string()),
            _ => None,
        }
    }
}

impl ConfigProvider for EnvConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        env::var(Self::env_key(key))
            .ok()
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .or_else(|| self.default_for(key))
    }
}

/// Fixed key-value settings.
#[derive(Debug, Clone, Default)]
pub struct StaticConfigProvider {
    values: BTreeMap<String, String>,
}

impl StaticConfigProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &str, value: impl Into<String>) -> Self {
        self.values.insert(key.to_string(), value.into());
        self
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn get(&self, key: &str) -> Option<String> {
        self.values.get(key).cloned()
    }
}
